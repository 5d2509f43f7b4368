//! Error types for regsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing the XML dump format.
#[derive(Debug, Error)]
pub enum DumpError {
    /// Malformed XML reported by the underlying pull parser.
    #[error("malformed dump XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A start tag carried an attribute that could not be parsed.
    #[error("malformed dump attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    /// The stream ended while an element was still open.
    #[error("unexpected end of dump while looking for {expected}")]
    UnexpectedEof { expected: String },

    /// An element appeared where the dump grammar does not allow it.
    #[error("unexpected <{found}> in dump, expected {expected}")]
    UnexpectedElement { found: String, expected: String },

    /// A `<resource>` start tag lacked a required attribute.
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// The `<content>` element was not valid base64.
    #[error("invalid base64 content for resource '{name}': {source}")]
    Content {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    /// `<lastModified>` was not an epoch-millisecond integer.
    #[error("invalid lastModified value '{value}' for resource '{name}'")]
    LastModified { name: String, value: String },

    /// Writing a dump failed.
    #[error("I/O error while streaming dump: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`crate::registry::Registry`] implementation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No resource exists at the requested path.
    #[error("no resource at {path}")]
    NotFound { path: String },

    /// The caller is not allowed to read the requested path.
    #[error("access denied to {path}")]
    AccessDenied { path: String },

    /// The remote registry could not be contacted.
    #[error("cannot reach registry at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// A write targeted a path below a non-collection resource.
    #[error("{path} is not a collection")]
    NotACollection { path: String },

    /// Content was written to a path that holds a collection.
    #[error("{path} is a collection")]
    IsACollection { path: String },

    /// Underlying I/O failure while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dump encoding/decoding failure.
    #[error("dump error: {0}")]
    Dump(#[from] DumpError),

    /// A dump snapshot file could not be loaded.
    #[error("failed to load registry snapshot at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: DumpError,
    },
}

/// Errors that can arise while loading [`crate::config::SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the config file.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// An environment override held a value that could not be interpreted.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}
