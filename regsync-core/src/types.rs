//! Domain types shared by the registry, the dump format and the sync engines.
//!
//! Registry paths are `/`-separated strings rooted at [`ROOT_PATH`]; they are
//! never filesystem paths.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

/// Path of the registry root collection.
pub const ROOT_PATH: &str = "/";

// ---------------------------------------------------------------------------
// Dump nodes
// ---------------------------------------------------------------------------

/// One `<resource>` element of a dump, without its children.
///
/// Produced by [`crate::dump::DumpReader::read_node`] and consumed by
/// [`crate::dump::DumpWriter::start_resource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpNode {
    pub name: String,
    pub is_collection: bool,
    /// Server-assigned opaque version token.
    pub version: Option<String>,
    /// Epoch milliseconds.
    pub last_modified: Option<i64>,
    /// Decoded bytes of `<content>`; collections carry none.
    pub content: Option<Vec<u8>>,
    /// Start-tag attributes other than `name`, `isCollection` and `version`.
    pub attributes: BTreeMap<String, String>,
    /// Simple text metadata elements in document order (`mediaType`, …).
    pub fields: Vec<(String, String)>,
}

impl DumpNode {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_collection: true,
            ..Self::default()
        }
    }

    pub fn resource(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            is_collection: false,
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Value of the first metadata element called `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// `last_modified` as a UTC timestamp, when present and in range.
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

// ---------------------------------------------------------------------------
// Registry resources
// ---------------------------------------------------------------------------

/// What [`crate::registry::Registry::get`] returns for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: String,
    pub is_collection: bool,
    pub version: String,
    pub last_modified: DateTime<Utc>,
    pub media_type: Option<String>,
    /// Paths of direct children, sorted. Empty for plain resources.
    pub children: Vec<String>,
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Registry path of `name` inside the collection at `parent`.
///
/// The root contributes no prefix, so `child_path("/", "a")` is `/a`.
pub fn child_path(parent: &str, name: &str) -> String {
    let prefix = if parent == ROOT_PATH { "" } else { parent };
    format!("{prefix}/{name}")
}

/// Parent collection of `path`, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => Some(ROOT_PATH),
    }
}

/// Last segment of `path`; the root's name is empty.
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

/// Normalise a user-supplied registry path: leading `/`, no trailing `/`,
/// empty meaning root.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_PATH.to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}
