//! Where a working copy points: registry url plus registry path.

use std::fmt;

use regsync_core::types::normalize_path;

use crate::error::{MessageCode, SyncError};

/// Path segment separating a registry's base url from resource paths.
pub const REGISTRY_CONTEXT: &str = "/registry";

/// A parsed checkout/update target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    /// Base url including [`REGISTRY_CONTEXT`], or `None` for the local
    /// registry.
    pub registry_url: Option<String>,
    pub path: String,
}

impl RegistryLocation {
    /// Parse `https://host:9443/registry/a/b` or a bare `/a/b`.
    ///
    /// A url without a path part resolves to the root.
    pub fn parse(user_url: &str) -> Result<Self, SyncError> {
        let user_url = user_url.trim();
        if user_url.is_empty() {
            return Err(SyncError::new(MessageCode::PathMissing));
        }
        if user_url.starts_with('/') {
            return Ok(Self {
                registry_url: None,
                path: normalize_path(user_url),
            });
        }
        match user_url.rfind(REGISTRY_CONTEXT) {
            Some(idx) => {
                let split = idx + REGISTRY_CONTEXT.len();
                Ok(Self {
                    registry_url: Some(user_url[..split].to_owned()),
                    path: normalize_path(&user_url[split..]),
                })
            }
            None => Ok(Self {
                registry_url: Some(user_url.trim_end_matches('/').to_owned()),
                path: normalize_path(""),
            }),
        }
    }

    pub fn local(path: &str) -> Self {
        Self {
            registry_url: None,
            path: normalize_path(path),
        }
    }

    /// Attach the registry url and `username` to `err` unless it already
    /// carries them.
    pub(crate) fn annotate(&self, err: SyncError, username: Option<&str>) -> SyncError {
        let err = match &self.registry_url {
            Some(url) if err.context_value("registry url").is_none() => {
                err.with("registry url", url)
            }
            _ => err,
        };
        match username {
            Some(user) if err.context_value("username").is_none() => err.with("username", user),
            _ => err,
        }
    }
}

impl fmt::Display for RegistryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.registry_url {
            Some(url) => write!(f, "{url}{}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// Drop `..` segments from a path before showing it to the user.
pub fn refined_path_to_print(path: &str) -> String {
    path.split('/')
        .filter(|segment| *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}
