//! regsync core library: dump format, registry collaborator, config, errors.
//!
//! - [`types`]: [`DumpNode`], [`Resource`] and registry path helpers
//! - [`dump`]: [`DumpReader`] / [`DumpWriter`]
//! - [`registry`]: the [`Registry`] trait and [`MemoryRegistry`]
//! - [`config`]: [`SyncConfig`] loading
//! - [`error`]: [`DumpError`], [`RegistryError`], [`ConfigError`]

pub mod config;
pub mod dump;
pub mod error;
pub mod registry;
pub mod types;

pub use config::SyncConfig;
pub use dump::{ChildrenBlock, DumpReader, DumpWriter};
pub use error::{ConfigError, DumpError, RegistryError};
pub use registry::{MemoryRegistry, Registry};
pub use types::{DumpNode, Resource, ROOT_PATH};
