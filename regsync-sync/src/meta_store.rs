//! Meta sidecars: the per-entry memory of the last sync.
//!
//! ```text
//! <dir>/.meta/meta.xml                 collection <dir>
//! <dir>/.meta/meta-<encoded name>.xml  resource <dir>/<name>
//! ```
//!
//! A record repeats the dump header of the node (minus content) plus the
//! digest of the bytes written, the registry path, the registry url and the
//! conflict flag. Writes use the atomic `.tmp` + rename pattern.

use std::path::{Path, PathBuf};

use regsync_core::{DumpNode, DumpReader, DumpWriter};

use crate::error::{io_err, MessageCode, SyncError};
use crate::hasher;
use crate::path_codec::{decode_name, encode_name};

pub const META_DIR: &str = ".meta";
pub const COLLECTION_META_FILE: &str = "meta.xml";
pub const META_FILE_PREFIX: &str = "meta-";
pub const META_FILE_SUFFIX: &str = ".xml";

const PATH_ATTR: &str = "path";
const MD5_ATTR: &str = "md5";
const CONFLICTING_ATTR: &str = "conflicting";
const REGISTRY_URL_ATTR: &str = "registryUrl";

/// What the working copy remembers about one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaRecord {
    pub path: String,
    pub name: String,
    pub is_collection: bool,
    pub version: Option<String>,
    pub last_modified: Option<i64>,
    /// Digest of the bytes last written; `None` for collections and for
    /// entries left in conflict.
    pub md5: Option<String>,
    pub conflicting: bool,
    pub registry_url: Option<String>,
    /// Extra metadata elements carried over from the dump.
    pub fields: Vec<(String, String)>,
}

impl MetaRecord {
    /// Record for `node` at registry `path`. Resources get the digest of the
    /// node's content.
    pub fn from_dump(node: &DumpNode, path: &str, registry_url: Option<&str>) -> Self {
        let md5 = (!node.is_collection)
            .then(|| hasher::digest(node.content.as_deref().unwrap_or_default()));
        Self {
            path: path.to_owned(),
            name: node.name.clone(),
            is_collection: node.is_collection,
            version: node.version.clone(),
            last_modified: node.last_modified,
            md5,
            conflicting: false,
            registry_url: registry_url.map(str::to_owned),
            fields: node.fields.clone(),
        }
    }

    fn from_node(mut node: DumpNode) -> Self {
        let take = |node: &mut DumpNode, key: &str| node.attributes.remove(key);
        let path = take(&mut node, PATH_ATTR).unwrap_or_default();
        let md5 = take(&mut node, MD5_ATTR).filter(|d| !d.is_empty());
        let conflicting = take(&mut node, CONFLICTING_ATTR)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let registry_url = take(&mut node, REGISTRY_URL_ATTR).filter(|u| !u.is_empty());
        Self {
            path,
            name: node.name,
            is_collection: node.is_collection,
            version: node.version,
            last_modified: node.last_modified,
            md5,
            conflicting,
            registry_url,
            fields: node.fields,
        }
    }

    fn to_node(&self) -> DumpNode {
        let mut node = DumpNode {
            name: self.name.clone(),
            is_collection: self.is_collection,
            version: self.version.clone(),
            last_modified: self.last_modified,
            content: None,
            attributes: Default::default(),
            fields: self.fields.clone(),
        };
        node.attributes.insert(PATH_ATTR.to_owned(), self.path.clone());
        if let Some(md5) = &self.md5 {
            node.attributes.insert(MD5_ATTR.to_owned(), md5.clone());
        }
        if self.conflicting {
            node.attributes
                .insert(CONFLICTING_ATTR.to_owned(), "true".to_owned());
        }
        if let Some(url) = &self.registry_url {
            node.attributes
                .insert(REGISTRY_URL_ATTR.to_owned(), url.clone());
        }
        node
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Directory holding the meta record of the entry at `file_path`.
pub fn meta_dir_for(file_path: &Path, is_collection: bool) -> PathBuf {
    if is_collection {
        file_path.join(META_DIR)
    } else {
        parent_dir(file_path).join(META_DIR)
    }
}

/// Meta file of the entry at `file_path`.
pub fn meta_file_path(file_path: &Path, is_collection: bool) -> PathBuf {
    let dir = meta_dir_for(file_path, is_collection);
    if is_collection {
        return dir.join(COLLECTION_META_FILE);
    }
    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(
        "{META_FILE_PREFIX}{}{META_FILE_SUFFIX}",
        encode_name(&name)
    ))
}

/// Names of the resources of `dir` that have a meta record, whether or not
/// the file itself is still there.
pub fn tracked_resource_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir.join(META_DIR)) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| {
            let file = e.file_name().to_string_lossy().into_owned();
            let encoded = file
                .strip_prefix(META_FILE_PREFIX)?
                .strip_suffix(META_FILE_SUFFIX)?
                .to_string();
            match decode_name(&encoded) {
                Ok(name) => Some(name),
                Err(err) => {
                    tracing::warn!("skipping meta file {file}: {err}");
                    None
                }
            }
        })
        .collect();
    names.sort();
    names
}

fn parent_dir(file_path: &Path) -> &Path {
    file_path.parent().unwrap_or_else(|| Path::new("."))
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Load the record at `meta_path`.
pub fn read(meta_path: &Path) -> Result<MetaRecord, SyncError> {
    let corrupt = |err: regsync_core::DumpError| {
        SyncError::new(MessageCode::MetaFileReadFailed)
            .with_path(meta_path)
            .caused_by(err)
    };
    let mut reader = DumpReader::from_file(meta_path)
        .map_err(|e| io_err(MessageCode::MetaFileReadFailed, meta_path, e))?;
    let node = reader
        .read_node()
        .map_err(corrupt)?
        .ok_or_else(|| SyncError::new(MessageCode::MetaFileReadFailed).with_path(meta_path))?;
    Ok(MetaRecord::from_node(node))
}

/// Load the record at `meta_path` if the file exists.
pub fn read_if_exists(meta_path: &Path) -> Result<Option<MetaRecord>, SyncError> {
    if !meta_path.exists() {
        return Ok(None);
    }
    read(meta_path).map(Some)
}

/// Persist `record` at `meta_path`, creating the meta directory if needed.
pub fn write(meta_path: &Path, record: &MetaRecord) -> Result<(), SyncError> {
    if let Some(dir) = meta_path.parent() {
        ensure_meta_dir(dir)?;
    }
    let mut xml = Vec::new();
    {
        let mut writer = DumpWriter::new(&mut xml);
        writer
            .write_declaration()
            .and_then(|_| writer.leaf(&record.to_node()))
            .map_err(|e| {
                SyncError::new(MessageCode::MetaFileWriteFailed)
                    .with_path(meta_path)
                    .caused_by(e)
            })?;
    }
    let tmp = meta_path.with_extension("xml.tmp");
    std::fs::write(&tmp, &xml).map_err(|e| io_err(MessageCode::MetaFileWriteFailed, &tmp, e))?;
    std::fs::rename(&tmp, meta_path)
        .map_err(|e| io_err(MessageCode::MetaFileWriteFailed, meta_path, e))?;
    tracing::debug!("meta: {}", meta_path.display());
    Ok(())
}

/// Create `dir` if it does not exist yet.
pub fn ensure_meta_dir(dir: &Path) -> Result<(), SyncError> {
    if dir.is_dir() {
        return Ok(());
    }
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(e) => Err(io_err(MessageCode::MetaDirCreationFailed, dir, e)),
    }
}

/// Whether the server copy of `node` differs from what `meta_path`
/// remembers. A missing or unreadable record counts as changed.
///
/// Versions are compared when both sides have one, `lastModified`
/// otherwise.
pub fn resource_updated(meta_path: &Path, node: &DumpNode) -> bool {
    let Ok(record) = read(meta_path) else {
        return true;
    };
    match (&record.version, &node.version) {
        (Some(local), Some(server)) => local != server,
        _ => match (record.last_modified, node.last_modified) {
            (Some(local), Some(server)) => local != server,
            _ => true,
        },
    }
}
