//! The registry collaborator.
//!
//! The sync engines only need three calls from a registry: an existence
//! probe, a metadata lookup and a subtree dump. [`MemoryRegistry`] is the
//! embedded implementation used by the CLI and by tests; it can be seeded
//! from a dump snapshot on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::dump::{ChildrenBlock, DumpReader, DumpWriter};
use crate::error::{DumpError, RegistryError};
use crate::types::{child_path, name_of, normalize_path, parent_path, DumpNode, Resource, ROOT_PATH};

/// Read access to a content registry.
pub trait Registry {
    /// Whether a resource exists at `path`.
    fn resource_exists(&self, path: &str) -> Result<bool, RegistryError>;

    /// Metadata of the resource at `path`.
    fn get(&self, path: &str) -> Result<Resource, RegistryError>;

    /// Stream a dump of the subtree rooted at `path` into `out`.
    fn dump(&self, path: &str, out: &mut dyn Write) -> Result<(), RegistryError>;
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    is_collection: bool,
    version: u64,
    last_modified: DateTime<Utc>,
    content: Vec<u8>,
    fields: Vec<(String, String)>,
}

impl Entry {
    fn collection(version: u64, at: DateTime<Utc>) -> Self {
        Self {
            is_collection: true,
            version,
            last_modified: at,
            content: Vec::new(),
            fields: Vec::new(),
        }
    }
}

/// An embedded registry keyed by normalised path.
///
/// Every mutation takes a fresh version number from a registry-wide counter
/// and stamps it on the changed node and all of its ancestors, so a
/// collection's version moves whenever anything below it changes.
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    entries: BTreeMap<String, Entry>,
    denied: BTreeSet<String>,
    next_version: u64,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// A registry holding only the root collection.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT_PATH.to_owned(), Entry::collection(1, Utc::now()));
        Self {
            entries,
            denied: BTreeSet::new(),
            next_version: 2,
        }
    }

    /// Create or replace the resource at `path`, creating parent collections.
    /// Returns the new version.
    pub fn put(&mut self, path: &str, content: impl Into<Vec<u8>>) -> Result<String, RegistryError> {
        let path = normalize_path(path);
        if let Some(existing) = self.entries.get(&path) {
            if existing.is_collection {
                return Err(RegistryError::IsACollection { path });
            }
        }
        self.ensure_parents(&path)?;
        let version = self.bump();
        let now = Utc::now();
        let fields = guess_media_type(&path)
            .map(|mt| vec![("mediaType".to_owned(), mt.to_owned())])
            .unwrap_or_default();
        self.entries.insert(
            path.clone(),
            Entry {
                is_collection: false,
                version,
                last_modified: now,
                content: content.into(),
                fields,
            },
        );
        self.touch_ancestors(&path, version, now);
        Ok(version.to_string())
    }

    /// Create the collection at `path` (and its parents) if missing.
    pub fn put_collection(&mut self, path: &str) -> Result<String, RegistryError> {
        let path = normalize_path(path);
        if let Some(existing) = self.entries.get(&path) {
            if existing.is_collection {
                return Ok(existing.version.to_string());
            }
            return Err(RegistryError::NotACollection { path });
        }
        self.ensure_parents(&path)?;
        let version = self.bump();
        let now = Utc::now();
        self.entries.insert(path.clone(), Entry::collection(version, now));
        self.touch_ancestors(&path, version, now);
        Ok(version.to_string())
    }

    /// Remove `path` and everything below it.
    pub fn delete(&mut self, path: &str) -> Result<(), RegistryError> {
        let path = normalize_path(path);
        if path == ROOT_PATH {
            return Err(RegistryError::AccessDenied { path });
        }
        if self.entries.remove(&path).is_none() {
            return Err(RegistryError::NotFound { path });
        }
        let prefix = format!("{path}/");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        let version = self.bump();
        self.touch_ancestors(&path, version, Utc::now());
        Ok(())
    }

    /// Make every read of `path` and its descendants fail as access-denied.
    pub fn deny_access(&mut self, path: &str) {
        self.denied.insert(normalize_path(path));
    }

    /// Attach a metadata element to an existing node.
    pub fn set_field(&mut self, path: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        let path = normalize_path(path);
        let entry = self
            .entries
            .get_mut(&path)
            .ok_or_else(|| RegistryError::NotFound { path: path.clone() })?;
        entry.fields.retain(|(k, _)| k != key);
        entry.fields.push((key.to_owned(), value.to_owned()));
        Ok(())
    }

    pub fn content(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .get(&normalize_path(path))
            .filter(|e| !e.is_collection)
            .map(|e| e.content.as_slice())
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Build a registry from a dump whose root node becomes `/`.
    ///
    /// Versions and timestamps in the dump are kept; numeric versions also
    /// advance the internal counter past them.
    pub fn from_dump<R: BufRead>(reader: &mut DumpReader<R>) -> Result<Self, DumpError> {
        let mut registry = Self {
            entries: BTreeMap::new(),
            denied: BTreeSet::new(),
            next_version: 1,
        };
        match reader.read_node()? {
            Some(root) => registry.load_node(reader, ROOT_PATH, root)?,
            None => {
                registry
                    .entries
                    .insert(ROOT_PATH.to_owned(), Entry::collection(1, Utc::now()));
            }
        }
        registry.next_version = registry.next_version.max(2);
        Ok(registry)
    }

    /// Load a dump snapshot file.
    pub fn load_snapshot_at(path: &Path) -> Result<Self, RegistryError> {
        let mut reader = DumpReader::from_file(path).map_err(|e| RegistryError::Snapshot {
            path: path.to_path_buf(),
            source: DumpError::Io(e),
        })?;
        Self::from_dump(&mut reader).map_err(|source| RegistryError::Snapshot {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the whole registry as a snapshot that [`load_snapshot_at`]
    /// reads back.
    ///
    /// [`load_snapshot_at`]: Self::load_snapshot_at
    pub fn save_snapshot_at(&self, path: &Path) -> Result<(), RegistryError> {
        let tmp = path.with_extension("xml.tmp");
        {
            let file = std::fs::File::create(&tmp)?;
            let mut out = std::io::BufWriter::new(file);
            self.dump(ROOT_PATH, &mut out)?;
            out.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load_node<R: BufRead>(
        &mut self,
        reader: &mut DumpReader<R>,
        path: &str,
        node: DumpNode,
    ) -> Result<(), DumpError> {
        let version = node
            .version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(|| self.next_version);
        self.next_version = self.next_version.max(version + 1);
        let last_modified = node.last_modified_at().unwrap_or_else(Utc::now);
        self.entries.insert(
            path.to_owned(),
            Entry {
                is_collection: node.is_collection,
                version,
                last_modified,
                content: node.content.unwrap_or_default(),
                fields: node.fields,
            },
        );

        if reader.open_children()? == ChildrenBlock::Entries {
            while reader.next_child()? {
                let child = reader
                    .read_node()?
                    .ok_or_else(|| DumpError::UnexpectedEof {
                        expected: "<resource>".to_owned(),
                    })?;
                let child_path = child_path(path, &child.name);
                self.load_node(reader, &child_path, child)?;
            }
        }
        reader.close_node()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn bump(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn ensure_parents(&mut self, path: &str) -> Result<(), RegistryError> {
        let mut missing = Vec::new();
        let mut cursor = parent_path(path);
        while let Some(parent) = cursor {
            match self.entries.get(parent) {
                Some(entry) if entry.is_collection => break,
                Some(_) => {
                    return Err(RegistryError::NotACollection {
                        path: parent.to_owned(),
                    })
                }
                None => missing.push(parent.to_owned()),
            }
            cursor = parent_path(parent);
        }
        for parent in missing.into_iter().rev() {
            let version = self.bump();
            self.entries
                .insert(parent, Entry::collection(version, Utc::now()));
        }
        Ok(())
    }

    fn touch_ancestors(&mut self, path: &str, version: u64, at: DateTime<Utc>) {
        let mut cursor = parent_path(path);
        while let Some(parent) = cursor {
            if let Some(entry) = self.entries.get_mut(parent) {
                entry.version = version;
                entry.last_modified = at;
            }
            cursor = parent_path(parent);
        }
    }

    fn check_access(&self, path: &str) -> Result<(), RegistryError> {
        let denied = self.denied.iter().any(|d| {
            d == path || d == ROOT_PATH || path.starts_with(&format!("{d}/"))
        });
        if denied {
            return Err(RegistryError::AccessDenied {
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == ROOT_PATH {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.len() > prefix.len() && !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn node_of(&self, path: &str, entry: &Entry) -> DumpNode {
        DumpNode {
            name: name_of(path).to_owned(),
            is_collection: entry.is_collection,
            version: Some(entry.version.to_string()),
            last_modified: Some(entry.last_modified.timestamp_millis()),
            content: (!entry.is_collection).then(|| entry.content.clone()),
            attributes: BTreeMap::new(),
            fields: entry.fields.clone(),
        }
    }

    fn write_subtree<W: Write>(&self, out: &mut DumpWriter<W>, path: &str) -> Result<(), DumpError> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(());
        };
        out.start_resource(&self.node_of(path, entry))?;
        if entry.is_collection {
            let children = self.children_of(path);
            if !children.is_empty() {
                out.start_children()?;
                for child in &children {
                    self.write_subtree(out, child)?;
                }
                out.end_children()?;
            }
        }
        out.end_resource()
    }
}

impl Registry for MemoryRegistry {
    fn resource_exists(&self, path: &str) -> Result<bool, RegistryError> {
        let path = normalize_path(path);
        self.check_access(&path)?;
        Ok(self.entries.contains_key(&path))
    }

    fn get(&self, path: &str) -> Result<Resource, RegistryError> {
        let path = normalize_path(path);
        self.check_access(&path)?;
        let entry = self
            .entries
            .get(&path)
            .ok_or_else(|| RegistryError::NotFound { path: path.clone() })?;
        let media_type = entry
            .fields
            .iter()
            .find(|(k, _)| k == "mediaType")
            .map(|(_, v)| v.clone());
        Ok(Resource {
            children: if entry.is_collection {
                self.children_of(&path)
            } else {
                Vec::new()
            },
            path,
            is_collection: entry.is_collection,
            version: entry.version.to_string(),
            last_modified: entry.last_modified,
            media_type,
        })
    }

    fn dump(&self, path: &str, out: &mut dyn Write) -> Result<(), RegistryError> {
        let path = normalize_path(path);
        self.check_access(&path)?;
        if !self.entries.contains_key(&path) {
            return Err(RegistryError::NotFound { path });
        }
        let mut writer = DumpWriter::new(out);
        writer.write_declaration()?;
        self.write_subtree(&mut writer, &path)?;
        writer.flush()?;
        Ok(())
    }
}

/// Media type for well-known extensions, the way registry clients tag new
/// uploads.
fn guess_media_type(path: &str) -> Option<&'static str> {
    let ext = name_of(path).rsplit_once('.')?.1.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "txt" => "text/plain",
        "xml" => "application/xml",
        "xsd" => "application/x-xsd+xml",
        "wsdl" => "application/wsdl+xml",
        "xsl" | "xslt" => "application/xslt+xml",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(media_type)
}
