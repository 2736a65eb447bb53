//! AGFS — the Agent Graph Filesystem.
//!
//! A filesystem-like context store that organizes memories, resources, and
//! skills in a hierarchical directory structure addressed by `viking://` URIs.
//! Every directory may carry three summary levels (`.abstract.md`,
//! `.overview.md`, `content.md`) and an outgoing relation table
//! (`.relations.json`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{VikingError, VikingResult};

mod context;
mod dir;
mod file;
mod relations;

pub use context::{ContextFile, GrepMatch};
pub use relations::{RelationEntry, RelationManager};

/// The type of a context file, derived from its URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Memory,
    #[default]
    Resource,
    Skill,
    Directory,
}

/// A file or directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    pub uri: String,
    pub size: u64,
    pub mode: u32,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub file_type: FileType,
}

/// A node in a `tree` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub uri: String,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub overview: String,
}

/// AGFS configuration.
#[derive(Debug, Clone)]
pub struct AgfsConfig {
    /// Root directory for on-disk storage.
    pub root_path: PathBuf,
    /// URI prefix for the virtual namespace.
    pub uri_prefix: String,
}

impl Default for AgfsConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./data/viking"),
            uri_prefix: "viking://".into(),
        }
    }
}

impl AgfsConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ..Self::default()
        }
    }
}

/// The directories every AGFS instance starts with.
const BOOTSTRAP_DIRS: &[&str] = &[
    "session",
    "user/memories/profile",
    "user/memories/preferences",
    "user/memories/entities",
    "user/memories/events",
    "agent/memories/cases",
    "agent/memories/patterns",
    "agent/instructions",
    "agent/skills",
    "resources",
];

/// The Agent Graph File System.
///
/// One reader-writer lock guards the whole namespace: readers may overlap,
/// writers are exclusive. Tree walks hold the read lock for the whole walk.
pub struct Agfs {
    root: PathBuf,
    prefix: String,
    pub(crate) lock: RwLock<()>,
}

impl Agfs {
    /// Create an AGFS instance, ensuring the bootstrap skeleton exists.
    pub async fn new(config: AgfsConfig) -> VikingResult<Self> {
        let agfs = Self {
            root: config.root_path,
            prefix: config.uri_prefix,
            lock: RwLock::new(()),
        };
        agfs.ensure_root_dirs().await?;
        Ok(agfs)
    }

    async fn ensure_root_dirs(&self) -> VikingResult<()> {
        for dir in BOOTSTRAP_DIRS {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uri_prefix(&self) -> &str {
        &self.prefix
    }

    /// Accept legacy URI forms (`/local/…`, bare `/…`) and normalize to the
    /// canonical prefix.
    pub fn normalize_uri(&self, uri: &str) -> String {
        if uri.starts_with(&self.prefix) {
            return uri.to_string();
        }
        if let Some(rest) = uri.strip_prefix("/local/") {
            return format!("{}{rest}", self.prefix);
        }
        if let Some(rest) = uri.strip_prefix('/') {
            return format!("{}{rest}", self.prefix);
        }
        uri.to_string()
    }

    /// Convert a viking URI to its on-disk path.
    pub fn uri_to_path(&self, uri: &str) -> VikingResult<PathBuf> {
        let uri = self.normalize_uri(uri);
        let Some(remainder) = uri.strip_prefix(&self.prefix) else {
            return Err(VikingError::InvalidUri(uri));
        };
        let remainder = remainder.trim_start_matches('/');
        if remainder.is_empty() {
            return Ok(self.root.clone());
        }
        if remainder.split('/').any(|c| c == "..") {
            return Err(VikingError::InvalidUri(uri));
        }
        Ok(self.root.join(remainder))
    }

    /// Convert an on-disk path back to its viking URI. Inverse of
    /// [`Agfs::uri_to_path`] on well-formed inputs.
    pub fn path_to_uri(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => {
                let rel = rel.to_string_lossy();
                if rel.is_empty() {
                    self.prefix.clone()
                } else {
                    format!("{}{}", self.prefix, rel.replace('\\', "/"))
                }
            }
            Err(_) => self.normalize_uri(&path.to_string_lossy()),
        }
    }

    /// Map an io error on `path` to the AGFS error kind.
    pub(crate) fn io_error(&self, err: std::io::Error, uri: &str) -> VikingError {
        if err.kind() == std::io::ErrorKind::NotFound {
            VikingError::NotFound(uri.to_string())
        } else {
            VikingError::Io(err)
        }
    }
}

/// Determine the context file type from a URI.
pub fn file_type_from_uri(uri: &str) -> FileType {
    let lower = uri.to_lowercase();
    if lower.contains("/memories") {
        FileType::Memory
    } else if lower.contains("/skills") {
        FileType::Skill
    } else {
        FileType::Resource
    }
}

pub(crate) fn determine_file_type(uri: &str, is_dir: bool) -> FileType {
    if is_dir {
        FileType::Directory
    } else {
        file_type_from_uri(uri)
    }
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
pub(crate) async fn temp_agfs() -> (tempfile::TempDir, Agfs) {
    let dir = tempfile::tempdir().unwrap();
    let agfs = Agfs::new(AgfsConfig::with_root(dir.path())).await.unwrap();
    (dir, agfs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_creates_skeleton() {
        let (_dir, agfs) = temp_agfs().await;
        for uri in [
            "viking://session",
            "viking://user/memories/preferences",
            "viking://agent/memories/patterns",
            "viking://agent/skills",
            "viking://resources",
        ] {
            assert!(agfs.is_dir(uri).await, "missing {uri}");
        }
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Agfs::new(AgfsConfig::with_root(dir.path())).await.unwrap();
        // Reopening over existing directories must not fail
        let second = Agfs::new(AgfsConfig::with_root(dir.path())).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn uri_path_round_trip() {
        let (_dir, agfs) = temp_agfs().await;
        for uri in [
            "viking://resources",
            "viking://user/memories/events",
            "viking://agent/skills/search",
        ] {
            let path = agfs.uri_to_path(uri).unwrap();
            assert_eq!(agfs.path_to_uri(&path), uri);
        }
    }

    #[tokio::test]
    async fn root_uri_maps_to_root_path() {
        let (_dir, agfs) = temp_agfs().await;
        let path = agfs.uri_to_path("viking://").unwrap();
        assert_eq!(path, agfs.root());
    }

    #[tokio::test]
    async fn legacy_uris_normalize() {
        let (_dir, agfs) = temp_agfs().await;
        assert_eq!(
            agfs.normalize_uri("/local/user/memories"),
            "viking://user/memories"
        );
        assert_eq!(agfs.normalize_uri("/resources/docs"), "viking://resources/docs");
        assert_eq!(
            agfs.normalize_uri("viking://resources"),
            "viking://resources"
        );
    }

    #[tokio::test]
    async fn parent_escape_rejected() {
        let (_dir, agfs) = temp_agfs().await;
        assert!(matches!(
            agfs.uri_to_path("viking://resources/../../etc"),
            Err(VikingError::InvalidUri(_))
        ));
    }

    #[test]
    fn file_type_derivation() {
        assert_eq!(file_type_from_uri("viking://user/memories/a"), FileType::Memory);
        assert_eq!(file_type_from_uri("viking://agent/skills/b"), FileType::Skill);
        assert_eq!(file_type_from_uri("viking://resources/c"), FileType::Resource);
        assert_eq!(file_type_from_uri("viking://session/d"), FileType::Resource);
        assert_eq!(determine_file_type("viking://resources/c", true), FileType::Directory);
    }
}
