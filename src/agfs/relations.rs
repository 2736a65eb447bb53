//! Cross-directory relations.
//!
//! A directory's outgoing relations live in `.relations.json` inside the
//! directory: an array of `{id, uris, reason, created_at}` entries with
//! `link_<n>` ids. Relations are directed, non-ownership, and tolerate
//! dangling targets.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::Agfs;
use crate::error::{VikingError, VikingResult};

const RELATIONS_FILE: &str = ".relations.json";

/// One outgoing relation entry: source directory → target URIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEntry {
    pub id: String,
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub created_at: String,
}

/// Manages relation tables on top of an [`Agfs`] instance.
pub struct RelationManager {
    agfs: Arc<Agfs>,
}

impl RelationManager {
    pub fn new(agfs: Arc<Agfs>) -> Self {
        Self { agfs }
    }

    /// Append a relation from `from_uri` to `uris`, with a fresh `link_<n>`
    /// id.
    pub async fn link(&self, from_uri: &str, uris: Vec<String>, reason: &str) -> VikingResult<RelationEntry> {
        let _g = self.agfs.lock.write().await;
        let from_uri = self.agfs.normalize_uri(from_uri);
        let path = self.agfs.uri_to_path(&from_uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.agfs.io_error(e, &from_uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(from_uri));
        }

        let mut relations = read_relation_table(&path).await?;
        let entry = RelationEntry {
            id: next_link_id(&relations),
            uris,
            reason: reason.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        relations.push(entry.clone());
        write_relation_table(&path, &relations).await?;
        Ok(entry)
    }

    /// Remove `target_uri` from every entry of the directory's relation
    /// table, dropping entries that become empty. Fails with `NotFound` when
    /// the target appears nowhere.
    pub async fn unlink(&self, from_uri: &str, target_uri: &str) -> VikingResult<()> {
        let _g = self.agfs.lock.write().await;
        let from_uri = self.agfs.normalize_uri(from_uri);
        let path = self.agfs.uri_to_path(&from_uri)?;

        let mut relations = read_relation_table(&path).await?;
        let mut found = false;
        for entry in &mut relations {
            let before = entry.uris.len();
            entry.uris.retain(|u| u != target_uri);
            found |= entry.uris.len() != before;
        }
        if !found {
            return Err(VikingError::NotFound(target_uri.to_string()));
        }
        relations.retain(|e| !e.uris.is_empty());
        write_relation_table(&path, &relations).await
    }

    /// All relation entries of a directory. A missing table reads as empty.
    pub async fn get_relations(&self, uri: &str) -> VikingResult<Vec<RelationEntry>> {
        let _g = self.agfs.lock.read().await;
        let uri = self.agfs.normalize_uri(uri);
        let path = self.agfs.uri_to_path(&uri)?;
        read_relation_table(&path).await
    }

    /// All target URIs related to a directory, flattened across entries.
    pub async fn get_related_uris(&self, uri: &str) -> VikingResult<Vec<String>> {
        let relations = self.get_relations(uri).await?;
        Ok(relations.into_iter().flat_map(|e| e.uris).collect())
    }
}

async fn read_relation_table(dir: &Path) -> VikingResult<Vec<RelationEntry>> {
    let path = dir.join(RELATIONS_FILE);
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(VikingError::Io(err)),
    }
}

async fn write_relation_table(dir: &Path, relations: &[RelationEntry]) -> VikingResult<()> {
    let data = serde_json::to_vec_pretty(relations)?;
    Agfs::write_file_inner(&dir.join(RELATIONS_FILE), &data).await
}

/// `link_<n>` where n is one past the highest existing number.
fn next_link_id(relations: &[RelationEntry]) -> String {
    let max = relations
        .iter()
        .filter_map(|r| r.id.strip_prefix("link_"))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("link_{}", max + 1)
}
