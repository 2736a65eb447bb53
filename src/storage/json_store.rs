//! JSON-document store: in-memory collections with optional file
//! persistence. One document holds every collection; mutations rewrite it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{VikingError, VikingResult};

use super::{
    matches_filter, validate_fields, compare_values, ContextRecord, FileRecord, MemoryRecord,
    QueryOptions, RelationRecord, SessionMessageRecord, SessionRecord, Store, UsageRecord,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collections {
    contexts: Vec<ContextRecord>,
    sessions: Vec<SessionRecord>,
    session_messages: Vec<SessionMessageRecord>,
    memories: Vec<MemoryRecord>,
    files: Vec<FileRecord>,
    usage_records: Vec<UsageRecord>,
    relations: Vec<RelationRecord>,
}

/// The crate's reference store. With a path, every mutation is flushed to a
/// single JSON document; without one it is purely in-memory.
pub struct JsonStore {
    collections: RwLock<Collections>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// In-memory store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            path: None,
        }
    }

    /// File-backed store; loads the document if it exists.
    pub async fn open(path: impl Into<PathBuf>) -> VikingResult<Self> {
        let path = path.into();
        let collections = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(err) => return Err(VikingError::Io(err)),
        };
        Ok(Self {
            collections: RwLock::new(collections),
            path: Some(path),
        })
    }

    /// Write the document out. A no-op for in-memory stores.
    pub async fn flush(&self) -> VikingResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = {
            let collections = self.collections.read().await;
            serde_json::to_vec_pretty(&*collections)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn flush_after_mutation(&self) {
        if let Err(err) = self.flush().await {
            warn!(error = %err, "store flush failed");
        }
    }

    /// Periodically flush in the background until the returned handle is
    /// stopped; `stop` performs a final flush.
    pub fn start_auto_save(self: &std::sync::Arc<Self>, interval: Duration) -> AutoSaver {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = store.flush().await {
                            warn!(error = %err, "auto-save flush failed");
                        }
                    }
                    _ = &mut stop_rx => {
                        let _ = store.flush().await;
                        break;
                    }
                }
            }
        });
        AutoSaver {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to a background auto-save task.
pub struct AutoSaver {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AutoSaver {
    /// Stop the task after one final flush. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn query_records<T>(items: &[T], opts: &QueryOptions, fields: &[&str]) -> VikingResult<Vec<T>>
where
    T: Serialize + Clone,
{
    validate_fields(opts, fields)?;

    let mut scored: Vec<(serde_json::Value, &T)> = Vec::new();
    for item in items {
        let value = serde_json::to_value(item)?;
        if opts
            .filter
            .as_ref()
            .map_or(true, |f| matches_filter(&value, f))
        {
            scored.push((value, item));
        }
    }

    if let Some(order_by) = &opts.order_by {
        scored.sort_by(|(a, _), (b, _)| {
            let ord = match (a.get(order_by), b.get(order_by)) {
                (Some(x), Some(y)) => {
                    compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => std::cmp::Ordering::Equal,
            };
            if opts.order_desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    let result: Vec<T> = scored
        .into_iter()
        .skip(opts.offset)
        .take(if opts.limit > 0 {
            opts.limit
        } else {
            usize::MAX
        })
        .map(|(_, item)| item.clone())
        .collect();
    Ok(result)
}

#[async_trait::async_trait]
impl Store for JsonStore {
    async fn create_context(&self, record: &ContextRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            if collections
                .contexts
                .iter()
                .any(|c| c.id == record.id || c.uri == record.uri)
            {
                return Err(VikingError::AlreadyExists(record.uri.clone()));
            }
            collections.contexts.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn get_context(&self, id: &str) -> VikingResult<ContextRecord> {
        self.collections
            .read()
            .await
            .contexts
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| VikingError::NotFound(id.to_string()))
    }

    async fn update_context(&self, record: &ContextRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let existing = collections
                .contexts
                .iter_mut()
                .find(|c| c.id == record.id)
                .ok_or_else(|| VikingError::NotFound(record.id.clone()))?;
            *existing = record.clone();
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn delete_context(&self, id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let before = collections.contexts.len();
            collections.contexts.retain(|c| c.id != id);
            if collections.contexts.len() == before {
                return Err(VikingError::NotFound(id.to_string()));
            }
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_contexts(&self, opts: QueryOptions) -> VikingResult<Vec<ContextRecord>> {
        let collections = self.collections.read().await;
        query_records(&collections.contexts, &opts, ContextRecord::FIELDS)
    }

    async fn create_session(&self, record: &SessionRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            if collections
                .sessions
                .iter()
                .any(|s| s.session_id == record.session_id)
            {
                return Err(VikingError::AlreadyExists(record.session_id.clone()));
            }
            collections.sessions.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> VikingResult<SessionRecord> {
        self.collections
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| VikingError::NotFound(session_id.to_string()))
    }

    async fn update_session(&self, record: &SessionRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let existing = collections
                .sessions
                .iter_mut()
                .find(|s| s.session_id == record.session_id)
                .ok_or_else(|| VikingError::NotFound(record.session_id.clone()))?;
            *existing = record.clone();
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let before = collections.sessions.len();
            collections.sessions.retain(|s| s.session_id != session_id);
            if collections.sessions.len() == before {
                return Err(VikingError::NotFound(session_id.to_string()));
            }
            collections
                .session_messages
                .retain(|m| m.session_id != session_id);
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_sessions(&self, opts: QueryOptions) -> VikingResult<Vec<SessionRecord>> {
        let collections = self.collections.read().await;
        query_records(&collections.sessions, &opts, SessionRecord::FIELDS)
    }

    async fn create_session_message(&self, record: &SessionMessageRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            collections.session_messages.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn get_session_messages(
        &self,
        session_id: &str,
    ) -> VikingResult<Vec<SessionMessageRecord>> {
        let collections = self.collections.read().await;
        let mut messages: Vec<SessionMessageRecord> = collections
            .session_messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.order_index);
        Ok(messages)
    }

    async fn delete_session_messages(&self, session_id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            collections
                .session_messages
                .retain(|m| m.session_id != session_id);
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn create_memory(&self, record: &MemoryRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            if collections.memories.iter().any(|m| m.id == record.id) {
                return Err(VikingError::AlreadyExists(record.id.clone()));
            }
            collections.memories.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn get_memory(&self, id: &str) -> VikingResult<MemoryRecord> {
        self.collections
            .read()
            .await
            .memories
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| VikingError::NotFound(id.to_string()))
    }

    async fn update_memory(&self, record: &MemoryRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let existing = collections
                .memories
                .iter_mut()
                .find(|m| m.id == record.id)
                .ok_or_else(|| VikingError::NotFound(record.id.clone()))?;
            *existing = record.clone();
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn delete_memory(&self, id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let before = collections.memories.len();
            collections.memories.retain(|m| m.id != id);
            if collections.memories.len() == before {
                return Err(VikingError::NotFound(id.to_string()));
            }
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_memories(&self, opts: QueryOptions) -> VikingResult<Vec<MemoryRecord>> {
        let collections = self.collections.read().await;
        query_records(&collections.memories, &opts, MemoryRecord::FIELDS)
    }

    async fn create_file(&self, record: &FileRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            if collections.files.iter().any(|f| f.uri == record.uri) {
                return Err(VikingError::AlreadyExists(record.uri.clone()));
            }
            collections.files.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn get_file(&self, id: &str) -> VikingResult<FileRecord> {
        self.collections
            .read()
            .await
            .files
            .iter()
            .find(|f| f.id == id)
            .cloned()
            .ok_or_else(|| VikingError::NotFound(id.to_string()))
    }

    async fn delete_file(&self, id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let before = collections.files.len();
            collections.files.retain(|f| f.id != id);
            if collections.files.len() == before {
                return Err(VikingError::NotFound(id.to_string()));
            }
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_files(&self, opts: QueryOptions) -> VikingResult<Vec<FileRecord>> {
        let collections = self.collections.read().await;
        query_records(&collections.files, &opts, FileRecord::FIELDS)
    }

    async fn create_usage(&self, record: &UsageRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            collections.usage_records.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_usage(&self, opts: QueryOptions) -> VikingResult<Vec<UsageRecord>> {
        let collections = self.collections.read().await;
        query_records(&collections.usage_records, &opts, UsageRecord::FIELDS)
    }

    async fn create_relation(&self, record: &RelationRecord) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            collections.relations.push(record.clone());
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn query_relations(&self, uri: &str) -> VikingResult<Vec<RelationRecord>> {
        let collections = self.collections.read().await;
        Ok(collections
            .relations
            .iter()
            .filter(|r| r.uris.contains(uri))
            .cloned()
            .collect())
    }

    async fn delete_relation(&self, id: &str) -> VikingResult<()> {
        {
            let mut collections = self.collections.write().await;
            let before = collections.relations.len();
            collections.relations.retain(|r| r.id != id);
            if collections.relations.len() == before {
                return Err(VikingError::NotFound(id.to_string()));
            }
        }
        self.flush_after_mutation().await;
        Ok(())
    }

    async fn ping(&self) -> VikingResult<()> {
        Ok(())
    }

    async fn close(&self) -> VikingResult<()> {
        self.flush().await
    }
}
