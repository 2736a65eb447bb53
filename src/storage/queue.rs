//! Session-compression queue plumbing: named queues with dependency gating.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VikingError, VikingResult};
use crate::types::generate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub queue: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub payload: HashMap<String, serde_json::Value>,
    /// Ids of messages that must be completed before this one may enqueue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            queue: String::new(),
            content: content.into(),
            payload: HashMap::new(),
            dependencies: Vec::new(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    queues: HashMap<String, Vec<QueueMessage>>,
}

/// Named in-process queues. One mutex over all of them; dequeue advances a
/// single message to `processing` atomically.
#[derive(Default)]
pub struct QueueManager {
    inner: Mutex<QueueInner>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_queue(&self, name: &str) -> VikingResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queues.contains_key(name) {
            return Err(VikingError::AlreadyExists(name.to_string()));
        }
        inner.queues.insert(name.to_string(), Vec::new());
        Ok(())
    }

    /// Enqueue a message, assigning it an id. Fails with `DependencyNotMet`
    /// when any dependency is not completed.
    pub fn enqueue(&self, queue: &str, mut message: QueueMessage) -> VikingResult<String> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.queues.contains_key(queue) {
            return Err(VikingError::NotFound(queue.to_string()));
        }

        if !message.dependencies.is_empty() {
            let unmet = message.dependencies.iter().find(|dep| {
                !inner.queues.values().flatten().any(|m| {
                    m.id == **dep && m.status == MessageStatus::Completed
                })
            });
            if let Some(dep) = unmet {
                return Err(VikingError::DependencyNotMet(dep.clone()));
            }
        }

        message.id = generate_id();
        message.queue = queue.to_string();
        message.status = MessageStatus::Pending;
        message.created_at = Utc::now();
        let id = message.id.clone();
        inner.queues.get_mut(queue).unwrap().push(message);
        Ok(id)
    }

    /// Pop the oldest pending message, marking it `processing`.
    pub fn dequeue(&self, queue: &str) -> VikingResult<Option<QueueMessage>> {
        let mut inner = self.inner.lock().unwrap();
        let messages = inner
            .queues
            .get_mut(queue)
            .ok_or_else(|| VikingError::NotFound(queue.to_string()))?;

        for message in messages.iter_mut() {
            if message.status == MessageStatus::Pending {
                message.status = MessageStatus::Processing;
                message.processed_at = Some(Utc::now());
                return Ok(Some(message.clone()));
            }
        }
        Ok(None)
    }

    pub fn complete(&self, message_id: &str) -> VikingResult<()> {
        self.set_status(message_id, MessageStatus::Completed)
    }

    pub fn fail(&self, message_id: &str) -> VikingResult<()> {
        self.set_status(message_id, MessageStatus::Failed)
    }

    fn set_status(&self, message_id: &str, status: MessageStatus) -> VikingResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for messages in inner.queues.values_mut() {
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                message.status = status;
                return Ok(());
            }
        }
        Err(VikingError::NotFound(message_id.to_string()))
    }

    pub fn get_message(&self, message_id: &str) -> Option<QueueMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .queues
            .values()
            .flatten()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }
}
