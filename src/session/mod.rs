//! Session management with automatic memory extraction.
//!
//! A session is a conversation container with a small state machine
//! (`active ↔ paused → closed`), monotonic counters, and persisted,
//! totally-ordered messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{VikingError, VikingResult};
use crate::llm::Role;
use crate::storage::{Condition, Filter, QueryOptions, SessionMessageRecord, SessionRecord, Store};
use crate::types::generate_id;

mod compressor;
mod dedup;
mod extractor;
mod summarizer;

pub use compressor::{AutoExtractor, CompressionConfig, SessionCompressor, SessionCompressionResult};
pub use dedup::{DedupDecision, MemoryDeduper};
pub use extractor::{
    category_weight, ExtractedMemory, ExtractorConfig, LlmExtractor, MemoryCategory,
    MemoryExtractor,
};
pub use summarizer::{LlmSummarizer, Summarizer, SummarizerConfig};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Paused,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// A tool call carried by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One message within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: &str, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A conversation container with counters and a state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub state: SessionState,
    pub total_turns: i64,
    pub total_tokens: i64,
    pub compression_count: i64,
    pub contexts_used: i64,
    pub skills_used: i64,
    pub memories_extracted: i64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            session_id: generate_id(),
            user_id: user_id.to_string(),
            state: SessionState::Active,
            total_turns: 0,
            total_tokens: 0,
            compression_count: 0,
            contexts_used: 0,
            skills_used: 0,
            memories_extracted: 0,
            summary: String::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Build a message for this session, bumping the turn counter.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(&self.session_id, role, content);
        self.total_turns += 1;
        self.touch();
        message
    }

    /// Build a tool-call message, bumping the skills counter.
    pub fn add_tool_call(&mut self, name: &str, arguments: &str) -> Message {
        let mut message = Message::new(&self.session_id, Role::Tool, "");
        message.tool_calls.push(ToolCall {
            id: generate_id(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        });
        self.skills_used += 1;
        self.touch();
        message
    }

    pub fn pause(&mut self) -> VikingResult<()> {
        if self.state != SessionState::Active {
            return Err(VikingError::InvalidState(format!(
                "cannot pause a {} session",
                self.state
            )));
        }
        self.state = SessionState::Paused;
        self.touch();
        Ok(())
    }

    pub fn resume(&mut self) -> VikingResult<()> {
        if self.state != SessionState::Paused {
            return Err(VikingError::InvalidState(format!(
                "cannot resume a {} session",
                self.state
            )));
        }
        self.state = SessionState::Active;
        self.touch();
        Ok(())
    }

    /// Close the session. Terminal; closing twice is an error.
    pub fn close(&mut self) -> VikingResult<()> {
        if self.state == SessionState::Closed {
            return Err(VikingError::InvalidState("session already closed".into()));
        }
        self.state = SessionState::Closed;
        let now = Utc::now();
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn add_tokens(&mut self, tokens: i64) {
        self.total_tokens += tokens;
        self.touch();
    }

    pub fn increment_contexts_used(&mut self) {
        self.contexts_used += 1;
        self.touch();
    }

    pub fn increment_memories_extracted(&mut self) {
        self.memories_extracted += 1;
        self.touch();
    }

    pub fn increment_compression(&mut self) {
        self.compression_count += 1;
        self.touch();
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ─── Persistence mapping ────────────────────────────────────────────────────

fn session_to_record(session: &Session) -> SessionRecord {
    let metadata = if session.metadata.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&session.metadata).unwrap_or_default()
    };
    SessionRecord {
        id: session.id.clone(),
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        state: session.state.to_string(),
        total_turns: session.total_turns,
        total_tokens: session.total_tokens,
        compression_count: session.compression_count,
        contexts_used: session.contexts_used,
        skills_used: session.skills_used,
        memories_extracted: session.memories_extracted,
        summary: session.summary.clone(),
        metadata,
        created_at: session.created_at,
        updated_at: session.updated_at,
        closed_at: session.closed_at,
    }
}

fn record_to_session(record: SessionRecord) -> Session {
    let state = match record.state.as_str() {
        "paused" => SessionState::Paused,
        "closed" => SessionState::Closed,
        _ => SessionState::Active,
    };
    let metadata = if record.metadata.is_empty() {
        serde_json::Map::new()
    } else {
        serde_json::from_str(&record.metadata).unwrap_or_default()
    };
    Session {
        id: record.id,
        session_id: record.session_id,
        user_id: record.user_id,
        state,
        total_turns: record.total_turns,
        total_tokens: record.total_tokens,
        compression_count: record.compression_count,
        contexts_used: record.contexts_used,
        skills_used: record.skills_used,
        memories_extracted: record.memories_extracted,
        summary: record.summary,
        metadata,
        created_at: record.created_at,
        updated_at: record.updated_at,
        closed_at: record.closed_at,
    }
}

fn role_from_str(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Session lifecycle over a persistent store. Message appends are totally
/// ordered per session via `order_index`.
pub struct SessionManager {
    store: Arc<dyn Store>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, user_id: &str) -> VikingResult<Session> {
        let session = Session::new(user_id);
        self.store.create_session(&session_to_record(&session)).await?;
        info!(session_id = %session.session_id, user_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> VikingResult<Session> {
        Ok(record_to_session(self.store.get_session(session_id).await?))
    }

    pub async fn update(&self, session: &Session) -> VikingResult<()> {
        self.store.update_session(&session_to_record(session)).await
    }

    pub async fn delete(&self, session_id: &str) -> VikingResult<()> {
        self.store.delete_session(session_id).await
    }

    pub async fn list(&self, user_id: &str) -> VikingResult<Vec<Session>> {
        let records = self
            .store
            .query_sessions(QueryOptions {
                filter: Some(Filter::all(vec![Condition::Must {
                    field: "user_id".into(),
                    value: serde_json::Value::String(user_id.to_string()),
                }])),
                order_by: Some("created_at".into()),
                ..Default::default()
            })
            .await?;
        Ok(records.into_iter().map(record_to_session).collect())
    }

    /// Append a message. Fails with `InvalidState` on a closed session.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> VikingResult<Message> {
        let mut session = self.get(session_id).await?;
        if session.state == SessionState::Closed {
            return Err(VikingError::InvalidState(
                "cannot add a message to a closed session".into(),
            ));
        }

        let existing = self.store.get_session_messages(session_id).await?;
        let order_index = existing.last().map(|m| m.order_index + 1).unwrap_or(0);

        let message = session.add_message(role, content);
        self.store
            .create_session_message(&SessionMessageRecord {
                id: message.id.clone(),
                session_id: session_id.to_string(),
                role: role.to_string(),
                content: message.content.clone(),
                order_index,
                created_at: message.created_at,
            })
            .await?;
        self.update(&session).await?;
        Ok(message)
    }

    /// A session's messages in insertion order.
    pub async fn get_messages(&self, session_id: &str) -> VikingResult<Vec<Message>> {
        let records = self.store.get_session_messages(session_id).await?;
        Ok(records
            .into_iter()
            .map(|r| Message {
                id: r.id,
                session_id: r.session_id,
                role: role_from_str(&r.role),
                content: r.content,
                name: None,
                tool_calls: Vec::new(),
                created_at: r.created_at,
            })
            .collect())
    }

    pub async fn pause(&self, session_id: &str) -> VikingResult<Session> {
        let mut session = self.get(session_id).await?;
        session.pause()?;
        self.update(&session).await?;
        Ok(session)
    }

    pub async fn resume(&self, session_id: &str) -> VikingResult<Session> {
        let mut session = self.get(session_id).await?;
        session.resume()?;
        self.update(&session).await?;
        Ok(session)
    }

    pub async fn close(&self, session_id: &str) -> VikingResult<Session> {
        let mut session = self.get(session_id).await?;
        session.close()?;
        self.update(&session).await?;
        Ok(session)
    }

    /// Run the compressor against a session's stored messages if its
    /// threshold is reached. On compression the older messages are replaced
    /// by a summary message, recent messages are kept verbatim, and the
    /// session counters are updated.
    pub async fn compress_session(
        &self,
        session_id: &str,
        compressor: &SessionCompressor,
        cancel: &CancellationToken,
    ) -> VikingResult<Option<SessionCompressionResult>> {
        let mut session = self.get(session_id).await?;
        let messages = self.get_messages(session_id).await?;

        let Some(result) = compressor.compress_with_trigger(&messages, cancel).await? else {
            return Ok(None);
        };

        let keep_recent = compressor.config().keep_recent.min(messages.len());
        let recent: Vec<Message> = messages[messages.len() - keep_recent..].to_vec();

        self.store.delete_session_messages(session_id).await?;
        let mut order_index = 0i64;
        if !result.summary.is_empty() {
            self.store
                .create_session_message(&SessionMessageRecord {
                    id: generate_id(),
                    session_id: session_id.to_string(),
                    role: Role::System.to_string(),
                    content: format!("[Conversation summary]\n{}", result.summary),
                    order_index,
                    created_at: Utc::now(),
                })
                .await?;
            order_index += 1;
        }
        for message in &recent {
            self.store
                .create_session_message(&SessionMessageRecord {
                    id: message.id.clone(),
                    session_id: session_id.to_string(),
                    role: message.role.to_string(),
                    content: message.content.clone(),
                    order_index,
                    created_at: message.created_at,
                })
                .await?;
            order_index += 1;
        }

        session.increment_compression();
        session.memories_extracted += result.memories_extracted as i64;
        if !result.summary.is_empty() {
            session.set_summary(result.summary.clone());
        }
        self.update(&session).await?;

        info!(
            session_id,
            compressed = result.messages_compressed,
            extracted = result.memories_extracted,
            tokens_saved = result.tokens_saved,
            "session compressed"
        );
        Ok(Some(result))
    }
}

/// Format messages as a transcript for prompts.
pub(crate) fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&format!("{}: {}\n", message.role, message.content));
        for tool_call in &message.tool_calls {
            out.push_str(&format!(
                "  Tool call: {}({})\n",
                tool_call.function.name, tool_call.function.arguments
            ));
        }
    }
    out
}

/// Rough token estimate for messages (4 chars per token).
pub(crate) fn estimate_message_tokens(messages: &[Message]) -> i64 {
    messages
        .iter()
        .map(|m| {
            let mut chars = m.content.len();
            for tc in &m.tool_calls {
                chars += tc.function.name.len() + tc.function.arguments.len();
            }
            (chars / 4) as i64
        })
        .sum()
}
