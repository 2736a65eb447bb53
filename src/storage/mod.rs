//! Persistent store contract: named collections of records with filter
//! queries. The adapter is free to map collections to tables, key-value
//! prefixes, or documents; the crate ships a JSON-document implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VikingError, VikingResult};

mod json_store;
mod queue;

pub use json_store::{AutoSaver, JsonStore};
pub use queue::{MessageStatus, QueueManager, QueueMessage};

// ─── Record models ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: String,
    pub uri: String,
    pub context_type: String,
    #[serde(default)]
    pub parent_uri: String,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub abstract_text: String,
    #[serde(default)]
    pub active_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "uri",
        "context_type",
        "parent_uri",
        "is_leaf",
        "name",
        "description",
        "tags",
        "abstract_text",
        "active_count",
        "created_at",
        "updated_at",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub total_turns: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub compression_count: i64,
    #[serde(default)]
    pub contexts_used: i64,
    #[serde(default)]
    pub skills_used: i64,
    #[serde(default)]
    pub memories_extracted: i64,
    #[serde(default)]
    pub summary: String,
    /// Free-form session metadata, a JSON object serialized as text.
    #[serde(default)]
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "session_id",
        "user_id",
        "state",
        "total_turns",
        "total_tokens",
        "compression_count",
        "contexts_used",
        "skills_used",
        "memories_extracted",
        "summary",
        "metadata",
        "created_at",
        "updated_at",
        "closed_at",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

impl SessionMessageRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "session_id",
        "role",
        "content",
        "order_index",
        "created_at",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    pub content: String,
    pub importance: f64,
    #[serde(default)]
    pub tags: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "session_id",
        "user_id",
        "content",
        "importance",
        "tags",
        "created_at",
        "updated_at",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "uri",
        "name",
        "size",
        "content_type",
        "checksum",
        "created_at",
        "updated_at",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub session_id: String,
    pub uri: String,
    /// `"context"` or `"skill"`.
    pub usage_type: String,
    #[serde(default)]
    pub contribution: f64,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "session_id",
        "uri",
        "usage_type",
        "contribution",
        "input",
        "output",
        "success",
        "timestamp",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: String,
    /// JSON array of URIs, serialized as text.
    pub uris: String,
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl RelationRecord {
    pub const FIELDS: &'static [&'static str] = &["id", "uris", "reason", "created_at"];
}

// ─── Filter DSL ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    And,
    Or,
}

/// One filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Condition {
    /// Equality.
    Must {
        field: String,
        value: serde_json::Value,
    },
    /// Numeric or lexicographic range; any subset of bounds.
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<serde_json::Value>,
    },
    /// String prefix match.
    Prefix { field: String, prefix: String },
    /// Substring match.
    Contains { field: String, substring: String },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Must { field, .. }
            | Condition::Range { field, .. }
            | Condition::Prefix { field, .. }
            | Condition::Contains { field, .. } => field,
        }
    }
}

/// A filter: `and`/`or` over conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub op: FilterOp,
    pub conds: Vec<Condition>,
}

impl Filter {
    pub fn all(conds: Vec<Condition>) -> Self {
        Self {
            op: FilterOp::And,
            conds,
        }
    }

    pub fn any(conds: Vec<Condition>) -> Self {
        Self {
            op: FilterOp::Or,
            conds,
        }
    }
}

/// Query options: filter + ordering + pagination.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<Filter>,
    pub order_by: Option<String>,
    pub order_desc: bool,
    pub limit: usize,
    pub offset: usize,
}

/// Evaluate a filter against a record serialized as a JSON object.
pub(crate) fn matches_filter(record: &serde_json::Value, filter: &Filter) -> bool {
    let check = |cond: &Condition| matches_condition(record, cond);
    match filter.op {
        FilterOp::And => filter.conds.iter().all(check),
        FilterOp::Or => filter.conds.iter().any(check),
    }
}

fn matches_condition(record: &serde_json::Value, cond: &Condition) -> bool {
    let Some(actual) = record.get(cond.field()) else {
        return false;
    };
    match cond {
        Condition::Must { value, .. } => actual == value,
        Condition::Range { gte, gt, lte, lt, .. } => {
            let in_bound = |bound: &Option<serde_json::Value>,
                            ok: fn(std::cmp::Ordering) -> bool| {
                bound
                    .as_ref()
                    .map_or(true, |b| compare_values(actual, b).map_or(false, ok))
            };
            in_bound(gte, |o| o.is_ge())
                && in_bound(gt, |o| o.is_gt())
                && in_bound(lte, |o| o.is_le())
                && in_bound(lt, |o| o.is_lt())
        }
        Condition::Prefix { prefix, .. } => actual
            .as_str()
            .map_or(false, |s| s.starts_with(prefix.as_str())),
        Condition::Contains { substring, .. } => actual
            .as_str()
            .map_or(false, |s| s.contains(substring.as_str())),
    }
}

/// Order two JSON scalars. Numbers compare numerically, strings
/// lexicographically, booleans false-before-true.
pub(crate) fn compare_values(
    a: &serde_json::Value,
    b: &serde_json::Value,
) -> Option<std::cmp::Ordering> {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

/// Reject filters and orderings that name fields outside a collection's
/// schema.
pub(crate) fn validate_fields(opts: &QueryOptions, fields: &[&str]) -> VikingResult<()> {
    if let Some(filter) = &opts.filter {
        for cond in &filter.conds {
            if !fields.contains(&cond.field()) {
                return Err(VikingError::InvalidArgument(format!(
                    "unknown filter field: {}",
                    cond.field()
                )));
            }
        }
    }
    if let Some(order_by) = &opts.order_by {
        if !fields.contains(&order_by.as_str()) {
            return Err(VikingError::InvalidArgument(format!(
                "unknown order field: {order_by}"
            )));
        }
    }
    Ok(())
}

// ─── Store contract ─────────────────────────────────────────────────────────

/// The persistent store: set-like collections with filter queries.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // contexts
    async fn create_context(&self, record: &ContextRecord) -> VikingResult<()>;
    async fn get_context(&self, id: &str) -> VikingResult<ContextRecord>;
    async fn update_context(&self, record: &ContextRecord) -> VikingResult<()>;
    async fn delete_context(&self, id: &str) -> VikingResult<()>;
    async fn query_contexts(&self, opts: QueryOptions) -> VikingResult<Vec<ContextRecord>>;

    // sessions
    async fn create_session(&self, record: &SessionRecord) -> VikingResult<()>;
    async fn get_session(&self, session_id: &str) -> VikingResult<SessionRecord>;
    async fn update_session(&self, record: &SessionRecord) -> VikingResult<()>;
    /// Cascades to the session's messages.
    async fn delete_session(&self, session_id: &str) -> VikingResult<()>;
    async fn query_sessions(&self, opts: QueryOptions) -> VikingResult<Vec<SessionRecord>>;

    // session messages
    async fn create_session_message(&self, record: &SessionMessageRecord) -> VikingResult<()>;
    /// A session's messages in insertion order.
    async fn get_session_messages(
        &self,
        session_id: &str,
    ) -> VikingResult<Vec<SessionMessageRecord>>;
    async fn delete_session_messages(&self, session_id: &str) -> VikingResult<()>;

    // memories
    async fn create_memory(&self, record: &MemoryRecord) -> VikingResult<()>;
    async fn get_memory(&self, id: &str) -> VikingResult<MemoryRecord>;
    async fn update_memory(&self, record: &MemoryRecord) -> VikingResult<()>;
    async fn delete_memory(&self, id: &str) -> VikingResult<()>;
    async fn query_memories(&self, opts: QueryOptions) -> VikingResult<Vec<MemoryRecord>>;

    // files
    async fn create_file(&self, record: &FileRecord) -> VikingResult<()>;
    async fn get_file(&self, id: &str) -> VikingResult<FileRecord>;
    async fn delete_file(&self, id: &str) -> VikingResult<()>;
    async fn query_files(&self, opts: QueryOptions) -> VikingResult<Vec<FileRecord>>;

    // usage
    async fn create_usage(&self, record: &UsageRecord) -> VikingResult<()>;
    async fn query_usage(&self, opts: QueryOptions) -> VikingResult<Vec<UsageRecord>>;

    // relations
    async fn create_relation(&self, record: &RelationRecord) -> VikingResult<()>;
    async fn query_relations(&self, uri: &str) -> VikingResult<Vec<RelationRecord>>;
    async fn delete_relation(&self, id: &str) -> VikingResult<()>;

    // lifecycle
    async fn ping(&self) -> VikingResult<()>;
    /// Must be idempotent.
    async fn close(&self) -> VikingResult<()>;
}
