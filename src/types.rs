use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Generate an opaque 128-bit id rendered as lowercase hex.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate an id with a prefix, e.g. `sess_<hex>`.
pub fn generate_id_with_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        generate_id()
    } else {
        format!("{prefix}_{}", generate_id())
    }
}

// ─── Context entity ─────────────────────────────────────────────────────────

/// The type of a context entry, derived from its URI prefix when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Skill,
    Memory,
    Resource,
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextType::Skill => write!(f, "skill"),
            ContextType::Memory => write!(f, "memory"),
            ContextType::Resource => write!(f, "resource"),
        }
    }
}

/// Directory-level memory category (memory contexts only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Patterns,
    Cases,
    Profile,
    Preferences,
    Entities,
    Events,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Patterns => "patterns",
            Category::Cases => "cases",
            Category::Profile => "profile",
            Category::Preferences => "preferences",
            Category::Entities => "entities",
            Category::Events => "events",
        };
        write!(f, "{s}")
    }
}

/// Priority tier of a context. Lower is more important.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ContextTier {
    /// Essential context, always loaded.
    L0,
    /// Loaded on demand.
    #[default]
    L1,
    /// Archive, loaded when needed.
    L2,
}

/// Vectorization payload attached to a context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vectorize {
    pub text: String,
}

/// A unified context entry for all context types — one node in the agent's
/// knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uri: Option<String>,
    pub is_leaf: bool,
    pub abstract_text: String,
    pub context_type: ContextType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_uri: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f64>,
    #[serde(default)]
    pub vectorize: Vectorize,
    pub tier: ContextTier,
}

impl Context {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let now = Utc::now();
        Self {
            id: generate_id(),
            context_type: derive_context_type(&uri),
            category: derive_category(&uri),
            uri,
            parent_uri: None,
            is_leaf: false,
            abstract_text: String::new(),
            created_at: now,
            updated_at: now,
            active_count: 0,
            related_uri: Vec::new(),
            meta: HashMap::new(),
            session_id: None,
            user_id: None,
            vector: Vec::new(),
            vectorize: Vectorize::default(),
            tier: ContextTier::L1,
        }
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    pub fn with_tier(mut self, tier: ContextTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_parent(mut self, parent_uri: impl Into<String>) -> Self {
        self.parent_uri = Some(parent_uri.into());
        self
    }

    pub fn leaf(mut self) -> Self {
        self.is_leaf = true;
        self
    }

    /// Record a retrieval touch. `active_count` only ever grows.
    pub fn update_activity(&mut self) {
        self.active_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn vectorization_text(&self) -> &str {
        if self.vectorize.text.is_empty() {
            &self.abstract_text
        } else {
            &self.vectorize.text
        }
    }
}

/// Derive the context type from a URI prefix.
pub fn derive_context_type(uri: &str) -> ContextType {
    if uri.starts_with("viking://agent/skills") {
        ContextType::Skill
    } else if uri.contains("memories") {
        ContextType::Memory
    } else {
        ContextType::Resource
    }
}

/// Derive the memory category from a URI prefix. Non-memory URIs yield `None`.
pub fn derive_category(uri: &str) -> Option<Category> {
    if uri.starts_with("viking://agent/memories") {
        if uri.contains("patterns") {
            return Some(Category::Patterns);
        }
        if uri.contains("cases") {
            return Some(Category::Cases);
        }
    }
    if uri.starts_with("viking://user/memories") {
        if uri.contains("profile") {
            return Some(Category::Profile);
        }
        if uri.contains("preferences") {
            return Some(Category::Preferences);
        }
        if uri.contains("entities") {
            return Some(Category::Entities);
        }
        if uri.contains("events") {
            return Some(Category::Events);
        }
    }
    None
}

// ─── Token counting ─────────────────────────────────────────────────────────

/// Estimates the token cost of a string.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Character-length estimation: ~4 characters per token, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenCounter;

impl SimpleTokenCounter {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        (text.len() + 3) / 4
    }
}
