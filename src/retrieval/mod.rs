//! Context retrieval: semantic search, hybrid ranking, and hierarchical
//! directory traversal with a full decision trajectory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ContextType;

mod embedder;
mod hybrid;
mod keyword;
mod retriever;
mod trajectory;
mod vector_store;

pub use embedder::{Embedder, EmbedResult, HashingEmbedder};
pub use hybrid::{
    combine_scores, ContextHotness, HotnessConfig, HotnessScorer, HybridRetriever, HybridSearch,
    Reranker, SemanticSearch,
};
pub use keyword::{tokenize, Bm25Index, KeywordSearch};
pub use retriever::{HierarchicalRetriever, RetrievalResult, RetrieverConfig};
pub use trajectory::{
    ThinkingTrace, TraceEvent, TraceEventType, TraceStatistics, Trajectory, TrajectoryLogger,
    TrajectoryNode,
};
pub use vector_store::{
    cosine_similarity, dot_product, euclidean_distance, InMemoryVectorStore, SearchResult,
    VectorRecord, VectorStore,
};

/// Retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverMode {
    #[default]
    Thinking,
    Quick,
}

/// A query targeting a specific context type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedQuery {
    pub query: String,
    pub context_type: ContextType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub intent: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_directories: Vec<String>,
}

impl TypedQuery {
    pub fn new(query: impl Into<String>, context_type: ContextType) -> Self {
        Self {
            query: query.into(),
            context_type,
            intent: String::new(),
            priority: 0,
            target_directories: Vec::new(),
        }
    }
}

/// Options for a retrieval operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    pub mode: RetrieverMode,
    pub score_threshold: f64,
    /// Apply the threshold as `>=` instead of `>`.
    pub score_gte: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_directories: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata_filter: HashMap<String, serde_json::Value>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            mode: RetrieverMode::Thinking,
            score_threshold: 0.0,
            score_gte: false,
            target_directories: Vec::new(),
            metadata_filter: HashMap::new(),
        }
    }
}

/// One matched context from retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedContext {
    pub uri: String,
    pub context_type: ContextType,
    pub is_leaf: bool,
    pub abstract_text: String,
    pub score: f64,
}

/// The result of a single typed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: TypedQuery,
    pub matched_contexts: Vec<MatchedContext>,
    pub searched_directories: Vec<String>,
    pub thinking_trace: ThinkingTrace,
}

/// Default traversal roots for a context type.
pub fn root_uris_for_type(context_type: ContextType) -> Vec<String> {
    match context_type {
        ContextType::Memory => vec![
            "viking://user/memories".into(),
            "viking://agent/memories".into(),
        ],
        ContextType::Resource => vec!["viking://resources".into()],
        ContextType::Skill => vec!["viking://agent/skills".into()],
    }
}
