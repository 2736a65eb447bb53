//! Hybrid ranking: vector + BM25 fusion, hotness bias, and reranking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VikingResult;

use super::embedder::Embedder;
use super::keyword::{tokenize, Bm25Index, KeywordSearch};
use super::vector_store::{SearchResult, VectorStore};

/// Vector search through an embedder + store pair.
pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> VikingResult<Vec<SearchResult>> {
        let embedded = self.embedder.embed(query).await?;
        self.store.search(&embedded, limit, filter).await
    }

    pub async fn search_batch(
        &self,
        queries: &[String],
        limit: usize,
    ) -> VikingResult<Vec<Vec<SearchResult>>> {
        let embedded = self.embedder.embed_batch(queries).await?;
        let mut results = Vec::with_capacity(embedded.len());
        for query in &embedded {
            results.push(self.store.search(query, limit, None).await?);
        }
        Ok(results)
    }
}

// ─── RRF fusion ─────────────────────────────────────────────────────────────

const RRF_K: f64 = 60.0;

/// Combines semantic and BM25 rankings with Reciprocal Rank Fusion, then
/// max-normalizes scores to `[0, 1]`.
pub struct HybridSearch {
    semantic: Option<SemanticSearch>,
    keyword: KeywordSearch,
    index: RwLock<Bm25Index>,
}

impl HybridSearch {
    pub fn new(semantic: Option<SemanticSearch>) -> Self {
        Self {
            semantic,
            keyword: KeywordSearch::new(),
            index: RwLock::new(Bm25Index::new()),
        }
    }

    /// Index document abstracts for the keyword side.
    pub fn index_documents(&self, documents: &[SearchResult]) {
        let mut index = self.index.write().unwrap();
        for doc in documents {
            index.add_document(&doc.uri, &doc.abstract_text);
        }
        index.build_idf();
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> VikingResult<Vec<SearchResult>> {
        let semantic_results = match &self.semantic {
            Some(semantic) => semantic.search(query, limit * 2, filter).await?,
            None => Vec::new(),
        };

        let keyword_results = {
            let index = self.index.read().unwrap();
            if index.total_docs() > 0 {
                self.keyword.search(query, &index, limit * 2)
            } else {
                Vec::new()
            }
        };

        let mut combined = rrf_merge(&semantic_results, &keyword_results, limit);
        normalize_scores(&mut combined);
        Ok(combined)
    }
}

/// Reciprocal Rank Fusion: `score(uri) = Σ 1/(rank + 60)` across both lists.
fn rrf_merge(
    semantic: &[SearchResult],
    keyword: &[SearchResult],
    limit: usize,
) -> Vec<SearchResult> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (rank, result) in semantic.iter().enumerate() {
        *scores.entry(result.uri.as_str()).or_insert(0.0) += 1.0 / (rank as f64 + RRF_K);
    }
    for (rank, result) in keyword.iter().enumerate() {
        *scores.entry(result.uri.as_str()).or_insert(0.0) += 1.0 / (rank as f64 + RRF_K);
    }

    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .map(|(uri, score)| SearchResult {
            uri: uri.to_string(),
            score,
            ..Default::default()
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.uri.cmp(&b.uri))
    });
    if limit > 0 && results.len() > limit {
        results.truncate(limit);
    }
    results
}

/// Divide every score by the maximum.
fn normalize_scores(results: &mut [SearchResult]) {
    let Some(max) = results.first().map(|r| r.score) else {
        return;
    };
    if max == 0.0 {
        return;
    }
    for result in results.iter_mut() {
        result.score /= max;
    }
}

// ─── Hotness ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HotnessConfig {
    /// Weight of the hotness component in the final mix.
    pub alpha: f64,
    /// Half-life for recency decay, in days.
    pub half_life_days: f64,
}

impl Default for HotnessConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            half_life_days: 7.0,
        }
    }
}

/// Hotness data for a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHotness {
    pub context_id: String,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub hotness_score: f64,
}

/// Combines access frequency (sigmoid) and recency (exponential decay) into
/// a `[0, 1]` hotness score.
pub struct HotnessScorer {
    config: HotnessConfig,
}

impl HotnessScorer {
    pub fn new(config: HotnessConfig) -> Self {
        Self { config }
    }

    pub fn calculate_hotness(&self, access_count: u64, last_access: DateTime<Utc>) -> f64 {
        let frequency = sigmoid(access_count as f64);
        let recency = self.exponential_decay(last_access);
        (frequency + recency) / 2.0
    }

    fn exponential_decay(&self, last_access: DateTime<Utc>) -> f64 {
        let hours_since = (Utc::now() - last_access).num_seconds().max(0) as f64 / 3600.0;
        let half_life_hours = self.config.half_life_days * 24.0;
        let decay = (-std::f64::consts::LN_2 * hours_since / half_life_hours).exp();
        decay.clamp(0.0, 1.0)
    }

    /// `final = (1 − α)·semantic + α·hotness`.
    pub fn hybrid_score(&self, semantic_score: f64, hotness_score: f64) -> f64 {
        combine_scores(semantic_score, hotness_score, self.config.alpha)
    }

    pub fn update_hotness(&self, hotness: &mut ContextHotness) {
        hotness.hotness_score =
            self.calculate_hotness(hotness.access_count, hotness.last_access);
    }
}

/// Sigmoid centered at 3 accesses, so rarely-touched contexts score low.
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-(x - 3.0)).exp())
}

/// `(1 − α)·semantic + α·hotness` with α clamped to `[0, 1]`.
pub fn combine_scores(semantic_score: f64, hotness_score: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    (1.0 - alpha) * semantic_score + alpha * hotness_score
}

// ─── Hotness-biased retrieval ───────────────────────────────────────────────

/// Semantic retrieval biased by a hotness score.
pub struct HybridRetriever {
    semantic: SemanticSearch,
    scorer: HotnessScorer,
}

impl HybridRetriever {
    pub fn new(semantic: SemanticSearch, scorer: HotnessScorer) -> Self {
        Self { semantic, scorer }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        access_count: u64,
        last_access: DateTime<Utc>,
        limit: usize,
    ) -> VikingResult<Vec<SearchResult>> {
        let mut results = self.semantic.search(query, limit * 2, None).await?;
        let hotness = self.scorer.calculate_hotness(access_count, last_access);

        for result in &mut results {
            result.score = self.scorer.hybrid_score(result.score, hotness);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if limit > 0 && results.len() > limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Hybrid retrieval at `3 × limit`, reranked, then truncated.
    pub async fn retrieve_with_rerank(
        &self,
        query: &str,
        access_count: u64,
        last_access: DateTime<Utc>,
        limit: usize,
        reranker: &Reranker,
    ) -> VikingResult<Vec<SearchResult>> {
        let results = self
            .retrieve(query, access_count, last_access, limit * 3)
            .await?;
        let mut reranked = reranker.rerank(query, results);
        if limit > 0 && reranked.len() > limit {
            reranked.truncate(limit);
        }
        Ok(reranked)
    }
}

// ─── Reranking ──────────────────────────────────────────────────────────────

/// Cross-encoder-style score adjustment:
/// `final = 0.5·prior + 0.5·relevance`, where relevance is the fraction of
/// query tokens present in the candidate's abstract.
pub struct Reranker {
    enabled: bool,
}

impl Reranker {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rerank(&self, query: &str, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        if !self.enabled || results.is_empty() {
            return results;
        }
        for result in &mut results {
            let relevance = relevance(query, &result.abstract_text);
            result.score = result.score * 0.5 + relevance * 0.5;
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }
}

fn relevance(query: &str, content: &str) -> f64 {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms: std::collections::HashSet<String> =
        tokenize(content).into_iter().collect();
    let matched = query_terms
        .iter()
        .filter(|t| content_terms.contains(*t))
        .count();
    matched as f64 / query_terms.len() as f64
}
