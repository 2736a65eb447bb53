//! Dense vector storage with cosine search and metadata filtering.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::VikingResult;

use super::embedder::EmbedResult;

/// A scored search hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub uri: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abstract_text: String,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_uri: String,
}

/// A record to index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorRecord {
    pub uri: String,
    pub vector: Vec<f64>,
    #[serde(default)]
    pub abstract_text: String,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default)]
    pub parent_uri: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Vector storage and similarity search.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Cosine search, best first. `filter` matches `parent_uri`, `is_leaf`,
    /// `uri`, or any metadata field by equality.
    async fn search(
        &self,
        query: &EmbedResult,
        limit: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> VikingResult<Vec<SearchResult>>;

    async fn add(&self, records: Vec<VectorRecord>) -> VikingResult<()>;

    async fn delete(&self, uris: &[String]) -> VikingResult<()>;

    /// Release resources. Must be idempotent.
    async fn close(&self) -> VikingResult<()> {
        Ok(())
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let (norm_a, norm_b) = (norm_a.sqrt(), norm_b.sqrt());
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A simple in-memory vector store. Adds are exclusive behind a
/// reader-writer lock; searches overlap.
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
    dimension: usize,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<VectorRecord> {
        self.records.read().unwrap().get(uri).cloned()
    }

    fn matches_filter(
        record: &VectorRecord,
        filter: &HashMap<String, serde_json::Value>,
    ) -> bool {
        filter.iter().all(|(key, expected)| match key.as_str() {
            "parent_uri" => expected.as_str() == Some(record.parent_uri.as_str()),
            "uri" => expected.as_str() == Some(record.uri.as_str()),
            "is_leaf" => expected.as_bool() == Some(record.is_leaf),
            _ => record.metadata.get(key) == Some(expected),
        })
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        query: &EmbedResult,
        limit: usize,
        filter: Option<&HashMap<String, serde_json::Value>>,
    ) -> VikingResult<Vec<SearchResult>> {
        if query.dense.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().unwrap();
        let mut results: Vec<SearchResult> = records
            .values()
            .filter(|r| filter.map_or(true, |f| Self::matches_filter(r, f)))
            .map(|r| SearchResult {
                uri: r.uri.clone(),
                score: cosine_similarity(&query.dense, &r.vector),
                metadata: r.metadata.clone(),
                abstract_text: r.abstract_text.clone(),
                is_leaf: r.is_leaf,
                parent_uri: r.parent_uri.clone(),
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
        Ok(results)
    }

    async fn add(&self, records: Vec<VectorRecord>) -> VikingResult<()> {
        let mut map = self.records.write().unwrap();
        for record in records {
            map.insert(record.uri.clone(), record);
        }
        Ok(())
    }

    async fn delete(&self, uris: &[String]) -> VikingResult<()> {
        let mut map = self.records.write().unwrap();
        for uri in uris {
            map.remove(uri);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(uri: &str, vector: Vec<f64>, parent: &str, is_leaf: bool) -> VectorRecord {
        VectorRecord {
            uri: uri.into(),
            vector,
            abstract_text: format!("abstract of {uri}"),
            is_leaf,
            parent_uri: parent.into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn distance_and_dot() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-9);
        assert!((dot_product(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let store = InMemoryVectorStore::new(2);
        store
            .add(vec![
                record("viking://a", vec![1.0, 0.0], "viking://", true),
                record("viking://b", vec![0.0, 1.0], "viking://", true),
                record("viking://c", vec![0.7, 0.7], "viking://", true),
            ])
            .await
            .unwrap();

        let results = store
            .search(&EmbedResult::dense(vec![1.0, 0.0]), 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].uri, "viking://a");
        assert_eq!(results[1].uri, "viking://c");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn parent_uri_filter() {
        let store = InMemoryVectorStore::new(2);
        store
            .add(vec![
                record("viking://r/one", vec![1.0, 0.0], "viking://r", true),
                record("viking://q/two", vec![1.0, 0.0], "viking://q", true),
            ])
            .await
            .unwrap();

        let mut filter = HashMap::new();
        filter.insert("parent_uri".to_string(), json!("viking://r"));
        let results = store
            .search(&EmbedResult::dense(vec![1.0, 0.0]), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uri, "viking://r/one");
    }

    #[tokio::test]
    async fn metadata_filter() {
        let store = InMemoryVectorStore::new(2);
        let mut rec = record("viking://tagged", vec![1.0, 0.0], "viking://", true);
        rec.metadata.insert("context_type".into(), json!("skill"));
        store
            .add(vec![
                rec,
                record("viking://plain", vec![1.0, 0.0], "viking://", true),
            ])
            .await
            .unwrap();

        let mut filter = HashMap::new();
        filter.insert("context_type".to_string(), json!("skill"));
        let results = store
            .search(&EmbedResult::dense(vec![1.0, 0.0]), 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].uri, "viking://tagged");
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let store = InMemoryVectorStore::new(2);
        store
            .add(vec![record("viking://a", vec![1.0, 0.0], "", true)])
            .await
            .unwrap();
        let results = store.search(&EmbedResult::default(), 10, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn add_upserts_and_delete_removes() {
        let store = InMemoryVectorStore::new(2);
        store
            .add(vec![record("viking://a", vec![1.0, 0.0], "", true)])
            .await
            .unwrap();
        store
            .add(vec![record("viking://a", vec![0.0, 1.0], "", true)])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("viking://a").unwrap().vector, vec![0.0, 1.0]);

        store.delete(&["viking://a".to_string()]).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = InMemoryVectorStore::new(2);
        store.close().await.unwrap();
        store.close().await.unwrap();
    }
}
