//! Hierarchical retrieval: a score-propagating best-first traversal of the
//! AGFS namespace, seeded by global vector search, with convergence
//! detection and a full decision trajectory.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{VikingError, VikingResult};

use super::embedder::{EmbedResult, Embedder};
use super::trajectory::{ThinkingTrace, TraceEventType, Trajectory, TrajectoryLogger};
use super::vector_store::{SearchResult, VectorStore};
use super::{root_uris_for_type, MatchedContext, QueryResult, SearchOptions, TypedQuery};

/// Retriever tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    /// Stop after this many rounds with an unchanged top-k.
    pub max_convergence_rounds: u32,
    /// Score propagation coefficient: `final = α·child + (1 − α)·parent`.
    pub score_propagation_alpha: f64,
    /// Number of global vector hits used to seed the frontier.
    pub global_search_top_k: usize,
    /// Default score threshold.
    pub score_threshold: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_convergence_rounds: 3,
            score_propagation_alpha: 0.5,
            global_search_top_k: 3,
            score_threshold: 0.0,
        }
    }
}

/// One collected candidate.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub uri: String,
    pub score: f64,
    pub is_leaf: bool,
    pub abstract_text: String,
}

/// Frontier entry: a max-heap keyed by score, ties broken by insertion
/// order so convergence detection stays deterministic.
struct HeapEntry {
    score: f64,
    seq: u64,
    uri: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Recursive score-propagating retriever over a vector-indexed AGFS.
pub struct HierarchicalRetriever {
    config: RetrieverConfig,
    embedder: Option<Arc<dyn Embedder>>,
    store: Arc<dyn VectorStore>,
    trajectories: TrajectoryLogger,
}

impl HierarchicalRetriever {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        store: Arc<dyn VectorStore>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
            trajectories: TrajectoryLogger::new(),
        }
    }

    /// The trajectory recorded for a given query, if any.
    pub fn trajectory(&self, query: &str) -> Option<Arc<Trajectory>> {
        self.trajectories.get(query)
    }

    /// Perform hierarchical retrieval. Cancellation is checked once per
    /// popped directory; on cancellation mid-traversal the candidates
    /// collected so far are returned with the trace noting the abort.
    pub async fn retrieve(
        &self,
        query: TypedQuery,
        opts: SearchOptions,
        cancel: &CancellationToken,
    ) -> VikingResult<QueryResult> {
        if cancel.is_cancelled() {
            return Err(VikingError::Cancelled);
        }

        let trajectory = self.trajectories.create(&query.query);
        let mut trace = ThinkingTrace::new();

        let target_dirs = if opts.target_directories.is_empty() {
            root_uris_for_type(query.context_type)
        } else {
            opts.target_directories.clone()
        };

        trace.add_event(
            TraceEventType::SearchDirectoryStart,
            format!("Starting retrieval for query: {}", query.query),
            data(&[
                ("target_directories", json!(target_dirs)),
                ("context_type", json!(query.context_type)),
            ]),
            &query.query,
        );

        // An empty query yields an empty result with a start and a summary
        // event only.
        if query.query.is_empty() {
            trace.add_event(
                TraceEventType::SearchSummary,
                "Empty query, nothing to retrieve",
                data(&[("total_results", json!(0))]),
                &query.query,
            );
            return Ok(QueryResult {
                query,
                matched_contexts: Vec::new(),
                searched_directories: target_dirs,
                thinking_trace: trace,
            });
        }

        let query_vector = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&query.query).await?),
            None => None,
        };

        let seeds = self.global_seeds(query_vector.as_ref(), &opts).await;
        let starting_points = merge_starting_points(&target_dirs, &seeds);

        let candidates = self
            .recursive_search(
                &query.query,
                query_vector.as_ref(),
                starting_points,
                &opts,
                &trajectory,
                &mut trace,
                cancel,
            )
            .await;

        let matched = to_matched_contexts(candidates, &query);

        let stats = trace.statistics();
        trace.add_event(
            TraceEventType::SearchSummary,
            format!("Retrieval complete, found {} results", matched.len()),
            data(&[
                ("total_results", json!(matched.len())),
                ("searched_dirs", json!(target_dirs.len())),
                ("statistics", serde_json::to_value(&stats)?),
            ]),
            &query.query,
        );
        debug!(
            query = %query.query,
            results = matched.len(),
            directories = stats.directories_searched,
            "retrieval finished"
        );

        Ok(QueryResult {
            query,
            matched_contexts: matched,
            searched_directories: target_dirs,
            thinking_trace: trace,
        })
    }

    async fn global_seeds(
        &self,
        query_vector: Option<&EmbedResult>,
        opts: &SearchOptions,
    ) -> Vec<SearchResult> {
        let Some(vector) = query_vector else {
            return Vec::new();
        };
        let filter = (!opts.metadata_filter.is_empty()).then_some(&opts.metadata_filter);
        self.store
            .search(vector, self.config.global_search_top_k, filter)
            .await
            .unwrap_or_default()
    }

    #[allow(clippy::too_many_arguments)]
    async fn recursive_search(
        &self,
        query: &str,
        query_vector: Option<&EmbedResult>,
        starting_points: Vec<(String, f64)>,
        opts: &SearchOptions,
        trajectory: &Trajectory,
        trace: &mut ThinkingTrace,
        cancel: &CancellationToken,
    ) -> Vec<RetrievalResult> {
        let alpha = self.config.score_propagation_alpha;
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;
        for (uri, score) in starting_points {
            heap.push(HeapEntry { score, seq, uri });
            seq += 1;
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut collected: Vec<RetrievalResult> = Vec::new();
        let mut collected_uris: HashSet<String> = HashSet::new();
        let mut prev_top_k: HashSet<String> = HashSet::new();
        let mut convergence_rounds = 0u32;
        let mut depth = 0usize;

        while let Some(entry) = heap.pop() {
            if cancel.is_cancelled() {
                trace.add_event(
                    TraceEventType::SearchSummary,
                    "Retrieval cancelled, returning partial results",
                    data(&[("collected", json!(collected.len()))]),
                    query,
                );
                break;
            }

            let current_uri = entry.uri;
            let current_score = entry.score;
            if !visited.insert(current_uri.clone()) {
                continue;
            }

            trajectory.add_node(&current_uri, depth, current_score);
            trace.add_event(
                TraceEventType::SearchDirectoryStart,
                format!("Searching directory: {current_uri}"),
                data(&[("uri", json!(current_uri)), ("score", json!(current_score))]),
                query,
            );

            let children = self
                .search_children(&current_uri, query_vector, opts)
                .await;
            trace.add_event(
                TraceEventType::SearchDirectoryResult,
                format!("{} children under {current_uri}", children.len()),
                data(&[("uri", json!(current_uri)), ("count", json!(children.len()))]),
                query,
            );

            for child in children {
                let final_score = alpha * child.score + (1.0 - alpha) * current_score;

                let passes = if opts.score_gte {
                    final_score >= opts.score_threshold
                } else {
                    final_score > opts.score_threshold
                };
                if !passes {
                    trace.add_event(
                        TraceEventType::CandidateExcluded,
                        format!(
                            "Excluded {} (score {final_score:.4} below threshold {:.4})",
                            child.uri, opts.score_threshold
                        ),
                        data(&[
                            ("uri", json!(child.uri)),
                            ("score", json!(final_score)),
                            ("reason", json!("below_threshold")),
                        ]),
                        query,
                    );
                    continue;
                }

                if collected_uris.insert(child.uri.clone()) {
                    collected.push(RetrievalResult {
                        uri: child.uri.clone(),
                        score: final_score,
                        is_leaf: child.is_leaf,
                        abstract_text: child.abstract_text.clone(),
                    });
                    trace.add_event(
                        TraceEventType::CandidateSelected,
                        format!("Added {} to candidates (score: {final_score:.4})", child.uri),
                        data(&[("uri", json!(child.uri)), ("score", json!(final_score))]),
                        query,
                    );
                }

                if !child.is_leaf {
                    heap.push(HeapEntry {
                        score: final_score,
                        seq,
                        uri: child.uri.clone(),
                    });
                    seq += 1;
                    trajectory.add_edge(&current_uri, &child.uri);
                    trace.add_event(
                        TraceEventType::DirectoryQueued,
                        format!("Queued subdirectory: {}", child.uri),
                        data(&[("uri", json!(child.uri)), ("score", json!(final_score))]),
                        query,
                    );
                }
            }

            // Convergence: a stable top-k of full size across rounds.
            let current_top_k = top_k_uris(&collected, opts.limit);
            if current_top_k == prev_top_k && current_top_k.len() >= opts.limit {
                convergence_rounds += 1;
                trace.add_event(
                    TraceEventType::ConvergenceCheck,
                    format!("Convergence round {convergence_rounds}"),
                    data(&[
                        ("round", json!(convergence_rounds)),
                        ("topk_size", json!(current_top_k.len())),
                    ]),
                    query,
                );
                if convergence_rounds >= self.config.max_convergence_rounds {
                    trace.add_event(
                        TraceEventType::SearchConverged,
                        "Search converged",
                        data(&[
                            ("rounds", json!(convergence_rounds)),
                            ("total_found", json!(collected.len())),
                        ]),
                        query,
                    );
                    break;
                }
            } else {
                convergence_rounds = 0;
            }
            prev_top_k = current_top_k;
            depth += 1;
        }

        collected.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
        });
        collected.truncate(opts.limit);
        collected
    }

    async fn search_children(
        &self,
        parent_uri: &str,
        query_vector: Option<&EmbedResult>,
        opts: &SearchOptions,
    ) -> Vec<SearchResult> {
        let Some(vector) = query_vector else {
            return Vec::new();
        };
        let mut filter = opts.metadata_filter.clone();
        filter.insert("parent_uri".to_string(), json!(parent_uri));
        self.store
            .search(vector, opts.limit * 2, Some(&filter))
            .await
            .unwrap_or_default()
    }
}

fn merge_starting_points(
    root_uris: &[String],
    global_results: &[SearchResult],
) -> Vec<(String, f64)> {
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for result in global_results {
        if seen.insert(result.uri.clone()) {
            points.push((result.uri.clone(), result.score));
        }
    }
    for uri in root_uris {
        if seen.insert(uri.clone()) {
            points.push((uri.clone(), 0.0));
        }
    }
    points
}

/// The URIs of the current best `k` candidates by score, ties resolved by
/// collection order.
fn top_k_uris(collected: &[RetrievalResult], k: usize) -> HashSet<String> {
    let mut sorted: Vec<&RetrievalResult> = collected.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    sorted.into_iter().take(k).map(|r| r.uri.clone()).collect()
}

fn to_matched_contexts(candidates: Vec<RetrievalResult>, query: &TypedQuery) -> Vec<MatchedContext> {
    candidates
        .into_iter()
        .map(|c| MatchedContext {
            uri: c.uri,
            context_type: query.context_type,
            is_leaf: c.is_leaf,
            abstract_text: c.abstract_text,
            score: c.score,
        })
        .collect()
}

fn data(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
