//! Retrieval observability: per-query trajectories and thinking traces.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A visited URI in the traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryNode {
    pub uri: String,
    pub depth: usize,
    pub score: f64,
    /// Seconds since the trajectory started.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

#[derive(Debug, Default)]
struct TrajectoryInner {
    nodes: HashMap<String, TrajectoryNode>,
    path: Vec<String>,
    parents: HashMap<String, String>,
}

/// The append-only record of one retrieval's traversal. Each retrieval gets
/// its own trajectory, so lock contention is absent in practice.
pub struct Trajectory {
    root_uri: String,
    started_at: DateTime<Utc>,
    start: Instant,
    inner: RwLock<TrajectoryInner>,
}

impl Trajectory {
    pub fn new(root_uri: impl Into<String>) -> Self {
        Self {
            root_uri: root_uri.into(),
            started_at: Utc::now(),
            start: Instant::now(),
            inner: RwLock::new(TrajectoryInner::default()),
        }
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn add_node(&self, uri: &str, depth: usize, score: f64) {
        let mut inner = self.inner.write().unwrap();
        inner.nodes.insert(
            uri.to_string(),
            TrajectoryNode {
                uri: uri.to_string(),
                depth,
                score,
                timestamp: self.start.elapsed().as_secs_f64(),
                children: Vec::new(),
            },
        );
        inner.path.push(uri.to_string());
    }

    pub fn add_edge(&self, parent_uri: &str, child_uri: &str) {
        let mut inner = self.inner.write().unwrap();
        inner
            .parents
            .insert(child_uri.to_string(), parent_uri.to_string());
        if let Some(node) = inner.nodes.get_mut(parent_uri) {
            node.children.push(child_uri.to_string());
        }
    }

    /// Visited URIs in visit order.
    pub fn path(&self) -> Vec<String> {
        self.inner.read().unwrap().path.clone()
    }

    pub fn node(&self, uri: &str) -> Option<TrajectoryNode> {
        self.inner.read().unwrap().nodes.get(uri).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    /// Ancestors of a URI via parent edges, root first.
    pub fn ancestors(&self, uri: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let mut ancestors = Vec::new();
        let mut current = uri;
        while let Some(parent) = inner.parents.get(current) {
            ancestors.push(parent.clone());
            current = parent;
        }
        ancestors.reverse();
        ancestors
    }
}

/// Keeps trajectories addressable by their root query.
#[derive(Default)]
pub struct TrajectoryLogger {
    trajectories: RwLock<HashMap<String, std::sync::Arc<Trajectory>>>,
}

impl TrajectoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, root_uri: &str) -> std::sync::Arc<Trajectory> {
        let trajectory = std::sync::Arc::new(Trajectory::new(root_uri));
        self.trajectories
            .write()
            .unwrap()
            .insert(root_uri.to_string(), trajectory.clone());
        trajectory
    }

    pub fn get(&self, root_uri: &str) -> Option<std::sync::Arc<Trajectory>> {
        self.trajectories.read().unwrap().get(root_uri).cloned()
    }

    pub fn len(&self) -> usize {
        self.trajectories.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.read().unwrap().is_empty()
    }
}

// ─── Thinking trace ─────────────────────────────────────────────────────────

/// Types of trace events emitted during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    SearchDirectoryStart,
    SearchDirectoryResult,
    EmbeddingScores,
    RerankScores,
    CandidateSelected,
    CandidateExcluded,
    DirectoryQueued,
    ConvergenceCheck,
    SearchConverged,
    SearchSummary,
}

/// One trace event with a timestamp relative to query start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_type: TraceEventType,
    /// Seconds since the trace started.
    pub timestamp: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query_id: String,
}

/// Aggregate statistics over a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStatistics {
    pub total_events: usize,
    pub duration_seconds: f64,
    pub directories_searched: usize,
    pub candidates_collected: usize,
    pub candidates_excluded: usize,
    pub convergence_rounds: u32,
}

/// The decision record of one retrieval, event by event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingTrace {
    pub started_at: DateTime<Utc>,
    pub events: Vec<TraceEvent>,
    #[serde(skip, default = "Instant::now")]
    start: Instant,
}

impl ThinkingTrace {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            events: Vec::new(),
            start: Instant::now(),
        }
    }

    pub fn add_event(
        &mut self,
        event_type: TraceEventType,
        message: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
        query_id: &str,
    ) {
        self.events.push(TraceEvent {
            event_type,
            timestamp: self.start.elapsed().as_secs_f64(),
            message: message.into(),
            data,
            query_id: query_id.to_string(),
        });
    }

    pub fn statistics(&self) -> TraceStatistics {
        let mut stats = TraceStatistics {
            total_events: self.events.len(),
            ..Default::default()
        };
        if let Some(last) = self.events.last() {
            stats.duration_seconds = last.timestamp;
        }
        for event in &self.events {
            match event.event_type {
                TraceEventType::SearchDirectoryResult => stats.directories_searched += 1,
                TraceEventType::CandidateSelected => stats.candidates_collected += 1,
                TraceEventType::CandidateExcluded => stats.candidates_excluded += 1,
                TraceEventType::ConvergenceCheck => {
                    if let Some(round) =
                        event.data.get("round").and_then(|v| v.as_u64())
                    {
                        stats.convergence_rounds = round as u32;
                    }
                }
                _ => {}
            }
        }
        stats
    }
}

impl Default for ThinkingTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn trajectory_records_path_in_order() {
        let t = Trajectory::new("viking://resources");
        t.add_node("viking://resources", 0, 0.0);
        t.add_node("viking://resources/docs", 1, 0.8);
        assert_eq!(
            t.path(),
            vec!["viking://resources", "viking://resources/docs"]
        );
        assert_eq!(t.node_count(), 2);
        let node = t.node("viking://resources/docs").unwrap();
        assert_eq!(node.depth, 1);
        assert!(node.score > 0.7);
    }

    #[test]
    fn edges_build_ancestry() {
        let t = Trajectory::new("viking://r");
        t.add_node("viking://r", 0, 0.0);
        t.add_node("viking://r/a", 1, 0.5);
        t.add_node("viking://r/a/b", 2, 0.4);
        t.add_edge("viking://r", "viking://r/a");
        t.add_edge("viking://r/a", "viking://r/a/b");

        assert_eq!(
            t.ancestors("viking://r/a/b"),
            vec!["viking://r", "viking://r/a"]
        );
        assert!(t.ancestors("viking://r").is_empty());
        assert_eq!(t.node("viking://r").unwrap().children, vec!["viking://r/a"]);
    }

    #[test]
    fn logger_registers_and_finds() {
        let logger = TrajectoryLogger::new();
        assert!(logger.is_empty());
        logger.create("query one");
        assert_eq!(logger.len(), 1);
        assert!(logger.get("query one").is_some());
        assert!(logger.get("other").is_none());
    }

    #[test]
    fn trace_events_have_relative_timestamps() {
        let mut trace = ThinkingTrace::new();
        trace.add_event(TraceEventType::SearchDirectoryStart, "start", data(&[]), "q");
        trace.add_event(TraceEventType::SearchSummary, "done", data(&[]), "q");
        assert_eq!(trace.events.len(), 2);
        assert!(trace.events[0].timestamp <= trace.events[1].timestamp);
    }

    #[test]
    fn statistics_count_by_type() {
        let mut trace = ThinkingTrace::new();
        trace.add_event(TraceEventType::SearchDirectoryResult, "", data(&[]), "q");
        trace.add_event(TraceEventType::CandidateSelected, "", data(&[]), "q");
        trace.add_event(TraceEventType::CandidateSelected, "", data(&[]), "q");
        trace.add_event(TraceEventType::CandidateExcluded, "", data(&[]), "q");
        trace.add_event(
            TraceEventType::ConvergenceCheck,
            "",
            data(&[("round", json!(2))]),
            "q",
        );

        let stats = trace.statistics();
        assert_eq!(stats.total_events, 5);
        assert_eq!(stats.directories_searched, 1);
        assert_eq!(stats.candidates_collected, 2);
        assert_eq!(stats.candidates_excluded, 1);
        assert_eq!(stats.convergence_rounds, 2);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&TraceEventType::CandidateExcluded).unwrap();
        assert_eq!(json, "\"candidate_excluded\"");
    }
}
