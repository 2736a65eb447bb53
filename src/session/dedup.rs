//! Memory deduplication: similarity grouping plus LLM merge decisions.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VikingError, VikingResult};
use crate::llm::{ChatMessage, ChatRequest, Provider};

use super::ExtractedMemory;

/// How to handle one memory within a group of near-duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupDecision {
    /// Fold into the group's merged memory.
    Merge,
    /// Keep as a new unique memory.
    Create,
    /// Drop as a duplicate.
    Delete,
    /// Keep unchanged.
    Keep,
}

/// Deduplicates memories by textual similarity, asking an LLM to decide how
/// each group member is handled. Without a provider (or when the provider
/// fails) a group collapses to its highest-importance member.
pub struct MemoryDeduper {
    provider: Option<Arc<dyn Provider>>,
    threshold: f64,
}

impl MemoryDeduper {
    pub fn new(provider: Option<Arc<dyn Provider>>, threshold: f64) -> Self {
        Self {
            provider,
            threshold: if threshold > 0.0 { threshold } else { 0.8 },
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Deduplicate. The output never exceeds the input in length, and of any
    /// pair at or above the similarity threshold only one representative
    /// survives.
    pub async fn dedup(
        &self,
        memories: Vec<ExtractedMemory>,
    ) -> VikingResult<Vec<ExtractedMemory>> {
        if memories.len() <= 1 {
            return Ok(memories);
        }

        let groups = self.group_similar(memories);
        let mut result = Vec::new();

        for group in groups {
            if group.len() == 1 {
                result.extend(group);
                continue;
            }

            let decisions = match &self.provider {
                Some(provider) => match self.decide(provider.as_ref(), &group).await {
                    Ok(decisions) => decisions,
                    Err(err) => {
                        debug!(error = %err, "dedup decision call failed, falling back");
                        vec![]
                    }
                },
                None => vec![],
            };

            if decisions.is_empty() {
                result.push(highest_importance(group));
            } else {
                result.extend(apply_decisions(group, &decisions));
            }
        }

        Ok(result)
    }

    /// Greedy grouping: a memory joins the first group whose first member is
    /// at least `threshold` similar.
    fn group_similar(&self, memories: Vec<ExtractedMemory>) -> Vec<Vec<ExtractedMemory>> {
        let mut groups: Vec<Vec<ExtractedMemory>> = Vec::new();
        for memory in memories {
            match groups
                .iter_mut()
                .find(|g| jaccard_similarity(&memory.content, &g[0].content) >= self.threshold)
            {
                Some(group) => group.push(memory),
                None => groups.push(vec![memory]),
            }
        }
        groups
    }

    async fn decide(
        &self,
        provider: &dyn Provider,
        group: &[ExtractedMemory],
    ) -> VikingResult<Vec<DedupDecision>> {
        let mut listing = String::new();
        for (i, memory) in group.iter().enumerate() {
            listing.push_str(&format!(
                "[{}] {} (importance: {:.2}, category: {})\n",
                i + 1,
                memory.content,
                memory.importance,
                memory.category
            ));
        }
        let prompt = MERGE_PROMPT.replace("{memories}", &listing);

        let response = provider
            .chat(&ChatRequest {
                model: String::new(),
                temperature: Some(0.3),
                max_tokens: Some(500),
                messages: vec![
                    ChatMessage::system(
                        "You are a memory deduplication assistant. Analyze the \
                         memories and decide how to handle duplicates.",
                    ),
                    ChatMessage::user(prompt),
                ],
                ..Default::default()
            })
            .await?;

        let content = response
            .first_content()
            .ok_or_else(|| VikingError::Provider("dedup returned no choices".into()))?;
        Ok(parse_decisions(content, group.len()))
    }
}

/// Parse one decision per listed memory, line by line. Lines without a
/// recognizable keyword default to `keep`; missing lines pad with `keep`.
pub(crate) fn parse_decisions(response: &str, count: usize) -> Vec<DedupDecision> {
    let mut decisions = Vec::with_capacity(count);
    for line in response.lines() {
        if decisions.len() == count {
            break;
        }
        let lower = line.trim().to_lowercase();
        if lower.is_empty() {
            continue;
        }
        let decision = if lower.starts_with("merge") {
            DedupDecision::Merge
        } else if lower.starts_with("create") {
            DedupDecision::Create
        } else if lower.starts_with("delete") {
            DedupDecision::Delete
        } else if lower.starts_with("keep") {
            DedupDecision::Keep
        } else {
            continue;
        };
        decisions.push(decision);
    }
    decisions.resize(count, DedupDecision::Keep);
    decisions
}

/// Apply per-memory decisions: merge-marked members fold into one memory,
/// create/keep pass through, delete drops.
fn apply_decisions(
    group: Vec<ExtractedMemory>,
    decisions: &[DedupDecision],
) -> Vec<ExtractedMemory> {
    let mut to_merge: Vec<ExtractedMemory> = Vec::new();
    let mut kept: Vec<ExtractedMemory> = Vec::new();

    for (memory, decision) in group.into_iter().zip(decisions) {
        match decision {
            DedupDecision::Merge => to_merge.push(memory),
            DedupDecision::Create | DedupDecision::Keep => kept.push(memory),
            DedupDecision::Delete => {}
        }
    }

    if let Some(mut merged) = to_merge.pop() {
        for memory in to_merge {
            match merge_memories(&merged, &memory) {
                Ok(combined) => merged = combined,
                // cross-category members stay separate
                Err(_) => kept.push(memory),
            }
        }
        kept.insert(0, merged);
    }
    kept
}

fn highest_importance(group: Vec<ExtractedMemory>) -> ExtractedMemory {
    group
        .into_iter()
        .max_by(|a, b| {
            a.importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("group is non-empty")
}

/// Merge two same-category memories. The higher-importance content wins;
/// combined importance is `min(1, 0.9·(a + b))`.
pub fn merge_memories(
    a: &ExtractedMemory,
    b: &ExtractedMemory,
) -> VikingResult<ExtractedMemory> {
    if a.category != b.category {
        return Err(VikingError::InvalidArgument(format!(
            "cannot merge memories of different categories: {} vs {}",
            a.category, b.category
        )));
    }
    let base = if b.importance > a.importance { b } else { a };
    Ok(ExtractedMemory {
        content: base.content.clone(),
        importance: (0.9 * (a.importance + b.importance)).min(1.0),
        category: base.category.clone(),
        session_id: base.session_id.clone(),
        created_at: base.created_at,
    })
}

/// Jaccard similarity over lowercased word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let common = words_a.intersection(&words_b).count();
    let total = words_a.len() + words_b.len() - common;
    if total == 0 {
        return 1.0;
    }
    common as f64 / total as f64
}

const MERGE_PROMPT: &str = r#"Analyze the following memories and decide how to handle duplicates:

{memories}

For each memory, decide whether to:
- merge: Combine this memory with others (keep only the merged version)
- create: Keep this as a new unique memory
- delete: Remove this duplicate memory
- keep: Keep this memory unchanged

Return one decision per memory, in order, one per line, starting with the decision keyword.
Example:
merge
merge
keep
"#;
