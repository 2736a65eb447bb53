//! Context assembly from multiple typed sources.

use std::cmp::Reverse;

use crate::types::{Context, ContextTier, ContextType, TokenCounter};

use super::TieredContext;

/// Merges contexts from memory, resource, and skill sources, deduplicating
/// by URI in source order.
#[derive(Default)]
pub struct ContextBuilder {
    sources: Vec<(ContextType, Vec<Context>)>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_memory_source(mut self, contexts: Vec<Context>) -> Self {
        self.sources.push((ContextType::Memory, contexts));
        self
    }

    pub fn add_resource_source(mut self, contexts: Vec<Context>) -> Self {
        self.sources.push((ContextType::Resource, contexts));
        self
    }

    pub fn add_skill_source(mut self, contexts: Vec<Context>) -> Self {
        self.sources.push((ContextType::Skill, contexts));
        self
    }

    pub fn add_tiered(self, tiers: &TieredContext) -> Self {
        self.add_memory_source(tiers.get_all())
    }

    /// Merge all sources, first occurrence of a URI wins.
    pub fn build(&self) -> Vec<Context> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for (_, contexts) in &self.sources {
            for ctx in contexts {
                if seen.insert(ctx.uri.clone()) {
                    result.push(ctx.clone());
                }
            }
        }
        result
    }

    /// Merge into tier buckets.
    pub fn build_tiered(&self) -> TieredContext {
        let tc = TieredContext::new();
        for ctx in self.build() {
            tc.add(ctx);
        }
        tc
    }

    /// Merge, order by priority (tier ascending, activity descending,
    /// insertion order), and take what fits `max_tokens`. L0 contexts are
    /// always included.
    pub fn build_with_prioritization(
        &self,
        max_tokens: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Context> {
        let mut items: Vec<(Context, usize)> = self
            .build()
            .into_iter()
            .enumerate()
            .map(|(i, c)| (c, i))
            .collect();
        items.sort_by_key(|(c, order)| (c.tier, Reverse(c.active_count), *order));

        let mut result = Vec::new();
        let mut current = 0usize;
        for (ctx, _) in items {
            let tokens = counter.count_tokens(&ctx.abstract_text);
            if current + tokens > max_tokens && ctx.tier != ContextTier::L0 {
                continue;
            }
            current += tokens;
            result.push(ctx);
        }
        result
    }

    /// Merge and render the grouped Markdown block for LLM injection.
    pub fn build_string(&self) -> String {
        format_contexts_for_llm(&self.build())
    }
}

/// Format contexts grouped by type as a Markdown block.
pub fn format_contexts_for_llm(contexts: &[Context]) -> String {
    let mut out = String::new();
    for (context_type, heading) in [
        (ContextType::Memory, "## Memories"),
        (ContextType::Resource, "## Resources"),
        (ContextType::Skill, "## Skills"),
    ] {
        let group: Vec<&Context> = contexts
            .iter()
            .filter(|c| c.context_type == context_type)
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(heading);
        out.push_str("\n\n");
        for ctx in group {
            out.push_str(&format!("### {}\n", ctx.uri));
            if !ctx.abstract_text.is_empty() {
                out.push_str(&ctx.abstract_text);
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out
}
