//! Tiered context and the token-budgeted window.
//!
//! Contexts live in three priority buckets (L0 essential, L1 on demand, L2
//! archive). The window guarantees that whatever it surfaces fits a hard
//! token budget, evicting L2 first, then L1; L0 is protected up to a
//! configured retention floor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VikingError, VikingResult};
use crate::types::{Context, ContextTier, ContextType, SimpleTokenCounter, TokenCounter};

mod builder;
mod compression;

pub use builder::{format_contexts_for_llm, ContextBuilder};
pub use compression::{
    calculate_stats, compress_text, compress_with_level, decompress_text, is_compressed,
    summarize_text, truncate_text, CompressionLevel, CompressionStats,
};

// ─── TieredContext ──────────────────────────────────────────────────────────

#[derive(Default)]
struct TierBuckets {
    l0: Vec<Context>,
    l1: Vec<Context>,
    l2: Vec<Context>,
}

impl TierBuckets {
    fn bucket_mut(&mut self, tier: ContextTier) -> &mut Vec<Context> {
        match tier {
            ContextTier::L0 => &mut self.l0,
            ContextTier::L1 => &mut self.l1,
            ContextTier::L2 => &mut self.l2,
        }
    }

    fn bucket(&self, tier: ContextTier) -> &Vec<Context> {
        match tier {
            ContextTier::L0 => &self.l0,
            ContextTier::L1 => &self.l1,
            ContextTier::L2 => &self.l2,
        }
    }

    fn iter_all(&self) -> impl Iterator<Item = &Context> {
        self.l0.iter().chain(self.l1.iter()).chain(self.l2.iter())
    }
}

/// Contexts organized by tier. No context appears in more than one tier.
pub struct TieredContext {
    buckets: RwLock<TierBuckets>,
}

impl TieredContext {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(TierBuckets::default()),
        }
    }

    /// Add a context to the bucket its `tier` field names.
    pub fn add(&self, ctx: Context) {
        let mut buckets = self.buckets.write().unwrap();
        buckets.bucket_mut(ctx.tier).push(ctx);
    }

    pub fn get_by_tier(&self, tier: ContextTier) -> Vec<Context> {
        self.buckets.read().unwrap().bucket(tier).clone()
    }

    /// All contexts in tier order (L0, L1, L2), each tier in internal order.
    pub fn get_all(&self) -> Vec<Context> {
        self.buckets.read().unwrap().iter_all().cloned().collect()
    }

    pub fn get_by_uri(&self, uri: &str) -> Option<Context> {
        self.buckets
            .read()
            .unwrap()
            .iter_all()
            .find(|c| c.uri == uri)
            .cloned()
    }

    pub fn contexts_by_type(&self, context_type: ContextType) -> Vec<Context> {
        self.buckets
            .read()
            .unwrap()
            .iter_all()
            .filter(|c| c.context_type == context_type)
            .cloned()
            .collect()
    }

    /// Remove a context by URI from whichever tier holds it.
    pub fn remove(&self, uri: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        for tier in [ContextTier::L0, ContextTier::L1, ContextTier::L2] {
            let bucket = buckets.bucket_mut(tier);
            if let Some(pos) = bucket.iter().position(|c| c.uri == uri) {
                bucket.remove(pos);
                return true;
            }
        }
        false
    }

    /// Move a context to another tier: remove from whichever tier holds it,
    /// then reinsert in the target. Atomic under the bucket lock.
    pub fn move_to_tier(&self, uri: &str, tier: ContextTier) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        let mut found = None;
        for t in [ContextTier::L0, ContextTier::L1, ContextTier::L2] {
            let bucket = buckets.bucket_mut(t);
            if let Some(pos) = bucket.iter().position(|c| c.uri == uri) {
                found = Some(bucket.remove(pos));
                break;
            }
        }
        match found {
            Some(mut ctx) => {
                ctx.tier = tier;
                buckets.bucket_mut(tier).push(ctx);
                true
            }
            None => false,
        }
    }

    /// Bump the activity counter of a context, wherever it lives.
    pub fn update_activity(&self, uri: &str) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        for tier in [ContextTier::L0, ContextTier::L1, ContextTier::L2] {
            if let Some(ctx) = buckets
                .bucket_mut(tier)
                .iter_mut()
                .find(|c| c.uri == uri)
            {
                ctx.update_activity();
                return true;
            }
        }
        false
    }

    pub fn count(&self) -> usize {
        let buckets = self.buckets.read().unwrap();
        buckets.l0.len() + buckets.l1.len() + buckets.l2.len()
    }

    pub fn count_by_tier(&self, tier: ContextTier) -> usize {
        self.buckets.read().unwrap().bucket(tier).len()
    }

    /// Reorder each tier by `active_count` descending.
    pub fn sort_by_activity(&self) {
        let mut buckets = self.buckets.write().unwrap();
        for tier in [ContextTier::L0, ContextTier::L1, ContextTier::L2] {
            buckets
                .bucket_mut(tier)
                .sort_by(|a, b| b.active_count.cmp(&a.active_count));
        }
    }

    /// Replace the abstract of a context in place. Used by compression.
    fn map_abstracts<F>(&self, tier: ContextTier, f: F) -> i64
    where
        F: Fn(&str) -> String,
    {
        let mut buckets = self.buckets.write().unwrap();
        let mut saved = 0i64;
        for ctx in buckets.bucket_mut(tier).iter_mut() {
            let replaced = f(&ctx.abstract_text);
            saved += ctx.abstract_text.len() as i64 - replaced.len() as i64;
            ctx.abstract_text = replaced;
        }
        saved
    }
}

impl Default for TieredContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TieredContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buckets = self.buckets.read().unwrap();
        write!(
            f,
            "TieredContext{{L0: {}, L1: {}, L2: {}}}",
            buckets.l0.len(),
            buckets.l1.len(),
            buckets.l2.len()
        )
    }
}

// ─── ContextWindow ──────────────────────────────────────────────────────────

/// Window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Hard token budget.
    pub max_tokens: usize,
    /// Fraction of `max_tokens` at which compression begins.
    pub compression_ratio: f64,
    /// Smallest number of L0 contexts always kept, even over budget.
    pub min_l0_retention: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        }
    }
}

/// A snapshot of window state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub max_tokens: usize,
    pub current_total: usize,
    pub usage_percent: f64,
    pub approaching_limit: bool,
    pub tier_counts: HashMap<String, usize>,
    pub tier_tokens: HashMap<String, usize>,
}

/// Manages context within token limits.
pub struct ContextWindow {
    config: WindowConfig,
    tiers: Arc<TieredContext>,
    counter: Arc<dyn TokenCounter>,
}

impl ContextWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(TieredContext::new()),
            Arc::new(SimpleTokenCounter::new()),
        )
    }

    pub fn with_parts(
        config: WindowConfig,
        tiers: Arc<TieredContext>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            config,
            tiers,
            counter,
        }
    }

    pub fn tiers(&self) -> &Arc<TieredContext> {
        &self.tiers
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Sum of token costs of every held abstract.
    pub fn current_tokens(&self) -> usize {
        self.tiers
            .get_all()
            .iter()
            .map(|c| self.counter.count_tokens(&c.abstract_text))
            .sum()
    }

    pub fn within_limit(&self) -> bool {
        self.current_tokens() <= self.config.max_tokens
    }

    pub fn approaching_limit(&self) -> bool {
        let threshold =
            (self.config.max_tokens as f64 * self.config.compression_ratio) as usize;
        self.current_tokens() >= threshold
    }

    /// Add a context, rejecting the add when it would exceed the budget.
    pub fn add_context(&self, ctx: Context) -> VikingResult<()> {
        let current = self.current_tokens();
        let new_tokens = self.counter.count_tokens(&ctx.abstract_text);
        if current + new_tokens > self.config.max_tokens {
            return Err(VikingError::CapacityExceeded {
                current,
                requested: new_tokens,
                max: self.config.max_tokens,
            });
        }
        self.tiers.add(ctx);
        Ok(())
    }

    pub fn remove_context(&self, uri: &str) -> bool {
        self.tiers.remove(uri)
    }

    /// Select the contexts that fit the budget, in tier order, preserving
    /// each tier's internal order. An L0 context that does not fit is still
    /// included while fewer than `min_l0_retention` L0 contexts are in.
    pub fn fit_in_window(&self) -> Vec<Context> {
        let mut result = Vec::new();
        let mut current = 0usize;
        let mut l0_included = 0usize;

        for ctx in self.tiers.get_all() {
            let tokens = self.counter.count_tokens(&ctx.abstract_text);
            if current + tokens <= self.config.max_tokens {
                if ctx.tier == ContextTier::L0 {
                    l0_included += 1;
                }
                current += tokens;
                result.push(ctx);
            } else if ctx.tier == ContextTier::L0 && l0_included < self.config.min_l0_retention {
                l0_included += 1;
                current += tokens;
                result.push(ctx);
            }
        }
        result
    }

    /// Reorder each tier by activity, then fit.
    pub fn optimize_window(&self) -> Vec<Context> {
        self.tiers.sort_by_activity();
        self.fit_in_window()
    }

    /// Compress L2 abstracts in place; if usage still sits at or above the
    /// compression threshold, compress L1 as well. Returns bytes saved.
    /// Idempotent: already-compressed abstracts are untouched.
    pub fn compress(&self) -> i64 {
        let mut saved = self.tiers.map_abstracts(ContextTier::L2, compress_text);
        if self.approaching_limit() {
            saved += self.tiers.map_abstracts(ContextTier::L1, compress_text);
        }
        debug!(bytes_saved = saved, "window compression pass");
        saved
    }

    pub fn window_info(&self) -> WindowInfo {
        let current = self.current_tokens();
        let mut tier_counts = HashMap::new();
        let mut tier_tokens = HashMap::new();

        for (tier, name) in [
            (ContextTier::L0, "L0"),
            (ContextTier::L1, "L1"),
            (ContextTier::L2, "L2"),
        ] {
            let contexts = self.tiers.get_by_tier(tier);
            tier_tokens.insert(
                name.to_string(),
                contexts
                    .iter()
                    .map(|c| self.counter.count_tokens(&c.abstract_text))
                    .sum(),
            );
            tier_counts.insert(name.to_string(), contexts.len());
        }

        let usage_percent = current as f64 / self.config.max_tokens as f64 * 100.0;
        WindowInfo {
            max_tokens: self.config.max_tokens,
            current_total: current,
            usage_percent,
            approaching_limit: usage_percent >= self.config.compression_ratio * 100.0,
            tier_counts,
            tier_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str, tier: ContextTier, abstract_len: usize) -> Context {
        // SimpleTokenCounter: 4 chars per token
        Context::new(uri)
            .with_tier(tier)
            .with_abstract("x".repeat(abstract_len * 4))
    }

    #[test]
    fn add_routes_to_tier() {
        let tc = TieredContext::new();
        tc.add(ctx("viking://a", ContextTier::L0, 1));
        tc.add(ctx("viking://b", ContextTier::L1, 1));
        tc.add(ctx("viking://c", ContextTier::L2, 1));
        assert_eq!(tc.count_by_tier(ContextTier::L0), 1);
        assert_eq!(tc.count_by_tier(ContextTier::L1), 1);
        assert_eq!(tc.count_by_tier(ContextTier::L2), 1);
        assert_eq!(tc.count(), 3);
    }

    #[test]
    fn get_all_is_tier_ordered() {
        let tc = TieredContext::new();
        tc.add(ctx("viking://l2", ContextTier::L2, 1));
        tc.add(ctx("viking://l0", ContextTier::L0, 1));
        tc.add(ctx("viking://l1", ContextTier::L1, 1));
        let uris: Vec<_> = tc.get_all().into_iter().map(|c| c.uri).collect();
        assert_eq!(uris, vec!["viking://l0", "viking://l1", "viking://l2"]);
    }

    #[test]
    fn remove_finds_any_tier() {
        let tc = TieredContext::new();
        tc.add(ctx("viking://a", ContextTier::L2, 1));
        assert!(tc.remove("viking://a"));
        assert!(!tc.remove("viking://a"));
        assert_eq!(tc.count(), 0);
    }

    #[test]
    fn move_to_tier_reinserts_once() {
        let tc = TieredContext::new();
        tc.add(ctx("viking://a", ContextTier::L1, 1));
        assert!(tc.move_to_tier("viking://a", ContextTier::L0));
        assert_eq!(tc.count_by_tier(ContextTier::L0), 1);
        assert_eq!(tc.count_by_tier(ContextTier::L1), 0);
        assert_eq!(tc.count(), 1);
        let moved = tc.get_by_uri("viking://a").unwrap();
        assert_eq!(moved.tier, ContextTier::L0);

        assert!(!tc.move_to_tier("viking://missing", ContextTier::L2));
    }

    #[test]
    fn update_activity_is_monotonic() {
        let tc = TieredContext::new();
        tc.add(ctx("viking://a", ContextTier::L1, 1));
        assert!(tc.update_activity("viking://a"));
        assert!(tc.update_activity("viking://a"));
        assert_eq!(tc.get_by_uri("viking://a").unwrap().active_count, 2);
        assert!(!tc.update_activity("viking://nope"));
    }

    #[test]
    fn fit_under_pressure_drops_low_tiers() {
        // max 100 tokens, L0:40 + L0:60 fill it exactly; L1:30 and L2:50 drop
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 100,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        window.tiers().add(ctx("viking://l0-a", ContextTier::L0, 40));
        window.tiers().add(ctx("viking://l0-b", ContextTier::L0, 60));
        window.tiers().add(ctx("viking://l1-a", ContextTier::L1, 30));
        window.tiers().add(ctx("viking://l2-a", ContextTier::L2, 50));

        let fitted = window.fit_in_window();
        let uris: Vec<_> = fitted.iter().map(|c| c.uri.as_str()).collect();
        assert_eq!(uris, vec!["viking://l0-a", "viking://l0-b"]);
    }

    #[test]
    fn min_l0_retention_overrides_budget() {
        // two L0s of 80 tokens each against a 100-token budget: the first
        // fits, the second is dropped, retention floor already satisfied
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 100,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        window.tiers().add(ctx("viking://l0-a", ContextTier::L0, 80));
        window.tiers().add(ctx("viking://l0-b", ContextTier::L0, 80));

        let fitted = window.fit_in_window();
        assert_eq!(fitted.len(), 1);
        assert_eq!(fitted[0].uri, "viking://l0-a");

        // with retention 2 both survive despite the budget
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 100,
            compression_ratio: 0.9,
            min_l0_retention: 2,
        });
        window.tiers().add(ctx("viking://l0-a", ContextTier::L0, 80));
        window.tiers().add(ctx("viking://l0-b", ContextTier::L0, 80));
        assert_eq!(window.fit_in_window().len(), 2);
    }

    #[test]
    fn fit_fills_remaining_budget_with_lower_tiers() {
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 100,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        window.tiers().add(ctx("viking://l0", ContextTier::L0, 40));
        window.tiers().add(ctx("viking://l1", ContextTier::L1, 30));
        window.tiers().add(ctx("viking://l2-big", ContextTier::L2, 50));
        window.tiers().add(ctx("viking://l2-small", ContextTier::L2, 20));

        let uris: Vec<_> = window
            .fit_in_window()
            .into_iter()
            .map(|c| c.uri)
            .collect();
        // 40 + 30 fits; l2-big (50) would blow the budget; l2-small (20) fits
        assert_eq!(uris, vec!["viking://l0", "viking://l1", "viking://l2-small"]);
    }

    #[test]
    fn add_rejects_over_budget() {
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 10,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        window.add_context(ctx("viking://a", ContextTier::L1, 6)).unwrap();
        let err = window.add_context(ctx("viking://b", ContextTier::L1, 6));
        assert!(matches!(err, Err(VikingError::CapacityExceeded { .. })));
        assert_eq!(window.tiers().count(), 1);
    }

    #[test]
    fn optimize_orders_by_activity() {
        let window = ContextWindow::new(WindowConfig::default());
        let mut hot = ctx("viking://hot", ContextTier::L1, 1);
        hot.active_count = 10;
        let cold = ctx("viking://cold", ContextTier::L1, 1);
        window.tiers().add(cold);
        window.tiers().add(hot);

        let fitted = window.optimize_window();
        assert_eq!(fitted[0].uri, "viking://hot");
    }

    #[test]
    fn compress_targets_l2_first() {
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 100_000,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        let long = "needs compression because it repeats ".repeat(30);
        window
            .tiers()
            .add(Context::new("viking://l1").with_tier(ContextTier::L1).with_abstract(&long));
        window
            .tiers()
            .add(Context::new("viking://l2").with_tier(ContextTier::L2).with_abstract(&long));

        let saved = window.compress();
        assert!(saved > 0);

        // far from the threshold, so only L2 was compressed
        let l2 = window.tiers().get_by_uri("viking://l2").unwrap();
        assert!(is_compressed(&l2.abstract_text));
        let l1 = window.tiers().get_by_uri("viking://l1").unwrap();
        assert_eq!(l1.abstract_text, long);

        // reversible
        assert_eq!(decompress_text(&l2.abstract_text).unwrap(), long);
    }

    #[test]
    fn compress_extends_to_l1_under_pressure() {
        let long = "press ".repeat(100);
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 200,
            compression_ratio: 0.1,
            min_l0_retention: 1,
        });
        window
            .tiers()
            .add(Context::new("viking://l1").with_tier(ContextTier::L1).with_abstract(&long));

        window.compress();
        let l1 = window.tiers().get_by_uri("viking://l1").unwrap();
        assert!(is_compressed(&l1.abstract_text));
    }

    #[test]
    fn compress_twice_is_stable() {
        let window = ContextWindow::new(WindowConfig::default());
        let long = "stable stable stable ".repeat(50);
        window
            .tiers()
            .add(Context::new("viking://l2").with_tier(ContextTier::L2).with_abstract(&long));

        window.compress();
        let first = window.tiers().get_by_uri("viking://l2").unwrap().abstract_text;
        window.compress();
        let second = window.tiers().get_by_uri("viking://l2").unwrap().abstract_text;
        assert_eq!(first, second);
    }

    #[test]
    fn window_info_reports_tiers() {
        let window = ContextWindow::new(WindowConfig {
            max_tokens: 1000,
            compression_ratio: 0.9,
            min_l0_retention: 1,
        });
        window.tiers().add(ctx("viking://a", ContextTier::L0, 10));
        window.tiers().add(ctx("viking://b", ContextTier::L1, 20));

        let info = window.window_info();
        assert_eq!(info.current_total, 30);
        assert_eq!(info.tier_counts["L0"], 1);
        assert_eq!(info.tier_tokens["L1"], 20);
        assert!(!info.approaching_limit);
        assert!((info.usage_percent - 3.0).abs() < 0.01);
    }
}
