//! Session compression: extraction + dedup + summarization under one
//! config, plus the append-observing auto-extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{VikingError, VikingResult};

use super::{
    estimate_message_tokens, ExtractedMemory, MemoryDeduper, MemoryExtractor, Message, Summarizer,
};

/// Compression pipeline configuration.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Message count that triggers compression.
    pub threshold: usize,
    /// Trailing messages kept verbatim.
    pub keep_recent: usize,
    /// Token budget for the older part; beyond it, summarize.
    pub max_tokens: usize,
    /// Importance floor applied to extracted memories.
    pub min_importance: f64,
    /// Extract memories during compression.
    pub auto_extract: bool,
    /// Deduplicate extracted memories.
    pub auto_dedup: bool,
    /// Interval-based trigger for the auto-extractor.
    pub interval: Duration,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            keep_recent: 5,
            max_tokens: 4000,
            min_importance: 0.3,
            auto_extract: true,
            auto_dedup: true,
            interval: Duration::from_secs(300),
        }
    }
}

/// The outcome of one compression pass.
#[derive(Debug, Clone, Default)]
pub struct SessionCompressionResult {
    pub messages_compressed: usize,
    pub memories_extracted: usize,
    pub memories_removed: usize,
    pub tokens_saved: i64,
    pub summary: String,
    pub extracted_memories: Vec<ExtractedMemory>,
}

/// Combines extractor, deduper, and summarizer.
pub struct SessionCompressor {
    extractor: Option<Arc<dyn MemoryExtractor>>,
    deduper: Option<MemoryDeduper>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: CompressionConfig,
}

impl SessionCompressor {
    pub fn new(
        extractor: Option<Arc<dyn MemoryExtractor>>,
        deduper: Option<MemoryDeduper>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: CompressionConfig,
    ) -> Self {
        Self {
            extractor,
            deduper,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn should_compress(&self, message_count: usize) -> bool {
        message_count >= self.config.threshold
    }

    /// Compress older messages: extract memories, dedup them, and summarize
    /// when the older part exceeds the token budget.
    pub async fn compress(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> VikingResult<SessionCompressionResult> {
        if cancel.is_cancelled() {
            return Err(VikingError::Cancelled);
        }
        if messages.len() <= self.config.keep_recent {
            return Ok(SessionCompressionResult::default());
        }

        let older = &messages[..messages.len() - self.config.keep_recent];
        let mut result = SessionCompressionResult {
            messages_compressed: older.len(),
            ..Default::default()
        };

        if self.config.auto_extract {
            if let Some(extractor) = &self.extractor {
                let memories = extractor.extract(older).await?;
                result.memories_extracted = memories.len();

                let kept = if self.config.auto_dedup && memories.len() > 1 {
                    match &self.deduper {
                        Some(deduper) => deduper.dedup(memories.clone()).await?,
                        None => memories,
                    }
                } else {
                    memories
                };
                result.memories_removed = result.memories_extracted - kept.len();
                result.extracted_memories = self.filter_by_importance(kept);
            }
        }

        if let Some(summarizer) = &self.summarizer {
            let estimated = estimate_message_tokens(older);
            if estimated > self.config.max_tokens as i64 {
                let (summary, saved) = summarizer.compress(messages, self.config.max_tokens).await?;
                result.summary = summary;
                result.tokens_saved = saved;
            }
        }

        debug!(
            compressed = result.messages_compressed,
            extracted = result.memories_extracted,
            removed = result.memories_removed,
            "compression pass done"
        );
        Ok(result)
    }

    /// Compress only when the threshold is reached.
    pub async fn compress_with_trigger(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> VikingResult<Option<SessionCompressionResult>> {
        if !self.should_compress(messages.len()) {
            return Ok(None);
        }
        Ok(Some(self.compress(messages, cancel).await?))
    }

    pub fn filter_by_importance(&self, memories: Vec<ExtractedMemory>) -> Vec<ExtractedMemory> {
        memories
            .into_iter()
            .filter(|m| m.importance >= self.config.min_importance)
            .collect()
    }
}

/// Observes message appends and triggers extraction when either the
/// accumulated count reaches `max_messages` or the configured interval has
/// elapsed since the last extraction.
pub struct AutoExtractor {
    extractor: Arc<dyn MemoryExtractor>,
    max_messages: usize,
    interval: Duration,
    messages: Vec<Message>,
    last_extracted: Option<Instant>,
}

impl AutoExtractor {
    pub fn new(extractor: Arc<dyn MemoryExtractor>, max_messages: usize, interval: Duration) -> Self {
        Self {
            extractor,
            max_messages,
            interval,
            messages: Vec::new(),
            last_extracted: None,
        }
    }

    /// Record a message; extraction fires at exactly `max_messages`
    /// accumulated, or when the interval has passed.
    pub async fn add_message(
        &mut self,
        message: Message,
    ) -> VikingResult<Option<Vec<ExtractedMemory>>> {
        self.messages.push(message);

        let count_reached = self.messages.len() >= self.max_messages;
        let interval_elapsed = self
            .last_extracted
            .map(|at| at.elapsed() >= self.interval)
            .unwrap_or(false);

        if !(count_reached || interval_elapsed) {
            return Ok(None);
        }

        let memories = self.extract().await?;
        self.last_extracted = Some(Instant::now());
        Ok(Some(memories))
    }

    /// Extract from everything accumulated so far.
    pub async fn extract(&self) -> VikingResult<Vec<ExtractedMemory>> {
        if self.messages.is_empty() {
            return Ok(Vec::new());
        }
        self.extractor.extract(&self.messages).await
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}
