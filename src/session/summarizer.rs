//! LLM-based conversation summarization.

use std::sync::Arc;

use crate::error::{VikingError, VikingResult};
use crate::llm::{ChatMessage, ChatRequest, Provider};

use super::{estimate_message_tokens, format_transcript, Message};

/// Creates summaries of session content.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// A 2-3 sentence summary of the messages.
    async fn summarize(&self, messages: &[Message]) -> VikingResult<String>;

    /// Compress older messages into a summary when they exceed `max_tokens`,
    /// keeping the most recent ones verbatim. Returns the compressed text
    /// and the estimated tokens saved (0 when nothing was compressed).
    async fn compress(&self, messages: &[Message], max_tokens: usize)
        -> VikingResult<(String, i64)>;
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Token budget for generated summaries.
    pub max_tokens: usize,
    /// Number of trailing messages never summarized.
    pub keep_recent_msgs: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            keep_recent_msgs: 5,
        }
    }
}

pub struct LlmSummarizer {
    provider: Arc<dyn Provider>,
    config: SummarizerConfig,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn Provider>, config: SummarizerConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> VikingResult<String> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        let transcript = format_transcript(messages);
        let prompt = format!(
            "Summarize the following conversation concisely, capturing the key \
             points and any important information:\n\n{transcript}\n\nProvide a \
             brief summary (2-3 sentences):"
        );

        let response = self
            .provider
            .chat(&ChatRequest {
                model: String::new(),
                temperature: Some(0.3),
                max_tokens: Some(self.config.max_tokens as u32),
                messages: vec![
                    ChatMessage::system("You are a conversation summarization assistant."),
                    ChatMessage::user(prompt),
                ],
                ..Default::default()
            })
            .await?;

        response
            .first_content()
            .map(String::from)
            .ok_or_else(|| VikingError::Provider("summarizer returned no choices".into()))
    }

    async fn compress(
        &self,
        messages: &[Message],
        max_tokens: usize,
    ) -> VikingResult<(String, i64)> {
        if messages.is_empty() {
            return Ok((String::new(), 0));
        }

        let recent_count = self.config.keep_recent_msgs.min(messages.len());
        let older = &messages[..messages.len() - recent_count];

        let estimated = estimate_message_tokens(older);
        if estimated <= max_tokens as i64 {
            // under budget, return the older part verbatim
            return Ok((format_transcript(older), 0));
        }

        let summary = self.summarize(older).await?;
        let saved = estimated - (summary.len() / 4) as i64;
        Ok((summary, saved))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::ScriptedProvider;
    use super::super::Session;
    use super::*;
    use crate::llm::Role;

    fn messages(count: usize, len: usize) -> Vec<Message> {
        let mut session = Session::new("u");
        (0..count)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                session.add_message(role, "x".repeat(len))
            })
            .collect()
    }

    fn summarizer(responses: Vec<&str>) -> LlmSummarizer {
        LlmSummarizer::new(
            Arc::new(ScriptedProvider::new(responses)),
            SummarizerConfig::default(),
        )
    }

    #[tokio::test]
    async fn summarize_returns_provider_text() {
        let s = summarizer(vec!["They discussed Rust and async runtimes."]);
        let summary = s.summarize(&messages(4, 50)).await.unwrap();
        assert_eq!(summary, "They discussed Rust and async runtimes.");
    }

    #[tokio::test]
    async fn summarize_empty_is_empty() {
        let s = summarizer(vec![]);
        assert_eq!(s.summarize(&[]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn compress_under_budget_is_verbatim() {
        let s = summarizer(vec![]);
        // 10 messages of ~2 tokens each; budget is generous
        let (text, saved) = s.compress(&messages(10, 10), 4000).await.unwrap();
        assert_eq!(saved, 0);
        assert!(text.contains("user:"));
    }

    #[tokio::test]
    async fn compress_over_budget_summarizes() {
        let s = summarizer(vec!["A short summary."]);
        // older part: 15 messages × 100 tokens each, far over a 50-token budget
        let (text, saved) = s.compress(&messages(20, 400), 50).await.unwrap();
        assert_eq!(text, "A short summary.");
        assert!(saved > 0);
    }

    #[tokio::test]
    async fn compress_keeps_recent_out_of_scope() {
        // 6 messages, keep_recent 5: only 1 older message, well under budget
        let s = summarizer(vec![]);
        let (text, saved) = s.compress(&messages(6, 40), 1000).await.unwrap();
        assert_eq!(saved, 0);
        assert_eq!(text.lines().count(), 1);
    }
}
