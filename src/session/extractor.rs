//! LLM-based memory extraction with staged JSON recovery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{VikingError, VikingResult};
use crate::llm::{ChatMessage, ChatRequest, Provider};

use super::{format_transcript, Message};

/// The six-category scheme for extracted memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Profile,
    Preference,
    Entity,
    Event,
    Case,
    Pattern,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 6] = [
        MemoryCategory::Profile,
        MemoryCategory::Preference,
        MemoryCategory::Entity,
        MemoryCategory::Event,
        MemoryCategory::Case,
        MemoryCategory::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Profile => "profile",
            MemoryCategory::Preference => "preference",
            MemoryCategory::Entity => "entity",
            MemoryCategory::Event => "event",
            MemoryCategory::Case => "case",
            MemoryCategory::Pattern => "pattern",
        }
    }

    /// Base importance weight of the category.
    pub fn weight(&self) -> f64 {
        match self {
            MemoryCategory::Profile => 0.9,
            MemoryCategory::Preference => 0.8,
            MemoryCategory::Entity => 0.7,
            MemoryCategory::Event => 0.6,
            MemoryCategory::Case => 0.7,
            MemoryCategory::Pattern => 0.5,
        }
    }

    fn prompt_template(&self) -> &'static str {
        match self {
            MemoryCategory::Profile => PROFILE_PROMPT,
            MemoryCategory::Preference => PREFERENCE_PROMPT,
            MemoryCategory::Entity => ENTITY_PROMPT,
            MemoryCategory::Event => EVENT_PROMPT,
            MemoryCategory::Case => CASE_PROMPT,
            MemoryCategory::Pattern => PATTERN_PROMPT,
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Base weight for a category name. The legacy scheme (`fact`, `skill`,
/// `goal`, `context`, `other`) and anything unknown get the default 0.5.
pub fn category_weight(category: &str) -> f64 {
    match category {
        "profile" => 0.9,
        "preference" => 0.8,
        "entity" => 0.7,
        "event" => 0.6,
        "case" => 0.7,
        "pattern" => 0.5,
        _ => 0.5,
    }
}

/// A memory produced by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub content: String,
    pub importance: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Importance floor for extracted memories.
    pub min_importance: f64,
    /// Cap on memories per extraction.
    pub max_memories: usize,
    /// Session the extracted memories belong to.
    pub session_id: String,
}

impl ExtractorConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            min_importance: 0.5,
            max_memories: 10,
            session_id: session_id.into(),
        }
    }
}

/// Extracts important information from session messages.
#[async_trait::async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(&self, messages: &[Message]) -> VikingResult<Vec<ExtractedMemory>>;

    async fn extract_by_category(
        &self,
        messages: &[Message],
        category: MemoryCategory,
    ) -> VikingResult<Vec<ExtractedMemory>>;

    async fn extract_all_categories(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> VikingResult<HashMap<MemoryCategory, Vec<ExtractedMemory>>>;
}

/// LLM-backed extractor.
pub struct LlmExtractor {
    provider: Arc<dyn Provider>,
    config: ExtractorConfig,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn Provider>, config: ExtractorConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    async fn call(&self, prompt: String) -> VikingResult<String> {
        let response = self
            .provider
            .chat(&ChatRequest {
                model: String::new(),
                temperature: Some(0.3),
                max_tokens: Some(2000),
                messages: vec![
                    ChatMessage::system(
                        "You are a memory extraction assistant. Extract important \
                         information from the conversation and return a JSON array.",
                    ),
                    ChatMessage::user(prompt),
                ],
                ..Default::default()
            })
            .await?;

        response
            .first_content()
            .map(String::from)
            .ok_or_else(|| VikingError::ExtractionFailed("provider returned no choices".into()))
    }

    fn finalize(&self, memories: Vec<ExtractedMemory>) -> Vec<ExtractedMemory> {
        let now = Utc::now();
        memories
            .into_iter()
            .filter(|m| m.importance >= self.config.min_importance)
            .take(self.config.max_memories)
            .map(|mut m| {
                m.session_id = self.config.session_id.clone();
                m.created_at = now;
                m
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl MemoryExtractor for LlmExtractor {
    async fn extract(&self, messages: &[Message]) -> VikingResult<Vec<ExtractedMemory>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let transcript = format_transcript(messages);
        let prompt = DEFAULT_EXTRACTION_PROMPT.replace("{conversation}", &transcript);
        let response = self.call(prompt).await?;
        let memories = parse_memory_response(&response)?;
        Ok(self.finalize(memories))
    }

    async fn extract_by_category(
        &self,
        messages: &[Message],
        category: MemoryCategory,
    ) -> VikingResult<Vec<ExtractedMemory>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let transcript = format_transcript(messages);
        let prompt = category
            .prompt_template()
            .replace("{conversation}", &transcript);
        let response = self.call(prompt).await?;
        let memories = parse_memory_response(&response)?;

        // per-category importance = reported importance × category weight
        let weighted = memories
            .into_iter()
            .map(|mut m| {
                m.category = category.as_str().to_string();
                m.importance *= category.weight();
                m
            })
            .collect();
        Ok(self.finalize(weighted))
    }

    async fn extract_all_categories(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> VikingResult<HashMap<MemoryCategory, Vec<ExtractedMemory>>> {
        let mut results = HashMap::new();
        for category in MemoryCategory::ALL {
            if cancel.is_cancelled() {
                return Err(VikingError::Cancelled);
            }
            let memories = self.extract_by_category(messages, category).await?;
            if !memories.is_empty() {
                results.insert(category, memories);
            }
        }
        Ok(results)
    }
}

/// Parse the LLM response into memories, trying progressively looser
/// strategies: raw JSON, a `[`-prefixed array span, a fenced code block,
/// then any bracketed span.
pub(crate) fn parse_memory_response(response: &str) -> VikingResult<Vec<ExtractedMemory>> {
    if let Ok(memories) = serde_json::from_str::<Vec<ExtractedMemory>>(response) {
        return Ok(memories);
    }

    if let Some(span) = find_array_span(response) {
        if let Ok(memories) = serde_json::from_str::<Vec<ExtractedMemory>>(&span) {
            return Ok(memories);
        }
    }

    if let Some(block) = find_fenced_block(response) {
        if let Ok(memories) = serde_json::from_str::<Vec<ExtractedMemory>>(&block) {
            debug!("memory response recovered from fenced block");
            return Ok(memories);
        }
    }

    if let Some(span) = find_bracketed_span(response) {
        if let Ok(memories) = serde_json::from_str::<Vec<ExtractedMemory>>(&span) {
            debug!("memory response recovered from bracketed span");
            return Ok(memories);
        }
    }

    Err(VikingError::ParseFailed(
        "no valid JSON array found in extraction response".into(),
    ))
}

/// Lines from the first `[`-prefixed line through the first `]`-suffixed
/// line.
fn find_array_span(response: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut in_array = false;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_array = true;
        }
        if in_array {
            lines.push(line);
        }
        if in_array && trimmed.ends_with(']') {
            break;
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Content of the first ```json (or plain ```) fenced block.
fn find_fenced_block(response: &str) -> Option<String> {
    let start = response.find("```json").map(|i| i + 7).or_else(|| {
        response.find("```").map(|i| i + 3)
    })?;
    let rest = &response[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// Everything between the first `[` and the last `]`.
fn find_bracketed_span(response: &str) -> Option<String> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    (end > start).then(|| response[start..=end].to_string())
}

const DEFAULT_EXTRACTION_PROMPT: &str = r#"Extract important information from the following conversation that should be remembered for future interactions.

For each piece of information, extract:
1. content: The actual information to remember
2. importance: A score from 0 to 1 indicating how important this is
3. category: One of: profile, preference, entity, event, case, pattern

Conversation:
{conversation}

Return a JSON array of memories. Example:
[
  {"content": "User prefers concise responses", "importance": 0.8, "category": "preference"},
  {"content": "User is interested in machine learning", "importance": 0.7, "category": "profile"}
]

Only return the JSON array, no other text."#;

const PROFILE_PROMPT: &str = r#"Extract user profile information from the conversation:
- Name, identity, role
- Professional background
- Skills and expertise
- Personal characteristics

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

const PREFERENCE_PROMPT: &str = r#"Extract user preferences from the conversation:
- Communication style preferences
- Topic interests
- Working style preferences
- Tool and technology preferences

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

const ENTITY_PROMPT: &str = r#"Extract entities mentioned in the conversation:
- People names
- Company and organization names
- Product names
- Project names
- Technical terms

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

const EVENT_PROMPT: &str = r#"Extract events that occurred in the conversation:
- Meetings or discussions
- Decisions made
- Actions taken
- Milestones reached

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

const CASE_PROMPT: &str = r#"Extract cases or scenarios from the conversation:
- Problem descriptions
- Use cases
- Examples mentioned
- Situations described

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

const PATTERN_PROMPT: &str = r#"Extract patterns detected in the conversation:
- Behavioral patterns
- Communication patterns
- Common themes
- Recurring topics

Conversation:
{conversation}

Return a JSON array of {"content", "importance", "category"} objects."#;

#[cfg(test)]
mod tests {
    use super::super::testutil::ScriptedProvider;
    use super::super::Session;
    use super::*;
    use crate::llm::Role;

    fn messages(contents: &[&str]) -> Vec<Message> {
        let mut session = Session::new("u");
        contents
            .iter()
            .map(|c| session.add_message(Role::User, *c))
            .collect()
    }

    fn extractor(responses: Vec<&str>) -> LlmExtractor {
        LlmExtractor::new(
            Arc::new(ScriptedProvider::new(responses)),
            ExtractorConfig::new("sess-1"),
        )
    }

    #[tokio::test]
    async fn extracts_from_clean_json() {
        let ex = extractor(vec![
            r#"[{"content": "User prefers Rust", "importance": 0.8, "category": "preference"}]"#,
        ]);
        let memories = ex.extract(&messages(&["I prefer Rust"])).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "User prefers Rust");
        assert_eq!(memories[0].session_id, "sess-1");
    }

    #[tokio::test]
    async fn recovers_from_prose_wrapped_array() {
        let ex = extractor(vec![concat!(
            "Here are the memories I found:\n",
            "[\n  {\"content\": \"Works at Acme\", \"importance\": 0.9, \"category\": \"profile\"}\n]\n",
            "Let me know if you need more."
        )]);
        let memories = ex.extract(&messages(&["I work at Acme"])).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "Works at Acme");
    }

    #[tokio::test]
    async fn recovers_from_fenced_block() {
        let ex = extractor(vec![
            "```json\n[{\"content\": \"Uses vim\", \"importance\": 0.7, \"category\": \"preference\"}]\n```",
        ]);
        let memories = ex.extract(&messages(&["I use vim"])).await.unwrap();
        assert_eq!(memories.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_response_is_parse_failed() {
        let ex = extractor(vec!["I could not find anything to extract."]);
        let err = ex.extract(&messages(&["hello"])).await;
        assert!(matches!(err, Err(VikingError::ParseFailed(_))));
    }

    #[tokio::test]
    async fn importance_floor_filters() {
        let ex = extractor(vec![
            r#"[{"content": "weak", "importance": 0.2, "category": "pattern"},
                {"content": "strong", "importance": 0.9, "category": "profile"}]"#,
        ]);
        let memories = ex.extract(&messages(&["hi"])).await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].content, "strong");
    }

    #[tokio::test]
    async fn max_memories_caps() {
        let many: Vec<String> = (0..15)
            .map(|i| format!(r#"{{"content": "m{i}", "importance": 0.9, "category": "entity"}}"#))
            .collect();
        let body = format!("[{}]", many.join(","));
        let ex = extractor(vec![&body]);
        let memories = ex.extract(&messages(&["hi"])).await.unwrap();
        assert_eq!(memories.len(), 10);
    }

    #[tokio::test]
    async fn empty_messages_yield_nothing() {
        let ex = extractor(vec![]);
        let memories = ex.extract(&[]).await.unwrap();
        assert!(memories.is_empty());
    }

    #[tokio::test]
    async fn category_extraction_applies_weight() {
        // reported importance 1.0 × preference weight 0.8 = 0.8
        let ex = extractor(vec![
            r#"[{"content": "likes brief answers", "importance": 1.0, "category": "preference"}]"#,
        ]);
        let memories = ex
            .extract_by_category(&messages(&["keep it brief"]), MemoryCategory::Preference)
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert!((memories[0].importance - 0.8).abs() < 1e-9);
        assert_eq!(memories[0].category, "preference");
    }

    #[tokio::test]
    async fn category_weight_can_drop_below_floor() {
        // 0.6 × pattern weight 0.5 = 0.3 < default floor 0.5
        let ex = extractor(vec![
            r#"[{"content": "often asks twice", "importance": 0.6, "category": "pattern"}]"#,
        ]);
        let memories = ex
            .extract_by_category(&messages(&["again"]), MemoryCategory::Pattern)
            .await
            .unwrap();
        assert!(memories.is_empty());
    }

    #[tokio::test]
    async fn all_categories_collects_non_empty() {
        let hit = r#"[{"content": "x", "importance": 1.0, "category": "profile"}]"#;
        let empty = "[]";
        // six category calls, in ALL order
        let ex = extractor(vec![hit, empty, empty, empty, empty, empty]);
        let results = ex
            .extract_all_categories(&messages(&["hello"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&MemoryCategory::Profile));
    }

    #[tokio::test]
    async fn all_categories_checks_cancellation() {
        let ex = extractor(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ex
            .extract_all_categories(&messages(&["hello"]), &cancel)
            .await;
        assert!(matches!(err, Err(VikingError::Cancelled)));
    }

    #[test]
    fn weights_match_scheme() {
        assert_eq!(category_weight("profile"), 0.9);
        assert_eq!(category_weight("preference"), 0.8);
        assert_eq!(category_weight("entity"), 0.7);
        assert_eq!(category_weight("event"), 0.6);
        assert_eq!(category_weight("case"), 0.7);
        assert_eq!(category_weight("pattern"), 0.5);
        // legacy and unknown categories fall back
        assert_eq!(category_weight("fact"), 0.5);
        assert_eq!(category_weight("anything"), 0.5);
    }

    #[test]
    fn bracketed_span_recovery() {
        let response = "noise [ {\"content\": \"a\", \"importance\": 0.9} ] trailing";
        let memories = parse_memory_response(response).unwrap();
        assert_eq!(memories.len(), 1);
    }
}
