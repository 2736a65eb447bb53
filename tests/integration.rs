use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use viking_core::agfs::{Agfs, AgfsConfig, RelationManager};
use viking_core::error::{VikingError, VikingResult};
use viking_core::llm::{
    ChatMessage, ChatRequest, ChatResponse, Choice, EmbeddingRequest, EmbeddingResponse, Provider,
    Role, StreamResponse, TokenUsage,
};
use viking_core::retrieval::{
    Embedder, HashingEmbedder, HierarchicalRetriever, InMemoryVectorStore, RetrieverConfig,
    SearchOptions, TraceEventType, TypedQuery, VectorRecord, VectorStore,
};
use viking_core::session::{
    CompressionConfig, ExtractorConfig, LlmExtractor, LlmSummarizer, MemoryDeduper,
    SessionCompressor, SessionManager, SessionState, SummarizerConfig,
};
use viking_core::storage::{Condition, Filter, JsonStore, QueryOptions, Store};
use viking_core::types::{Context, ContextTier, ContextType};
use viking_core::window::{ContextWindow, WindowConfig};

// ─── Mock provider ──────────────────────────────────────────────────────────

struct MockProvider {
    responses: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    async fn chat(&self, _request: &ChatRequest) -> VikingResult<ChatResponse> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(VikingError::Provider("no more responses".into()));
        }
        Ok(ChatResponse {
            id: "mock".into(),
            model: "mock".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(responses.remove(0)),
                finish_reason: "stop".into(),
            }],
            usage: TokenUsage::default(),
        })
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> VikingResult<tokio::sync::mpsc::UnboundedReceiver<StreamResponse>> {
        let _ = self.chat(request).await?;
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn embed(&self, _request: &EmbeddingRequest) -> VikingResult<EmbeddingResponse> {
        Err(VikingError::Provider("mock does not embed".into()))
    }
}

fn window_context(uri: &str, tier: ContextTier, tokens: usize) -> Context {
    // SimpleTokenCounter counts 4 chars per token
    Context::new(uri)
        .with_tier(tier)
        .with_abstract("x".repeat(tokens * 4))
}

// ─── Scenario 1: tiered window under pressure ───────────────────────────────

#[test]
fn tiered_window_under_pressure() {
    let window = ContextWindow::new(WindowConfig {
        max_tokens: 100,
        compression_ratio: 0.9,
        min_l0_retention: 1,
    });
    window.tiers().add(window_context("viking://l0-a", ContextTier::L0, 40));
    window.tiers().add(window_context("viking://l0-b", ContextTier::L0, 60));
    window.tiers().add(window_context("viking://l1-a", ContextTier::L1, 30));
    window.tiers().add(window_context("viking://l2-a", ContextTier::L2, 50));

    let fitted = window.fit_in_window();
    let uris: Vec<&str> = fitted.iter().map(|c| c.uri.as_str()).collect();
    assert_eq!(uris, vec!["viking://l0-a", "viking://l0-b"]);
}

#[test]
fn min_l0_retention_keeps_one_oversized() {
    let window = ContextWindow::new(WindowConfig {
        max_tokens: 100,
        compression_ratio: 0.9,
        min_l0_retention: 1,
    });
    window.tiers().add(window_context("viking://l0-a", ContextTier::L0, 80));
    window.tiers().add(window_context("viking://l0-b", ContextTier::L0, 80));

    let fitted = window.fit_in_window();
    assert_eq!(fitted.len(), 1);
    assert_eq!(fitted[0].uri, "viking://l0-a");
}

// ─── Scenario 2: hierarchical retrieval convergence ─────────────────────────

#[tokio::test]
async fn retrieval_converges_over_sibling_directories() {
    let embedder = Arc::new(HashingEmbedder::new(128));
    let store = Arc::new(InMemoryVectorStore::new(128));

    // eight sibling directories under resources; only two hold matches
    let mut records = Vec::new();
    for i in 0..8 {
        let uri = format!("viking://resources/d{i}");
        let text = if i < 2 {
            format!("directory {i} about rust async runtimes")
        } else {
            format!("directory {i} about gardening and cooking")
        };
        let vector = embedder.embed(&text).await.unwrap();
        records.push(VectorRecord {
            uri,
            vector: vector.dense,
            abstract_text: text,
            is_leaf: false,
            parent_uri: "viking://resources".into(),
            metadata: HashMap::new(),
        });
    }
    for (dir, name) in [(0, "tokio-guide"), (1, "async-book")] {
        let text = format!("{name}: deep dive into rust async runtimes and tokio");
        let vector = embedder.embed(&text).await.unwrap();
        records.push(VectorRecord {
            uri: format!("viking://resources/d{dir}/{name}"),
            vector: vector.dense,
            abstract_text: text,
            is_leaf: true,
            parent_uri: format!("viking://resources/d{dir}"),
            metadata: HashMap::new(),
        });
    }
    store.add(records).await.unwrap();

    let retriever = HierarchicalRetriever::new(
        Some(embedder.clone()),
        store.clone(),
        RetrieverConfig::default(),
    );
    let result = retriever
        .retrieve(
            TypedQuery::new("rust async runtime tokio", ContextType::Resource),
            SearchOptions {
                limit: 3,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.matched_contexts.len() <= 3);
    let uris: Vec<&str> = result
        .matched_contexts
        .iter()
        .map(|m| m.uri.as_str())
        .collect();
    assert!(uris.iter().any(|u| u.ends_with("tokio-guide")));
    assert!(uris.iter().any(|u| u.ends_with("async-book")));

    // scores descend and the trace closes with a summary
    let scores: Vec<f64> = result.matched_contexts.iter().map(|m| m.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(
        result.thinking_trace.events.last().unwrap().event_type,
        TraceEventType::SearchSummary
    );
}

#[tokio::test]
async fn retrieval_feeds_window() {
    let embedder = Arc::new(HashingEmbedder::new(64));
    let store = Arc::new(InMemoryVectorStore::new(64));

    let text = "api reference for the storage service";
    let vector = embedder.embed(text).await.unwrap();
    store
        .add(vec![VectorRecord {
            uri: "viking://resources/api".into(),
            vector: vector.dense,
            abstract_text: text.into(),
            is_leaf: true,
            parent_uri: "viking://resources".into(),
            metadata: HashMap::new(),
        }])
        .await
        .unwrap();

    let retriever =
        HierarchicalRetriever::new(Some(embedder), store, RetrieverConfig::default());
    let result = retriever
        .retrieve(
            TypedQuery::new("storage api reference", ContextType::Resource),
            SearchOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!result.matched_contexts.is_empty());

    // matched contexts flow into a budgeted window
    let window = ContextWindow::new(WindowConfig {
        max_tokens: 1000,
        compression_ratio: 0.9,
        min_l0_retention: 1,
    });
    for matched in &result.matched_contexts {
        window
            .add_context(
                Context::new(&matched.uri)
                    .with_abstract(&matched.abstract_text)
                    .with_tier(ContextTier::L1),
            )
            .unwrap();
    }
    let fitted = window.fit_in_window();
    assert_eq!(fitted.len(), result.matched_contexts.len());
}

// ─── Scenario 3: extraction and dedup ───────────────────────────────────────

#[tokio::test]
async fn extraction_then_dedup_merges_preferences() {
    // extraction normalizes the two phrasing variants into near-identical
    // contents; dedup then groups them and the LLM votes to merge
    let extraction = concat!(
        r#"[{"content": "User prefers concise brief responses", "importance": 0.5, "category": "preference"},"#,
        r#" {"content": "User prefers brief concise answers responses", "importance": 0.4, "category": "preference"},"#,
        r#" {"content": "User likes Python", "importance": 0.7, "category": "preference"}]"#
    );

    let extractor = LlmExtractor::new(
        Arc::new(MockProvider::new(vec![extraction])),
        ExtractorConfig {
            min_importance: 0.3,
            max_memories: 10,
            session_id: "sess".into(),
        },
    );

    use viking_core::session::MemoryExtractor;
    let mut session = viking_core::session::Session::new("u");
    let messages = vec![
        session.add_message(Role::User, "I prefer concise responses"),
        session.add_message(Role::User, "Please keep answers brief"),
        session.add_message(Role::User, "I like Python"),
    ];
    let memories = extractor.extract(&messages).await.unwrap();
    assert_eq!(memories.len(), 3);

    let deduper = MemoryDeduper::new(
        Some(Arc::new(MockProvider::new(vec!["merge\nmerge\n"]))),
        0.5,
    );
    let deduped = deduper.dedup(memories).await.unwrap();

    assert_eq!(deduped.len(), 2);
    let merged = deduped
        .iter()
        .find(|m| m.content.contains("concise"))
        .unwrap();
    // importance = min(1, 0.9·(0.5 + 0.4))
    assert!((merged.importance - 0.81).abs() < 1e-9);
    assert_eq!(merged.category, "preference");
    assert!(deduped.iter().any(|m| m.content.contains("Python")));
}

// ─── Scenario 4: session lifecycle with compression ─────────────────────────

#[tokio::test]
async fn session_compresses_once_at_threshold() {
    let store: Arc<dyn Store> = Arc::new(JsonStore::in_memory());
    let manager = SessionManager::new(store);
    let session = manager.create("user-1").await.unwrap();

    for i in 0..51 {
        manager
            .add_message(
                &session.session_id,
                if i % 2 == 0 { Role::User } else { Role::Assistant },
                &format!("message number {i} with some padding text to occupy tokens"),
            )
            .await
            .unwrap();
    }

    let compressor = SessionCompressor::new(
        None,
        None,
        Some(Arc::new(LlmSummarizer::new(
            Arc::new(MockProvider::new(vec![
                "They exchanged fifty-one messages about padding.",
            ])),
            SummarizerConfig::default(),
        ))),
        CompressionConfig {
            threshold: 50,
            keep_recent: 5,
            max_tokens: 100,
            auto_extract: false,
            ..Default::default()
        },
    );

    let result = manager
        .compress_session(&session.session_id, &compressor, &CancellationToken::new())
        .await
        .unwrap()
        .expect("compression should trigger at 51 messages");
    assert_eq!(result.messages_compressed, 46);
    assert!(!result.summary.is_empty());

    let compressed = manager.get(&session.session_id).await.unwrap();
    assert_eq!(compressed.compression_count, 1);

    // summary message plus the five most recent, verbatim
    let messages = manager.get_messages(&session.session_id).await.unwrap();
    assert_eq!(messages.len(), 6);
    assert!(messages[0].content.contains("fifty-one messages"));
    assert!(messages[5].content.contains("message number 50"));

    // below the threshold nothing happens again
    let again = manager
        .compress_session(&session.session_id, &compressor, &CancellationToken::new())
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(
        manager.get(&session.session_id).await.unwrap().compression_count,
        1
    );
}

#[tokio::test]
async fn closed_session_is_terminal() {
    let store: Arc<dyn Store> = Arc::new(JsonStore::in_memory());
    let manager = SessionManager::new(store);
    let session = manager.create("u").await.unwrap();

    let closed = manager.close(&session.session_id).await.unwrap();
    assert_eq!(closed.state, SessionState::Closed);
    assert!(closed.closed_at.is_some());

    let err = manager
        .add_message(&session.session_id, Role::User, "nope")
        .await;
    assert!(matches!(err, Err(VikingError::InvalidState(_))));
}

// ─── Scenario 5: relation link/unlink round trip ────────────────────────────

#[tokio::test]
async fn relation_link_unlink_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let agfs = Arc::new(Agfs::new(AgfsConfig::with_root(dir.path())).await.unwrap());
    let relations = RelationManager::new(agfs.clone());

    agfs.mkdir("viking://agent/skills/search", true).await.unwrap();
    relations
        .link(
            "viking://agent/skills/search",
            vec!["viking://resources/docs/api".into()],
            "reference docs",
        )
        .await
        .unwrap();

    let entries = relations
        .get_relations("viking://agent/skills/search")
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "link_1");
    assert_eq!(entries[0].reason, "reference docs");

    relations
        .unlink("viking://agent/skills/search", "viking://resources/docs/api")
        .await
        .unwrap();
    assert!(relations
        .get_relations("viking://agent/skills/search")
        .await
        .unwrap()
        .is_empty());
}

// ─── Scenario 6: filter DSL over the store ──────────────────────────────────

#[tokio::test]
async fn filter_dsl_selects_and_orders() {
    let store = JsonStore::in_memory();
    let now = chrono::Utc::now();

    for i in 0..20 {
        let parent = if i < 10 { "viking://test" } else { "viking://other" };
        let branch = if i % 2 == 0 { "a" } else { "b" };
        store
            .create_context(&viking_core::storage::ContextRecord {
                id: format!("ctx-{i}"),
                uri: format!("viking://test/{branch}{i:02}"),
                context_type: "resource".into(),
                parent_uri: parent.into(),
                name: format!("name-{i:02}"),
                created_at: now,
                updated_at: now,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let results = store
        .query_contexts(QueryOptions {
            filter: Some(Filter::all(vec![
                Condition::Must {
                    field: "parent_uri".into(),
                    value: serde_json::json!("viking://test"),
                },
                Condition::Prefix {
                    field: "uri".into(),
                    prefix: "viking://test/a".into(),
                },
            ])),
            order_by: Some("name".into()),
            order_desc: false,
            limit: 10,
            offset: 0,
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert!(results
        .iter()
        .all(|c| c.parent_uri == "viking://test" && c.uri.starts_with("viking://test/a")));
    let names: Vec<&str> = results.iter().map(|c| c.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

// ─── AGFS end to end ────────────────────────────────────────────────────────

#[tokio::test]
async fn agfs_context_round_trip_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let agfs = Agfs::new(AgfsConfig::with_root(dir.path())).await.unwrap();

    agfs.write_context(
        "viking://resources/docs/api",
        "REST API reference",
        "Endpoints, auth, rate limits",
        "GET /v1/contexts lists contexts ...",
        true,
    )
    .await
    .unwrap();

    let ctx = agfs.read_context("viking://resources/docs/api").await.unwrap();
    assert_eq!(ctx.abstract_text, "REST API reference");
    assert_eq!(ctx.overview, "Endpoints, auth, rate limits");
    assert!(ctx.content.contains("/v1/contexts"));

    // grep skips the hidden tier files, finds content.md
    let matches = agfs.grep("viking://resources", "v1/contexts", false).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].uri.ends_with("content.md"));

    // tree surfaces the abstract on the docs directory
    let tree = agfs.tree("viking://resources", 0).await.unwrap();
    let docs = tree.iter().find(|e| e.name == "docs").unwrap();
    let api = docs.children.iter().find(|e| e.name == "api").unwrap();
    assert_eq!(api.abstract_text, "REST API reference");
}

#[tokio::test]
async fn empty_query_trace_shape() {
    let store = Arc::new(InMemoryVectorStore::new(8));
    let retriever = HierarchicalRetriever::new(
        Some(Arc::new(HashingEmbedder::new(8))),
        store,
        RetrieverConfig::default(),
    );

    let result = retriever
        .retrieve(
            TypedQuery::new("", ContextType::Memory),
            SearchOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.matched_contexts.is_empty());
    let kinds: Vec<TraceEventType> = result
        .thinking_trace
        .events
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![TraceEventType::SearchDirectoryStart, TraceEventType::SearchSummary]
    );
}
