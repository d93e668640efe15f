//! Full-chain tests: ingestion engine -> pipeline -> vector store, with the
//! platform, model runtime and web fetcher stubbed deterministically.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use scribe_core::config::IngestConfig;
use scribe_core::platform::{ChatPlatform, MessageRef, PlatformError};
use scribe_core::types::{
    AuthorInfo, ChannelId, ChannelInfo, FailurePolicy, RawMessage, ServerId, ServerInfo, UserId,
};
use scribe_ingest::{IngestionEngine, RateGovernor, ResumptionStore};
use scribe_model::runtime::{
    ChatRequest, ChatResponse, ModelHealth, ModelRuntime, RuntimeError,
};
use scribe_pipeline::{Extractor, Pipeline, VisionDescriber, WebError, WebFetcher};
use scribe_store::ServerConfigStore;
use scribe_vector::{EmbedderRegistry, VectorStore};

/// Letter-frequency embeddings and a canned link summary.
struct StubRuntime;

fn letter_vec(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 26];
    for c in text.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v
}

#[async_trait]
impl ModelRuntime for StubRuntime {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
        Ok(ChatResponse {
            content: "Discusses logs.".into(),
            model: "stub-text".into(),
            tokens_in: 1,
            tokens_out: 1,
            done_reason: "stop".into(),
            tool_calls: Vec::new(),
        })
    }

    async fn describe_image(
        &self,
        _model: &str,
        _bytes: &[u8],
        _prompt: &str,
    ) -> Result<String, RuntimeError> {
        Ok("an image".into())
    }

    async fn embed(
        &self,
        _model: &str,
        documents: &[String],
    ) -> Result<Vec<Vec<f32>>, RuntimeError> {
        Ok(documents.iter().map(|d| letter_vec(d)).collect())
    }

    async fn ensure_available(&self, _model: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn health_check(&self, model: &str) -> Result<ModelHealth, RuntimeError> {
        Ok(ModelHealth {
            model: model.to_string(),
            healthy: true,
            elapsed_ms: 0,
            detail: None,
        })
    }
}

struct StubWeb;

#[async_trait]
impl WebFetcher for StubWeb {
    async fn fetch(&self, _url: &str, _deadline: Duration) -> Result<String, WebError> {
        Ok("X test page about logs.".into())
    }
}

/// One channel; the message list grows between "restarts".
struct StubPlatform {
    messages: StdMutex<Vec<RawMessage>>,
    seen_after: StdMutex<Vec<Option<DateTime<Utc>>>>,
    live: broadcast::Sender<RawMessage>,
}

impl StubPlatform {
    fn new() -> Self {
        let (live, _) = broadcast::channel(16);
        Self {
            messages: StdMutex::new(Vec::new()),
            seen_after: StdMutex::new(Vec::new()),
            live,
        }
    }

    fn push(&self, message: RawMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[async_trait]
impl ChatPlatform for StubPlatform {
    async fn list_channels(
        &self,
        _server: &ServerId,
    ) -> Result<Vec<ChannelInfo>, PlatformError> {
        Ok(vec![ChannelInfo {
            id: "general".into(),
            name: "general".into(),
            kind: "text".into(),
            category: None,
            position: Some(0),
        }])
    }

    async fn fetch_messages(
        &self,
        _channel: &ChannelId,
        _limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>, PlatformError> {
        self.seen_after.lock().unwrap().push(after);
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| match after {
                Some(t) => m.created_utc().unwrap() > t,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        _text: &str,
    ) -> Result<MessageRef, PlatformError> {
        Ok(MessageRef {
            channel: channel.clone(),
            message: "sent".into(),
        })
    }

    async fn edit_message(&self, _message: &MessageRef, _text: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RawMessage> {
        self.live.subscribe()
    }
}

fn message(id: &str, content: &str, ts: &str) -> RawMessage {
    message_in("S1", id, content, ts)
}

fn message_in(server: &str, id: &str, content: &str, ts: &str) -> RawMessage {
    RawMessage {
        id: id.into(),
        content: content.into(),
        author: AuthorInfo {
            id: UserId::from("7"),
            username: "ada_l".into(),
            display_name: Some("Ada".into()),
            global_name: None,
            nickname: None,
            bot: false,
        },
        channel: ChannelInfo {
            id: "general".into(),
            name: "general".into(),
            kind: "text".into(),
            category: None,
            position: Some(0),
        },
        server: Some(ServerInfo {
            id: ServerId::from(server),
            name: "Workshop".into(),
            member_count: Some(3),
        }),
        created_at: ts.into(),
        edited_at: None,
        reply_to: None,
        attachments: Vec::new(),
        has_embeds: false,
        pinned: false,
    }
}

struct Harness {
    platform: Arc<StubPlatform>,
    vectors: Arc<VectorStore>,
    configs: Arc<ServerConfigStore>,
}

impl Harness {
    fn new(root: &std::path::Path) -> Self {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        scribe_store::db::init_db(&conn).unwrap();
        let configs = Arc::new(ServerConfigStore::new(conn).unwrap());
        configs
            .upsert(&ServerId::from("S1"), FailurePolicy::Skip, None)
            .unwrap();

        let runtime: Arc<dyn ModelRuntime> = Arc::new(StubRuntime);
        let registry = Arc::new(EmbedderRegistry::new(Arc::clone(&runtime)));
        let vectors = Arc::new(VectorStore::new(
            root,
            registry,
            Arc::clone(&configs),
            "stub-embed",
        ));

        Self {
            platform: Arc::new(StubPlatform::new()),
            vectors,
            configs,
        }
    }

    fn pipeline(&self) -> Arc<Pipeline> {
        let runtime: Arc<dyn ModelRuntime> = Arc::new(StubRuntime);
        Arc::new(Pipeline::new(
            Extractor::new(Arc::new(StubWeb), Arc::clone(&runtime), "stub-text", 600),
            VisionDescriber::new(Arc::clone(&runtime), "stub-vision", 10 * 1024 * 1024),
            Arc::clone(&self.vectors),
            Arc::clone(&self.configs),
            FailurePolicy::Skip,
        ))
    }

    /// A fresh engine + resumption store, as a process restart would build.
    fn engine(&self) -> (Arc<IngestionEngine>, Arc<ResumptionStore>) {
        let resume = Arc::new(ResumptionStore::new(Arc::clone(&self.vectors)));
        let engine = Arc::new(IngestionEngine::new(
            Arc::clone(&self.platform) as Arc<dyn ChatPlatform>,
            Arc::new(RateGovernor::new(100.0, 100, 3)),
            self.pipeline(),
            Arc::clone(&self.configs),
            Arc::clone(&resume),
            IngestConfig::default(),
        ));
        (engine, resume)
    }
}

#[tokio::test]
async fn cold_start_indexes_and_answers_queries() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let server = ServerId::from("S1");

    harness.platform.push(message(
        "1001",
        "see https://x.test/a",
        "2024-01-01T00:00:00Z",
    ));

    let (engine, resume) = harness.engine();
    let report = engine
        .run_server(&server, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.stored, 1);

    let hits = harness.vectors.query(&server, "logs", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].document.contains("see https://x.test/a"));
    assert!(hits[0].document.contains("Discusses logs."));
    assert_eq!(hits[0].metadata["author_name"], "Ada");
    assert_eq!(hits[0].metadata["channel_name"], "general");
    assert_eq!(hits[0].metadata["urls_found"], "true");
    assert_eq!(hits[0].metadata["has_link_summaries"], "true");

    match resume.status(&server).await {
        scribe_ingest::IndexStatus::Resumable {
            last_indexed,
            count,
        }
        | scribe_ingest::IndexStatus::UpToDate {
            last_indexed,
            count,
        } => {
            assert_eq!(count, 1);
            assert_eq!(last_indexed.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_delivery_leaves_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let server = ServerId::from("S1");
    let pipeline = harness.pipeline();

    let m = message("1001", "see https://x.test/a", "2024-01-01T00:00:00Z");
    pipeline.process(vec![m.clone()]).await.unwrap();
    let report = pipeline.process(vec![m]).await.unwrap();

    // Second delivery succeeds and the collection still holds one record.
    assert_eq!(report.stored, 1);
    assert_eq!(harness.vectors.count(&server).await.unwrap(), 1);
}

#[tokio::test]
async fn restart_resumes_from_checkpoint_and_only_fetches_newer() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let server = ServerId::from("S1");

    harness
        .platform
        .push(message("1001", "first day", "2024-01-01T00:00:00Z"));

    let (engine, _) = harness.engine();
    engine
        .run_server(&server, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(harness.vectors.count(&server).await.unwrap(), 1);

    // "Shut down", a new message arrives, then restart with fresh state.
    harness
        .platform
        .push(message("1002", "second day", "2024-01-02T00:00:00Z"));
    let (engine, _) = harness.engine();
    let report = engine
        .run_server(&server, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stored, 1);
    assert_eq!(harness.vectors.count(&server).await.unwrap(), 2);

    // The second run passed the checkpoint as its lower bound.
    let bounds = harness.platform.seen_after.lock().unwrap();
    assert_eq!(bounds[0], None);
    assert_eq!(
        bounds[1].unwrap().to_rfc3339(),
        "2024-01-01T00:00:00+00:00"
    );
}

#[tokio::test]
async fn empty_messages_are_skipped_with_success() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let pipeline = harness.pipeline();

    let report = pipeline
        .process(vec![message("2001", "   ", "2024-01-01T00:00:00Z")])
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.stored, 0);
    assert_eq!(
        harness
            .vectors
            .count(&ServerId::from("S1"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn stop_policy_halts_only_the_affected_server() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    harness
        .configs
        .upsert(&ServerId::from("S2"), FailurePolicy::Stop, None)
        .unwrap();
    let pipeline = harness.pipeline();

    let batch = vec![
        message_in("S1", "1", "fine here", "2024-01-01T00:00:00Z"),
        message_in("S2", "2", "bad stamp", "not-a-timestamp"),
        message_in("S2", "3", "never reached", "2024-01-02T00:00:00Z"),
    ];
    let result = pipeline.process(batch).await;

    assert!(matches!(
        result,
        Err(scribe_pipeline::PipelineError::PolicyStop { .. })
    ));
    // The skip-policy server's message still landed.
    assert_eq!(harness.vectors.count(&ServerId::from("S1")).await.unwrap(), 1);
    // The stopped server committed nothing after the failure.
    assert_eq!(harness.vectors.count(&ServerId::from("S2")).await.unwrap(), 0);
}

#[tokio::test]
async fn unparseable_timestamp_drops_the_message() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let pipeline = harness.pipeline();

    let report = pipeline
        .process(vec![message("3001", "valid text", "not-a-timestamp")])
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.stored, 0);
}
