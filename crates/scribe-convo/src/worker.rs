//! Queue Worker: pops requests, runs the tool-calling loop under a
//! deadline, persists both turns, and always records a terminal state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scribe_core::config::QueueConfig;
use scribe_core::platform::ChatPlatform;
use scribe_model::runtime::{ChatMessage, ChatOptions, ModelRuntime, RuntimeError};
use scribe_store::{ConversationLog, ConversationTurn, TurnRole};
use scribe_vector::VectorStore;

use crate::queue::{ConversationQueue, ConversationRequest};
use crate::search::SearchTool;
use crate::tool_loop::{run_tool_loop, LoopOutcome};

const PROCESSING_STATUS: &str = "Processing your question…";
const TIMEOUT_REPLY: &str = "Request took too long. Try a simpler question.";
const ERROR_REPLY: &str = "Something went wrong processing your request.";
const TIMEOUT_TURN: &str = "request timeout";
const ERROR_TURN: &str = "processing error";

/// History context pulled into each answer.
const HISTORY_TURNS: usize = 20;
const HISTORY_DAYS: u32 = 30;

fn system_prompt(answer_char_budget: usize) -> String {
    format!(
        "You answer questions about a chat server's message history. \
         Use the search_messages tool to find relevant messages before \
         answering; cite authors and channels when it helps. If the history \
         has no answer, say so plainly. Keep your answer under \
         {answer_char_budget} characters."
    )
}

pub struct QueueWorker {
    queue: Arc<ConversationQueue>,
    platform: Arc<dyn ChatPlatform>,
    runtime: Arc<dyn ModelRuntime>,
    vectors: Arc<VectorStore>,
    log: Arc<ConversationLog>,
    text_model: String,
    config: QueueConfig,
    /// Tags every turn written during this worker's lifetime (UUIDv7 so
    /// runs sort chronologically in the log).
    session_tag: String,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<ConversationQueue>,
        platform: Arc<dyn ChatPlatform>,
        runtime: Arc<dyn ModelRuntime>,
        vectors: Arc<VectorStore>,
        log: Arc<ConversationLog>,
        text_model: impl Into<String>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            platform,
            runtime,
            vectors,
            log,
            text_model: text_model.into(),
            config,
            session_tag: uuid::Uuid::now_v7().to_string(),
        }
    }

    /// Run the worker loop until `cancel` fires. A suspended pop aborts
    /// immediately on shutdown; an in-flight request is recorded Failed.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = cancel.cancelled() => break,
                    request = self.queue.pop() => request,
                };
                self.handle(request, &cancel).await;
            }
            info!("queue worker stopped");
        })
    }

    async fn handle(&self, request: ConversationRequest, cancel: &CancellationToken) {
        if let Some(display) = &request.status_display {
            let _ = self.platform.edit_message(display, PROCESSING_STATUS).await;
        }

        // History is read before the new turn lands so the prompt does not
        // see the question twice.
        let history = self
            .log
            .history(
                &request.user_id,
                &request.server_id,
                HISTORY_TURNS,
                Some(HISTORY_DAYS),
            )
            .unwrap_or_default();

        let mut user_turn = ConversationTurn::now(
            request.user_id.clone(),
            request.server_id.clone(),
            TurnRole::User,
            &request.message,
        );
        user_turn.session_tag = Some(self.session_tag.clone());
        if let Err(e) = self.log.append(&user_turn) {
            warn!(user = %request.user_id, error = %e, "failed to log user turn");
        }

        let deadline = Duration::from_secs(self.config.request_timeout_s);
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                // Partial output is discarded on shutdown.
                warn!(user = %request.user_id, "request cancelled by shutdown");
                self.queue.complete(&request.user_id, false);
                return;
            }
            outcome = tokio::time::timeout(deadline, self.answer(&request, history)) => outcome,
        };

        match outcome {
            Ok(Ok(answer)) => {
                self.append_assistant(&request, &answer);
                self.deliver(&request, &answer).await;
                self.queue.complete(&request.user_id, true);
            }
            Ok(Err(e)) => {
                warn!(user = %request.user_id, error = %e, "request processing failed");
                self.append_assistant(&request, ERROR_TURN);
                self.deliver(&request, ERROR_REPLY).await;
                self.queue.complete(&request.user_id, false);
            }
            Err(_elapsed) => {
                warn!(
                    user = %request.user_id,
                    timeout_s = self.config.request_timeout_s,
                    "request timed out"
                );
                self.append_assistant(&request, TIMEOUT_TURN);
                self.deliver(&request, TIMEOUT_REPLY).await;
                self.queue.complete(&request.user_id, false);
            }
        }
    }

    async fn answer(
        &self,
        request: &ConversationRequest,
        history: Vec<ConversationTurn>,
    ) -> Result<String, RuntimeError> {
        let mut messages =
            vec![ChatMessage::system(system_prompt(self.config.answer_char_budget))];
        for turn in history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content),
                TurnRole::Assistant => ChatMessage::assistant(turn.content),
            });
        }
        messages.push(ChatMessage::user(&request.message));

        let tool = SearchTool::new(Arc::clone(&self.vectors), request.server_id.clone());
        let outcome = run_tool_loop(
            self.runtime.as_ref(),
            &self.text_model,
            &tool,
            messages,
            ChatOptions::default(),
            self.config.max_tool_iterations,
        )
        .await;

        match outcome {
            LoopOutcome::Final(content) | LoopOutcome::IterationCapped(content)
                if !content.trim().is_empty() =>
            {
                Ok(content)
            }
            LoopOutcome::Errored(e) => Err(e),
            _ => Err(RuntimeError::Parse(
                "model produced no answer content".to_string(),
            )),
        }
    }

    fn append_assistant(&self, request: &ConversationRequest, content: &str) {
        let mut turn = ConversationTurn::now(
            request.user_id.clone(),
            request.server_id.clone(),
            TurnRole::Assistant,
            content,
        );
        turn.session_tag = Some(self.session_tag.clone());
        if let Err(e) = self.log.append(&turn) {
            warn!(user = %request.user_id, error = %e, "failed to log assistant turn");
        }
    }

    async fn deliver(&self, request: &ConversationRequest, text: &str) {
        if let Err(e) = self
            .platform
            .send_message(&request.reply_channel, text)
            .await
        {
            warn!(user = %request.user_id, error = %e, "failed to deliver reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use scribe_core::platform::{MessageRef, PlatformError};
    use scribe_core::types::{ChannelId, ChannelInfo, RawMessage, ServerId, UserId};
    use scribe_model::runtime::{ChatRequest, ChatResponse, ModelHealth};
    use scribe_vector::EmbedderRegistry;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;

    struct RecordingPlatform {
        sent: StdMutex<Vec<(String, String)>>,
        edited: StdMutex<Vec<(String, String)>>,
        live: broadcast::Sender<RawMessage>,
    }

    impl RecordingPlatform {
        fn new() -> Self {
            let (live, _) = broadcast::channel(4);
            Self {
                sent: StdMutex::new(Vec::new()),
                edited: StdMutex::new(Vec::new()),
                live,
            }
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        async fn list_channels(
            &self,
            _server: &ServerId,
        ) -> Result<Vec<ChannelInfo>, PlatformError> {
            Ok(Vec::new())
        }
        async fn fetch_messages(
            &self,
            _channel: &ChannelId,
            _limit: usize,
            _after: Option<DateTime<Utc>>,
        ) -> Result<Vec<RawMessage>, PlatformError> {
            Ok(Vec::new())
        }
        async fn send_message(
            &self,
            channel: &ChannelId,
            text: &str,
        ) -> Result<MessageRef, PlatformError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), text.to_string()));
            Ok(MessageRef {
                channel: channel.clone(),
                message: "sent".into(),
            })
        }
        async fn edit_message(
            &self,
            message: &MessageRef,
            text: &str,
        ) -> Result<(), PlatformError> {
            self.edited
                .lock()
                .unwrap()
                .push((message.message.to_string(), text.to_string()));
            Ok(())
        }
        fn subscribe(&self) -> broadcast::Receiver<RawMessage> {
            self.live.subscribe()
        }
    }

    /// Chat either answers instantly or sleeps past any deadline.
    struct TestRuntime {
        slow: bool,
    }

    #[async_trait]
    impl ModelRuntime for TestRuntime {
        fn name(&self) -> &str {
            "test"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, RuntimeError> {
            if self.slow {
                tokio::time::sleep(Duration::from_secs(120)).await;
            }
            Ok(ChatResponse {
                content: "All good.".into(),
                model: "m".into(),
                tokens_in: 1,
                tokens_out: 1,
                done_reason: "stop".into(),
                tool_calls: Vec::new(),
            })
        }
        async fn describe_image(
            &self,
            _m: &str,
            _b: &[u8],
            _p: &str,
        ) -> Result<String, RuntimeError> {
            unimplemented!("not used")
        }
        async fn embed(
            &self,
            _m: &str,
            documents: &[String],
        ) -> Result<Vec<Vec<f32>>, RuntimeError> {
            Ok(documents.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        async fn ensure_available(&self, _m: &str) -> Result<(), RuntimeError> {
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

    struct Harness {
        queue: Arc<ConversationQueue>,
        platform: Arc<RecordingPlatform>,
        log: Arc<ConversationLog>,
        worker: Arc<QueueWorker>,
        _dir: tempfile::TempDir,
    }

    fn harness(slow: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let runtime: Arc<dyn ModelRuntime> = Arc::new(TestRuntime { slow });

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        scribe_store::db::init_db(&conn).unwrap();
        let configs = Arc::new(scribe_store::ServerConfigStore::new(conn).unwrap());

        let log_conn = rusqlite::Connection::open_in_memory().unwrap();
        scribe_store::db::init_db(&log_conn).unwrap();
        let log = Arc::new(ConversationLog::new(log_conn));

        let registry = Arc::new(EmbedderRegistry::new(Arc::clone(&runtime)));
        let vectors = Arc::new(VectorStore::new(
            dir.path(),
            registry,
            configs,
            "stub-embed",
        ));

        let queue = Arc::new(ConversationQueue::new(10));
        let platform = Arc::new(RecordingPlatform::new());
        let worker = Arc::new(QueueWorker::new(
            Arc::clone(&queue),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            runtime,
            vectors,
            Arc::clone(&log),
            "test-model",
            QueueConfig::default(),
        ));

        Harness {
            queue,
            platform,
            log,
            worker,
            _dir: dir,
        }
    }

    fn request(with_display: bool) -> ConversationRequest {
        let mut request = ConversationRequest::new(
            UserId::from("u1"),
            ServerId::from("s1"),
            "what happened yesterday?",
            ChannelId::from("dm-1"),
        );
        if with_display {
            request.status_display = Some(MessageRef {
                channel: ChannelId::from("dm-1"),
                message: "status-1".into(),
            });
        }
        request
    }

    /// Sleeping (rather than yielding) lets the paused clock auto-advance
    /// to the worker's pending timers.
    async fn wait_for_terminal(queue: &ConversationQueue) {
        for _ in 0..200 {
            let stats = queue.stats();
            if stats.completed + stats.failed > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("request never reached a terminal state");
    }

    #[tokio::test(start_paused = true)]
    async fn success_path_delivers_answer_and_logs_turns() {
        let h = harness(false);
        h.queue.submit(request(true)).unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&h.worker).spawn(cancel.clone());
        wait_for_terminal(&h.queue).await;

        let sent = h.platform.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dm-1");
        assert_eq!(sent[0].1, "All good.");

        let edited = h.platform.edited.lock().unwrap().clone();
        assert_eq!(edited[0].1, PROCESSING_STATUS);

        let turns = h
            .log
            .history(&UserId::from("u1"), &ServerId::from("s1"), 10, None)
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].content, "All good.");

        assert_eq!(h.queue.stats().completed, 1);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_path_notifies_user_and_records_failed() {
        let h = harness(true); // model sleeps 120s, timeout is 60s
        h.queue.submit(request(false)).unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&h.worker).spawn(cancel.clone());
        wait_for_terminal(&h.queue).await;

        let sent = h.platform.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, TIMEOUT_REPLY);

        let turns = h
            .log
            .history(&UserId::from("u1"), &ServerId::from("s1"), 10, None)
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, TIMEOUT_TURN);

        assert_eq!(h.queue.stats().failed, 1);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_aborts_suspended_pop_immediately() {
        let h = harness(false);
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&h.worker).spawn(cancel.clone());

        tokio::task::yield_now().await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not observe shutdown within 1s")
            .unwrap();
    }
}
