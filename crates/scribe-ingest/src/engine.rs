//! Ingestion Engine: discovers channels, fans out rate-governed history
//! fetches, merges the results into time-ordered batches, and feeds them
//! to the pipeline under backpressure. Live gateway messages flow through
//! the same sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scribe_core::config::{IngestConfig, PIPELINE_CHUNK};
use scribe_core::platform::ChatPlatform;
use scribe_core::sink::{BatchReport, BatchSink};
use scribe_core::types::{ChannelInfo, RawMessage, ServerId};
use scribe_core::ScribeError;
use scribe_store::ServerConfigStore;

use crate::error::{IngestError, Result};
use crate::governor::RateGovernor;
use crate::resume::ResumptionStore;

pub struct IngestionEngine {
    platform: Arc<dyn ChatPlatform>,
    governor: Arc<RateGovernor>,
    sink: Arc<dyn BatchSink>,
    configs: Arc<ServerConfigStore>,
    resume: Arc<ResumptionStore>,
    config: IngestConfig,
}

impl IngestionEngine {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        governor: Arc<RateGovernor>,
        sink: Arc<dyn BatchSink>,
        configs: Arc<ServerConfigStore>,
        resume: Arc<ResumptionStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            platform,
            governor,
            sink,
            configs,
            resume,
            config,
        }
    }

    /// Full-history fetch across `channels`, merged oldest first.
    pub async fn fetch_full_history(&self, channels: &[ChannelInfo]) -> Vec<RawMessage> {
        self.fetch_channels(channels, None).await
    }

    /// Fetch only messages created after `t`, merged oldest first.
    pub async fn fetch_after(
        &self,
        channels: &[ChannelInfo],
        t: DateTime<Utc>,
    ) -> Vec<RawMessage> {
        self.fetch_channels(channels, Some(t)).await
    }

    /// Fan out per-channel fetches through the Rate Governor, bounded by
    /// `concurrent_channels`. Channels that fail (missing permission, gone)
    /// are logged and skipped, never fatal.
    async fn fetch_channels(
        &self,
        channels: &[ChannelInfo],
        after: Option<DateTime<Utc>>,
    ) -> Vec<RawMessage> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_channels.max(1)));
        let per_channel = self.config.messages_per_fetch;
        let mut tasks = JoinSet::new();

        for channel in channels {
            let channel = channel.clone();
            let platform = Arc::clone(&self.platform);
            let governor = Arc::clone(&self.governor);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                let result = governor
                    .execute(|| platform.fetch_messages(&channel.id, per_channel, after))
                    .await;
                match result {
                    Ok(messages) => {
                        debug!(channel = %channel.id, count = messages.len(), "channel fetched");
                        messages
                    }
                    Err(e) => {
                        warn!(channel = %channel.id, error = %e, "channel fetch failed, skipping");
                        Vec::new()
                    }
                }
            });
        }

        let mut merged = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(messages) => merged.extend(messages),
                Err(e) => warn!(error = %e, "channel fetch task panicked"),
            }
        }

        merged.sort_by_key(|m| m.created_utc().unwrap_or(DateTime::<Utc>::MIN_UTC));
        merged
    }

    /// Cold-start one server: consult the checkpoint, fetch what is
    /// missing, and push it through the pipeline in bounded chunks.
    pub async fn run_server(
        &self,
        server: &ServerId,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        if !self.configs.is_configured(server) {
            warn!(server = %server, "server not configured, skipping ingest");
            return Ok(BatchReport::default());
        }

        let channels = {
            let platform = Arc::clone(&self.platform);
            let server = server.clone();
            self.governor
                .execute(move || {
                    let platform = Arc::clone(&platform);
                    let server = server.clone();
                    async move { platform.list_channels(&server).await }
                })
                .await?
        };

        let status = self.resume.status(server).await;
        info!(server = %server, ?status, channels = channels.len(), "ingest starting");

        let messages = match status.resume_from() {
            Some(t) => self.fetch_after(&channels, t).await,
            None => self.fetch_full_history(&channels).await,
        };
        info!(server = %server, fetched = messages.len(), "history fetched");

        self.dispatch(messages, cancel).await
    }

    /// Hand `messages` to the pipeline in chunks, waiting for each chunk's
    /// completion signal before sending the next (backpressure).
    pub async fn dispatch(
        &self,
        messages: Vec<RawMessage>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let mut totals = BatchReport::default();

        for chunk in messages.chunks(PIPELINE_CHUNK) {
            let (done_tx, done_rx) = oneshot::channel();
            let sink = Arc::clone(&self.sink);
            let batch = chunk.to_vec();
            tokio::spawn(async move { sink.submit(batch, done_tx).await });

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                outcome = done_rx => outcome,
            };

            match outcome {
                Ok(Ok(report)) => {
                    totals.stored += report.stored;
                    totals.skipped += report.skipped;
                    totals.dropped += report.dropped;
                }
                Ok(Err(e)) => return Err(IngestError::Pipeline(e)),
                Err(_) => {
                    return Err(IngestError::Pipeline(ScribeError::Storage(
                        "pipeline dropped the completion signal".to_string(),
                    )))
                }
            }
        }

        Ok(totals)
    }

    /// Subscribe to the live gateway stream and feed configured servers'
    /// messages through the pipeline, one completion-acknowledged batch at
    /// a time. Runs until cancelled.
    pub fn spawn_live(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = engine.platform.subscribe();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = stream.recv() => match received {
                        Ok(message) => engine.handle_live(message, &cancel).await,
                        Err(broadcast::error::RecvError::Lagged(lost)) => {
                            warn!(lost, "live stream lagged, messages missed");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("live ingest stopped");
        })
    }

    async fn handle_live(&self, message: RawMessage, cancel: &CancellationToken) {
        let Some(server) = message.server.as_ref().map(|s| s.id.clone()) else {
            return; // direct messages are command surface, not corpus
        };
        if !self.configs.is_configured(&server) {
            warn!(server = %server, "live message for unconfigured server dropped");
            return;
        }
        if let Err(e) = self.dispatch(vec![message], cancel).await {
            warn!(server = %server, error = %e, "live message processing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scribe_core::platform::{MessageRef, PlatformError};
    use scribe_core::types::{AuthorInfo, ChannelId, FailurePolicy, ServerInfo, UserId};
    use std::sync::Mutex as StdMutex;

    fn msg(id: &str, channel: &str, ts: &str) -> RawMessage {
        RawMessage {
            id: id.into(),
            content: format!("message {id}"),
            author: AuthorInfo {
                id: UserId::from("u1"),
                username: "ada".into(),
                display_name: None,
                global_name: None,
                nickname: None,
                bot: false,
            },
            channel: ChannelInfo {
                id: channel.into(),
                name: format!("chan-{channel}"),
                kind: "text".into(),
                category: None,
                position: None,
            },
            server: Some(ServerInfo {
                id: ServerId::from("s1"),
                name: "Test Server".into(),
                member_count: Some(2),
            }),
            created_at: ts.into(),
            edited_at: None,
            reply_to: None,
            attachments: Vec::new(),
            has_embeds: false,
            pinned: false,
        }
    }

    /// Platform stub: two channels with interleaved timestamps; records the
    /// `after` bound it was asked for.
    struct StubPlatform {
        seen_after: StdMutex<Vec<Option<DateTime<Utc>>>>,
        live: broadcast::Sender<RawMessage>,
    }

    impl StubPlatform {
        fn new() -> Self {
            let (live, _) = broadcast::channel(16);
            Self {
                seen_after: StdMutex::new(Vec::new()),
                live,
            }
        }
    }

    #[async_trait]
    impl ChatPlatform for StubPlatform {
        async fn list_channels(
            &self,
            _server: &ServerId,
        ) -> std::result::Result<Vec<ChannelInfo>, PlatformError> {
            Ok(vec![
                ChannelInfo {
                    id: "c1".into(),
                    name: "general".into(),
                    kind: "text".into(),
                    category: None,
                    position: Some(0),
                },
                ChannelInfo {
                    id: "c2".into(),
                    name: "random".into(),
                    kind: "text".into(),
                    category: None,
                    position: Some(1),
                },
            ])
        }

        async fn fetch_messages(
            &self,
            channel: &ChannelId,
            _limit: usize,
            after: Option<DateTime<Utc>>,
        ) -> std::result::Result<Vec<RawMessage>, PlatformError> {
            self.seen_after.lock().unwrap().push(after);
            let all = match channel.as_str() {
                "c1" => vec![
                    msg("1", "c1", "2024-01-01T00:00:00+00:00"),
                    msg("3", "c1", "2024-01-03T00:00:00+00:00"),
                ],
                _ => vec![msg("2", "c2", "2024-01-02T00:00:00+00:00")],
            };
            Ok(all
                .into_iter()
                .filter(|m| match after {
                    Some(t) => m.created_utc().unwrap() > t,
                    None => true,
                })
                .collect())
        }

        async fn send_message(
            &self,
            channel: &ChannelId,
            _text: &str,
        ) -> std::result::Result<MessageRef, PlatformError> {
            Ok(MessageRef {
                channel: channel.clone(),
                message: "m".into(),
            })
        }

        async fn edit_message(
            &self,
            _message: &MessageRef,
            _text: &str,
        ) -> std::result::Result<(), PlatformError> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<RawMessage> {
            self.live.subscribe()
        }
    }

    /// Sink that records batches and reports every message as stored.
    struct RecordingSink {
        batches: StdMutex<Vec<Vec<RawMessage>>>,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn submit(
            &self,
            batch: Vec<RawMessage>,
            done: oneshot::Sender<std::result::Result<BatchReport, ScribeError>>,
        ) {
            let stored = batch.len();
            self.batches.lock().unwrap().push(batch);
            let _ = done.send(Ok(BatchReport {
                stored,
                ..Default::default()
            }));
        }
    }

    fn configs_with_s1() -> Arc<ServerConfigStore> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        scribe_store::db::init_db(&conn).unwrap();
        let configs = Arc::new(ServerConfigStore::new(conn).unwrap());
        configs
            .upsert(&ServerId::from("s1"), FailurePolicy::Skip, None)
            .unwrap();
        configs
    }

    fn engine(
        platform: Arc<StubPlatform>,
        sink: Arc<RecordingSink>,
        configs: Arc<ServerConfigStore>,
        vectors_root: &std::path::Path,
    ) -> Arc<IngestionEngine> {
        let registry = Arc::new(scribe_vector::EmbedderRegistry::new(Arc::new(
            crate::testutil::StubRuntime,
        )));
        let vectors = Arc::new(scribe_vector::VectorStore::new(
            vectors_root,
            registry,
            Arc::clone(&configs),
            "stub-embed",
        ));
        Arc::new(IngestionEngine::new(
            platform,
            Arc::new(RateGovernor::new(100.0, 100, 3)),
            sink,
            configs,
            Arc::new(ResumptionStore::new(vectors)),
            IngestConfig::default(),
        ))
    }

    #[tokio::test]
    async fn cold_start_merges_channels_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(StubPlatform::new());
        let sink = Arc::new(RecordingSink {
            batches: StdMutex::new(Vec::new()),
        });
        let engine = engine(
            Arc::clone(&platform),
            Arc::clone(&sink),
            configs_with_s1(),
            dir.path(),
        );

        let report = engine
            .run_server(&ServerId::from("s1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stored, 3);

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn unconfigured_server_is_dropped_with_no_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(StubPlatform::new());
        let sink = Arc::new(RecordingSink {
            batches: StdMutex::new(Vec::new()),
        });
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        scribe_store::db::init_db(&conn).unwrap();
        let configs = Arc::new(ServerConfigStore::new(conn).unwrap());
        let engine = engine(Arc::clone(&platform), Arc::clone(&sink), configs, dir.path());

        let report = engine
            .run_server(&ServerId::from("s1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(sink.batches.lock().unwrap().is_empty());
        assert!(platform.seen_after.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_message_for_configured_server_reaches_sink() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(StubPlatform::new());
        let sink = Arc::new(RecordingSink {
            batches: StdMutex::new(Vec::new()),
        });
        let engine = engine(
            Arc::clone(&platform),
            Arc::clone(&sink),
            configs_with_s1(),
            dir.path(),
        );

        let cancel = CancellationToken::new();
        let handle = engine.spawn_live(cancel.clone());

        platform
            .live
            .send(msg("9", "c1", "2024-02-01T00:00:00+00:00"))
            .unwrap();

        // Yield until the live task has drained the event.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if !sink.batches.lock().unwrap().is_empty() {
                break;
            }
        }
        assert_eq!(sink.batches.lock().unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
