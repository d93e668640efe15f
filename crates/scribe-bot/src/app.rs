//! Wiring: construct every subsystem once, run cold-start ingest, then
//! serve live events and DM questions until shutdown.
//!
//! Exit codes: 0 clean, 1 model warm-up failure, 2 platform login failure,
//! 3 storage init failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scribe_convo::{ConversationQueue, QueueWorker};
use scribe_core::config::ScribeConfig;
use scribe_core::platform::ChatPlatform;
use scribe_core::sink::BatchSink;
use scribe_core::types::FailurePolicy;
use scribe_discord::{CommandHandler, DiscordGateway, DiscordPlatform};
use scribe_ingest::{IngestionEngine, RateGovernor, ResumptionStore};
use scribe_model::runtime::ModelRuntime;
use scribe_model::{ModelManager, OllamaRuntime};
use scribe_pipeline::{Extractor, HttpWebFetcher, Pipeline, VisionDescriber};
use scribe_store::{ConversationLog, ServerConfigStore};
use scribe_vector::{EmbedderRegistry, VectorStore};

pub async fn run(config: ScribeConfig) -> i32 {
    // Storage first: without it nothing else matters.
    let root = PathBuf::from(&config.database.root);
    let configs = match open_configs(&root) {
        Ok(configs) => configs,
        Err(e) => {
            error!(error = %e, "storage init failed");
            return 3;
        }
    };
    let log = match scribe_store::db::open_shared(&root) {
        Ok(conn) => Arc::new(ConversationLog::new(conn)),
        Err(e) => {
            error!(error = %e, "storage init failed");
            return 3;
        }
    };

    // Models: text and vision must both warm or we refuse to start.
    let runtime: Arc<dyn ModelRuntime> = Arc::new(OllamaRuntime::new(Some(
        config.models.runtime_url.clone(),
    )));
    let manager = match ModelManager::warm_up(
        Arc::clone(&runtime),
        &config.models.text,
        &config.models.vision,
    )
    .await
    {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "model warm-up failed");
            return 1;
        }
    };

    let registry = Arc::new(EmbedderRegistry::new(Arc::clone(&runtime)));
    if let Err(e) = registry.preload(&config.models.embedding).await {
        // Per-server fallback handles this later, but say so now.
        warn!(model = %config.models.embedding, error = %e, "default embedder preload failed");
    }
    let vectors = Arc::new(VectorStore::new(
        root.clone(),
        registry,
        Arc::clone(&configs),
        config.models.embedding.clone(),
    ));

    // Platform login.
    let platform = Arc::new(DiscordPlatform::new(&config.discord.token));
    match platform.verify_login().await {
        Ok(name) => info!(bot = %name, "platform login ok"),
        Err(e) => {
            error!(error = %e, "platform login failed");
            return 2;
        }
    }

    if let Ok(report) = manager.health_check_both().await {
        info!(
            text = %report.text.model,
            text_ms = report.text.elapsed_ms,
            vision = %report.vision.model,
            vision_ms = report.vision.elapsed_ms,
            healthy = report.all_healthy(),
            "model health"
        );
    }

    let cancel = CancellationToken::new();

    // Conversation side: queue + single worker.
    let queue = Arc::new(ConversationQueue::new(config.queue.capacity));
    let worker = Arc::new(QueueWorker::new(
        Arc::clone(&queue),
        Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        Arc::clone(&runtime),
        Arc::clone(&vectors),
        Arc::clone(&log),
        manager.text_model_name(),
        config.queue.clone(),
    ));
    let worker_handle = worker.spawn(cancel.child_token());

    // Processing pipeline.
    let extractor = Extractor::new(
        Arc::new(HttpWebFetcher::new()),
        Arc::clone(&runtime),
        manager.text_model_name(),
        config.pipeline.summary_token_budget,
    );
    let vision = VisionDescriber::new(
        Arc::clone(&runtime),
        manager.vision_model_name(),
        config.pipeline.max_image_bytes,
    );
    let pipeline = Arc::new(Pipeline::new(
        extractor,
        vision,
        Arc::clone(&vectors),
        Arc::clone(&configs),
        config.ingest.on_failure,
    ));

    // Ingestion.
    let governor = Arc::new(RateGovernor::new(
        config.rate.rps,
        config.rate.burst,
        config.rate.max_retries,
    ));
    let resume = Arc::new(ResumptionStore::new(Arc::clone(&vectors)));
    let engine = Arc::new(IngestionEngine::new(
        Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        governor,
        Arc::clone(&pipeline) as Arc<dyn BatchSink>,
        Arc::clone(&configs),
        resume,
        config.ingest.clone(),
    ));

    // Command surface + gateway.
    let ingest_live = Arc::new(AtomicBool::new(false));
    let commands = Arc::new(CommandHandler::new(
        config.discord.command_prefix.clone(),
        Arc::clone(&queue),
        Arc::clone(&log),
        Arc::clone(&configs),
        Arc::clone(&platform),
        Arc::clone(&ingest_live),
    ));
    let gateway = DiscordGateway::new(
        config.discord.token.clone(),
        Arc::clone(&platform),
        commands,
    );
    let gateway_handle = tokio::spawn(gateway.run(cancel.child_token()));

    // Live events start flowing before backfill so nothing is missed;
    // duplicate deliveries are absorbed by idempotent upserts.
    let live_handle = engine.spawn_live(cancel.child_token());
    ingest_live.store(true, Ordering::Relaxed);

    for server_config in configs.list().unwrap_or_default() {
        let server = server_config.server_id.clone();
        if cancel.is_cancelled() {
            break;
        }
        match engine.run_server(&server, &cancel).await {
            Ok(report) => info!(
                server = %server,
                stored = report.stored,
                skipped = report.skipped,
                dropped = report.dropped,
                "server ingest complete"
            ),
            Err(e) => warn!(server = %server, error = %e, "server ingest halted"),
        }
    }
    info!("startup complete, serving");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = cancel.cancelled() => {}
    }

    ingest_live.store(false, Ordering::Relaxed);
    cancel.cancel();
    let _ = worker_handle.await;
    let _ = live_handle.await;
    let _ = gateway_handle.await;
    info!("shutdown complete");
    0
}

fn open_configs(root: &PathBuf) -> scribe_store::Result<Arc<ServerConfigStore>> {
    let conn = scribe_store::db::open_shared(root)?;
    Ok(Arc::new(ServerConfigStore::new(conn)?))
}

/// `scribe setup`: write a server's row in `server_configs`. The bot only
/// ingests and answers for servers registered this way.
pub fn setup(
    config: &ScribeConfig,
    server: &str,
    on_failure: &str,
    embedding_model: Option<&str>,
) -> i32 {
    let policy: FailurePolicy = match on_failure.parse() {
        Ok(policy) => policy,
        Err(e) => {
            error!(error = %e, "invalid --on-failure");
            return 1;
        }
    };

    let root = PathBuf::from(&config.database.root);
    let configs = match open_configs(&root) {
        Ok(configs) => configs,
        Err(e) => {
            error!(error = %e, "storage init failed");
            return 3;
        }
    };

    match configs.upsert(
        &scribe_core::types::ServerId::from(server),
        policy,
        embedding_model,
    ) {
        Ok(row) => {
            info!(
                server = %row.server_id,
                on_failure = %row.on_failure,
                embedding_model = row.embedding_model.as_deref().unwrap_or("(default)"),
                "server configured"
            );
            0
        }
        Err(e) => {
            error!(error = %e, "server setup failed");
            3
        }
    }
}
