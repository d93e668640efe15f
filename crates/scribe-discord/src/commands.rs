//! Direct-message command surface: `ask`, `status`, `clear-history`, `help`.
//!
//! Guild messages never reach this module; they are corpus, not commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use scribe_convo::{ConversationQueue, ConversationRequest, QueueError};
use scribe_core::platform::ChatPlatform;
use scribe_core::types::{ChannelId, ServerId, UserId};
use scribe_store::{ConversationLog, ServerConfigStore};

use crate::adapter::DiscordPlatform;

const QUEUE_FULL_REPLY: &str = "Server is busy.";

pub struct CommandHandler {
    prefix: String,
    queue: Arc<ConversationQueue>,
    log: Arc<ConversationLog>,
    configs: Arc<ServerConfigStore>,
    platform: Arc<DiscordPlatform>,
    ingest_live: Arc<AtomicBool>,
    /// Last server each user asked about; the default target for
    /// tag-less commands when several servers are configured.
    last_target: DashMap<String, ServerId>,
}

impl CommandHandler {
    pub fn new(
        prefix: impl Into<String>,
        queue: Arc<ConversationQueue>,
        log: Arc<ConversationLog>,
        configs: Arc<ServerConfigStore>,
        platform: Arc<DiscordPlatform>,
        ingest_live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            queue,
            log,
            configs,
            platform,
            ingest_live,
            last_target: DashMap::new(),
        }
    }

    /// Handle one direct message. Anything not carrying the command prefix
    /// gets the help text.
    pub async fn handle_dm(&self, user: UserId, channel: ChannelId, content: &str) {
        let content = content.trim();
        let Some(rest) = content.strip_prefix(&self.prefix) else {
            self.reply(&channel, &self.help_text()).await;
            return;
        };

        let (command, args) = match rest.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (rest, ""),
        };

        debug!(user = %user, command, "dm command");
        match command {
            "ask" => self.cmd_ask(user, channel, args).await,
            "status" => self.cmd_status(&channel).await,
            "clear-history" => self.cmd_clear_history(user, &channel).await,
            _ => self.reply(&channel, &self.help_text()).await,
        }
    }

    async fn cmd_ask(&self, user: UserId, channel: ChannelId, args: &str) {
        if args.is_empty() {
            self.reply(
                &channel,
                &format!("Usage: {}ask [server] <question>", self.prefix),
            )
            .await;
            return;
        }

        // The first token is a server tag when it names a configured
        // server; otherwise the whole text is the question.
        let (server, question) = match args.split_once(char::is_whitespace) {
            Some((first, rest)) if !rest.trim().is_empty() => {
                match self.match_server_tag(first) {
                    Some(server) => (Ok(server), rest.trim()),
                    None => (self.default_server(&user), args),
                }
            }
            _ => (self.default_server(&user), args),
        };

        let server = match server {
            Ok(s) => s,
            Err(reply) => {
                self.reply(&channel, &reply).await;
                return;
            }
        };

        // One status message that morphs through the request's lifecycle.
        let display = match self
            .platform
            .send_message(&channel, "Looking into it…")
            .await
        {
            Ok(display) => display,
            Err(e) => {
                warn!(user = %user, error = %e, "could not send status message");
                return;
            }
        };

        let mut request =
            ConversationRequest::new(user.clone(), server.clone(), question, channel.clone());
        request.status_display = Some(display.clone());

        match self.queue.submit(request) {
            Ok(position) => {
                self.last_target.insert(user.as_str().to_string(), server);
                let _ = self
                    .platform
                    .edit_message(&display, &format!("Queued (position {position})."))
                    .await;
            }
            Err(QueueError::Full { .. }) => {
                let _ = self.platform.edit_message(&display, QUEUE_FULL_REPLY).await;
            }
            Err(QueueError::AlreadyActive { position }) => {
                let text = match position {
                    Some(n) => {
                        format!("You already have a request in flight (position {n}).")
                    }
                    None => "You already have a request in flight.".to_string(),
                };
                let _ = self.platform.edit_message(&display, &text).await;
            }
        }
    }

    async fn cmd_status(&self, channel: &ChannelId) {
        let stats = self.queue.stats();
        let live = if self.ingest_live.load(Ordering::Relaxed) {
            "live"
        } else {
            "stopped"
        };
        let text = format!(
            "Queue: {} waiting, {} processing. Indexing: {}. Answered {}, failed {}.",
            stats.queued, stats.processing, live, stats.completed, stats.failed
        );
        self.reply(channel, &text).await;
    }

    async fn cmd_clear_history(&self, user: UserId, channel: &ChannelId) {
        let server = match self.default_server(&user) {
            Ok(s) => s,
            Err(reply) => {
                self.reply(channel, &reply).await;
                return;
            }
        };
        match self.log.purge(&user, &server) {
            Ok(removed) => {
                let name = self
                    .platform
                    .server_name(&server)
                    .unwrap_or_else(|| server.to_string());
                self.reply(
                    channel,
                    &format!("Cleared {removed} conversation turns for {name}."),
                )
                .await;
            }
            Err(e) => {
                warn!(user = %user, error = %e, "history purge failed");
                self.reply(channel, "Could not clear your history right now.")
                    .await;
            }
        }
    }

    /// Match an explicit tag against configured servers by id or name
    /// (case-insensitive).
    fn match_server_tag(&self, tag: &str) -> Option<ServerId> {
        let candidate = ServerId::from(tag);
        if self.configs.is_configured(&candidate) {
            return Some(candidate);
        }
        self.platform
            .known_servers()
            .into_iter()
            .find(|(id, name)| {
                name.eq_ignore_ascii_case(tag) && self.configs.is_configured(id)
            })
            .map(|(id, _)| id)
    }

    /// Resolve the target server when no tag was given: the sole
    /// configured server, else the user's most recent ask target.
    fn default_server(&self, user: &UserId) -> Result<ServerId, String> {
        let configured = self.configs.list().unwrap_or_default();
        match configured.len() {
            0 => Err("No servers are set up for questions yet.".to_string()),
            1 => Ok(configured[0].server_id.clone()),
            _ => self
                .last_target
                .get(user.as_str())
                .map(|e| e.value().clone())
                .ok_or_else(|| {
                    let names: Vec<String> = configured
                        .iter()
                        .map(|c| {
                            self.platform
                                .server_name(&c.server_id)
                                .unwrap_or_else(|| c.server_id.to_string())
                        })
                        .collect();
                    format!(
                        "Several servers are indexed ({}). Start with `{}ask <server> <question>`.",
                        names.join(", "),
                        self.prefix
                    )
                }),
        }
    }

    async fn reply(&self, channel: &ChannelId, text: &str) {
        if let Err(e) = self.platform.send_message(channel, text).await {
            warn!(channel = %channel, error = %e, "dm reply failed");
        }
    }

    fn help_text(&self) -> String {
        format!(
            "Commands:\n\
             `{p}ask [server] <question>` - ask about a server's history\n\
             `{p}status` - queue depth and indexing state\n\
             `{p}clear-history` - forget our conversation for the active server",
            p = self.prefix
        )
    }
}
