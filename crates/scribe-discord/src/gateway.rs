//! Gateway runner: drives the serenity client, normalizes live guild
//! messages into the platform subscription, and routes direct messages to
//! the command handler. Reconnects whenever the gateway drops.

use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::prelude::{Context, EventHandler};
use serenity::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scribe_core::types::{ChannelId, ChannelInfo, ServerId, ServerInfo, UserId};

use crate::adapter::DiscordPlatform;
use crate::commands::CommandHandler;
use crate::normalize::normalize_message;

struct Handler {
    platform: Arc<DiscordPlatform>,
    commands: Arc<CommandHandler>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(name = %ready.user.name, servers = ready.guilds.len(), "gateway connected");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        match msg.guild_id {
            None => {
                let user = UserId(msg.author.id.to_string());
                let channel = ChannelId(msg.channel_id.to_string());
                self.commands.handle_dm(user, channel, &msg.content).await;
            }
            Some(guild_id) => {
                let channel_num = msg.channel_id.get();
                let (channel_info, server_info) = self.platform.channel_context(channel_num);

                // Channels created after startup are not in the registry
                // yet; fall back to the gateway cache.
                let channel_info = channel_info.unwrap_or_else(|| {
                    let name = ctx
                        .cache
                        .guild(guild_id)
                        .and_then(|g| g.channels.get(&msg.channel_id).map(|c| c.name.clone()))
                        .unwrap_or_else(|| msg.channel_id.to_string());
                    ChannelInfo {
                        id: ChannelId(msg.channel_id.to_string()),
                        name,
                        kind: "text".to_string(),
                        category: None,
                        position: None,
                    }
                });
                let server_info = server_info.unwrap_or_else(|| {
                    let name = ctx
                        .cache
                        .guild(guild_id)
                        .map(|g| g.name.clone())
                        .unwrap_or_else(|| guild_id.to_string());
                    ServerInfo {
                        id: ServerId(guild_id.to_string()),
                        name,
                        member_count: None,
                    }
                });
                self.platform
                    .register_channel(channel_info.clone(), server_info.clone());

                let raw = normalize_message(&msg, channel_info, Some(server_info));
                self.platform.publish_live(raw);
            }
        }
    }
}

pub struct DiscordGateway {
    token: String,
    platform: Arc<DiscordPlatform>,
    commands: Arc<CommandHandler>,
}

impl DiscordGateway {
    pub fn new(
        token: impl Into<String>,
        platform: Arc<DiscordPlatform>,
        commands: Arc<CommandHandler>,
    ) -> Self {
        Self {
            token: token.into(),
            platform,
            commands,
        }
    }

    /// Connect and keep reconnecting until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        loop {
            let mut client = match self.build_client(intents).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "gateway client build failed, retrying in 30s");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(30)) => continue,
                    }
                }
            };

            info!("gateway connecting");
            let shard_manager = client.shard_manager.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    shard_manager.shutdown_all().await;
                    info!("gateway shut down");
                    return;
                }
                result = client.start() => {
                    match result {
                        Ok(()) => info!("gateway stopped cleanly, reconnecting in 5s"),
                        Err(e) => warn!(error = %e, "gateway error, reconnecting in 5s"),
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        Client::builder(&self.token, intents)
            .event_handler(Handler {
                platform: Arc::clone(&self.platform),
                commands: Arc::clone(&self.commands),
            })
            .await
    }
}
