//! serenity-backed implementation of the chat-platform contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::builder::{EditMessage, GetMessages};
use serenity::http::Http;
use serenity::model::channel::ChannelType;
use serenity::model::id::{ChannelId as DiscordChannelId, GuildId, MessageId as DiscordMessageId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use scribe_core::platform::{ChatPlatform, MessageRef, PlatformError};
use scribe_core::types::{ChannelId, ChannelInfo, MessageId, RawMessage, ServerId, ServerInfo};

use crate::normalize::normalize_message;
use crate::send::split_chunks;

/// Discord snowflakes embed milliseconds since this epoch in their top bits.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
/// Discord's hard page size for the messages endpoint.
const PAGE_SIZE: usize = 100;
/// Live messages buffered for slow subscribers before they lag.
const LIVE_BUFFER: usize = 1024;

/// The smallest snowflake created strictly after `t`.
pub(crate) fn snowflake_after(t: DateTime<Utc>) -> u64 {
    let ms = (t.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    (ms + 1) << 22
}

pub struct DiscordPlatform {
    http: Arc<Http>,
    live_tx: broadcast::Sender<RawMessage>,
    /// channel id -> channel block, filled by `list_channels` and gateway events.
    channels: DashMap<u64, ChannelInfo>,
    /// channel id -> owning server block.
    channel_servers: DashMap<u64, ServerInfo>,
    /// server id -> display name, for command-side tag resolution.
    servers: DashMap<String, String>,
}

impl DiscordPlatform {
    pub fn new(token: &str) -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            http: Arc::new(Http::new(token)),
            live_tx,
            channels: DashMap::new(),
            channel_servers: DashMap::new(),
            servers: DashMap::new(),
        }
    }

    pub fn http(&self) -> Arc<Http> {
        Arc::clone(&self.http)
    }

    /// Verify the credential by fetching the bot's own user.
    pub async fn verify_login(&self) -> Result<String, PlatformError> {
        let user = self
            .http
            .get_current_user()
            .await
            .map_err(map_serenity_error)?;
        Ok(user.name.clone())
    }

    /// Servers seen so far, as (id, name) pairs.
    pub fn known_servers(&self) -> Vec<(ServerId, String)> {
        self.servers
            .iter()
            .map(|e| (ServerId(e.key().clone()), e.value().clone()))
            .collect()
    }

    pub fn server_name(&self, server: &ServerId) -> Option<String> {
        self.servers.get(server.as_str()).map(|e| e.value().clone())
    }

    /// Record context for a channel so REST-fetched messages can be
    /// normalized with their server and channel blocks.
    pub(crate) fn register_channel(&self, channel: ChannelInfo, server: ServerInfo) {
        if let Ok(id) = channel.id.as_str().parse::<u64>() {
            self.servers
                .insert(server.id.as_str().to_string(), server.name.clone());
            self.channels.insert(id, channel);
            self.channel_servers.insert(id, server);
        }
    }

    pub(crate) fn channel_context(&self, channel_id: u64) -> (Option<ChannelInfo>, Option<ServerInfo>) {
        (
            self.channels.get(&channel_id).map(|e| e.value().clone()),
            self.channel_servers.get(&channel_id).map(|e| e.value().clone()),
        )
    }

    pub(crate) fn publish_live(&self, message: RawMessage) {
        // Send fails only when nobody is subscribed yet; that is fine.
        let _ = self.live_tx.send(message);
    }
}

fn map_serenity_error(e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_err) = &e {
        if let serenity::http::HttpError::UnsuccessfulRequest(resp) = http_err {
            return match resp.status_code.as_u16() {
                429 => PlatformError::RateLimited { retry_after: None },
                403 => PlatformError::Forbidden(resp.error.message.clone()),
                404 => PlatformError::NotFound(resp.error.message.clone()),
                _ => PlatformError::Transport(e.to_string()),
            };
        }
    }
    PlatformError::Transport(e.to_string())
}

fn parse_id(raw: &str) -> Result<u64, PlatformError> {
    raw.parse::<u64>()
        .map_err(|_| PlatformError::Transport(format!("malformed id: {raw}")))
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn list_channels(
        &self,
        server: &ServerId,
    ) -> Result<Vec<ChannelInfo>, PlatformError> {
        let guild_id = GuildId::new(parse_id(server.as_str())?);

        let guild = self
            .http
            .get_guild(guild_id)
            .await
            .map_err(map_serenity_error)?;
        let server_info = ServerInfo {
            id: server.clone(),
            name: guild.name.clone(),
            member_count: guild.approximate_member_count,
        };

        let all = self
            .http
            .get_channels(guild_id)
            .await
            .map_err(map_serenity_error)?;

        let categories: HashMap<_, _> = all
            .iter()
            .filter(|c| c.kind == ChannelType::Category)
            .map(|c| (c.id, c.name.clone()))
            .collect();

        let mut channels = Vec::new();
        for channel in all {
            if !matches!(channel.kind, ChannelType::Text | ChannelType::News) {
                continue;
            }
            let info = ChannelInfo {
                id: ChannelId(channel.id.to_string()),
                name: channel.name.clone(),
                kind: channel.kind.name().to_string(),
                category: channel
                    .parent_id
                    .and_then(|p| categories.get(&p).cloned()),
                position: u16::try_from(channel.position).ok(),
            };
            self.register_channel(info.clone(), server_info.clone());
            channels.push(info);
        }

        debug!(server = %server, channels = channels.len(), "channels listed");
        Ok(channels)
    }

    async fn fetch_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>, PlatformError> {
        let channel_num = parse_id(channel.as_str())?;
        let discord_channel = DiscordChannelId::new(channel_num);
        let (channel_info, server_info) = self.channel_context(channel_num);
        let channel_info = channel_info.unwrap_or_else(|| ChannelInfo {
            id: channel.clone(),
            name: channel.to_string(),
            kind: "text".to_string(),
            category: None,
            position: None,
        });

        let mut anchor = after.map(snowflake_after).unwrap_or(0).max(1);
        let mut collected: Vec<RawMessage> = Vec::new();

        while collected.len() < limit {
            let want = (limit - collected.len()).min(PAGE_SIZE) as u8;
            let builder = GetMessages::new()
                .after(DiscordMessageId::new(anchor))
                .limit(want);
            let mut page = discord_channel
                .messages(&self.http, builder)
                .await
                .map_err(map_serenity_error)?;
            if page.is_empty() {
                break;
            }

            // Discord returns newest-first; we paginate oldest-first.
            page.sort_by_key(|m| m.id);
            anchor = page.last().map(|m| m.id.get()).unwrap_or(anchor);

            let short_page = page.len() < usize::from(want);
            for msg in &page {
                collected.push(normalize_message(
                    msg,
                    channel_info.clone(),
                    server_info.clone(),
                ));
            }
            if short_page {
                break;
            }
        }

        debug!(channel = %channel, fetched = collected.len(), "messages fetched");
        Ok(collected)
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
    ) -> Result<MessageRef, PlatformError> {
        let discord_channel = DiscordChannelId::new(parse_id(channel.as_str())?);
        let mut first: Option<MessageRef> = None;
        for chunk in split_chunks(text) {
            let sent = discord_channel
                .say(&self.http, &chunk)
                .await
                .map_err(map_serenity_error)?;
            if first.is_none() {
                first = Some(MessageRef {
                    channel: channel.clone(),
                    message: MessageId(sent.id.to_string()),
                });
            }
        }
        first.ok_or_else(|| PlatformError::Transport("empty message not sent".to_string()))
    }

    async fn edit_message(
        &self,
        message: &MessageRef,
        text: &str,
    ) -> Result<(), PlatformError> {
        let discord_channel = DiscordChannelId::new(parse_id(message.channel.as_str())?);
        let discord_message = DiscordMessageId::new(parse_id(message.message.as_str())?);
        discord_channel
            .edit_message(
                &self.http,
                discord_message,
                EditMessage::new().content(text),
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!(error = %e, "status edit failed");
                map_serenity_error(e)
            })
    }

    fn subscribe(&self) -> broadcast::Receiver<RawMessage> {
        self.live_tx.subscribe()
    }
}
