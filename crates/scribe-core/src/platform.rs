//! Chat-platform contract: the only surface the core consumes from the
//! hosting chat service. `scribe-discord` provides the serenity-backed
//! implementation; tests substitute in-memory stubs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ChannelId, ChannelInfo, MessageId, RawMessage, ServerId};

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform rejected the call for rate reasons. `retry_after` is
    /// the server-provided hint when present.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("platform call timed out")]
    Timeout,
}

/// Handle to a message the bot itself sent; lets the worker edit a status
/// display in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: MessageId,
}

/// Contract consumed from the chat platform SDK.
///
/// All fetch operations are suspendable; implementations map the
/// platform's rate-limit responses to [`PlatformError::RateLimited`] so
/// the Rate Governor can retry with the server-provided delay.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// List the indexable channels of a server. Channels the bot cannot
    /// read are included; fetch failures on them are handled per channel.
    async fn list_channels(&self, server: &ServerId)
        -> Result<Vec<ChannelInfo>, PlatformError>;

    /// Fetch up to `limit` messages from a channel, oldest first.
    /// `after` is an exclusive lower bound on creation time.
    async fn fetch_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawMessage>, PlatformError>;

    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
    ) -> Result<MessageRef, PlatformError>;

    async fn edit_message(&self, message: &MessageRef, text: &str)
        -> Result<(), PlatformError>;

    /// Subscribe to the live gateway stream. Every inbound guild message is
    /// published here after normalization; the subscription survives
    /// gateway reconnects.
    fn subscribe(&self) -> broadcast::Receiver<RawMessage>;
}
