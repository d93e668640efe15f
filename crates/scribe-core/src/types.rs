use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(
    /// Opaque platform identifier for a server (guild). Compared by equality only.
    ServerId
);
id_type!(
    /// Opaque platform identifier for a channel.
    ChannelId
);
id_type!(
    /// Opaque platform identifier for a user.
    UserId
);
id_type!(
    /// Opaque platform identifier for a message.
    MessageId
);

/// Author block of a [`RawMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub global_name: Option<String>,
    /// Per-server nickname, when the message came from a guild.
    pub nickname: Option<String>,
    pub bot: bool,
}

impl AuthorInfo {
    /// Friendly name resolution: display name > global name > nickname >
    /// username > "Unknown".
    pub fn friendly_name(&self) -> &str {
        for candidate in [
            self.display_name.as_deref(),
            self.global_name.as_deref(),
            self.nickname.as_deref(),
            Some(self.username.as_str()),
        ]
        .into_iter()
        .flatten()
        {
            if !candidate.is_empty() {
                return candidate;
            }
        }
        "Unknown"
    }
}

/// Channel block of a [`RawMessage`]; also returned by channel discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    /// Platform channel kind (e.g. "text", "voice", "thread").
    pub kind: String,
    pub category: Option<String>,
    pub position: Option<u16>,
}

/// Server block of a [`RawMessage`]; absent for direct messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ServerId,
    pub name: String,
    pub member_count: Option<u64>,
}

/// A single attachment descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
}

impl AttachmentInfo {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

/// One message as delivered by the chat platform, before any processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub content: String,
    pub author: AuthorInfo,
    pub channel: ChannelInfo,
    /// Absent for direct messages.
    pub server: Option<ServerInfo>,
    /// RFC-3339 creation timestamp, with timezone.
    pub created_at: String,
    pub edited_at: Option<String>,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<AttachmentInfo>,
    pub has_embeds: bool,
    pub pinned: bool,
}

impl RawMessage {
    /// Parse the creation timestamp. Messages with unparseable timestamps
    /// are dropped by the normalizer, so most callers can rely on this.
    pub fn created_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Per-server reaction to a message-level processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failed message and keep going.
    #[default]
    Skip,
    /// Surface the first error; the server's ingest must halt.
    Stop,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Stop => write!(f, "stop"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "skip" => Ok(FailurePolicy::Skip),
            "stop" => Ok(FailurePolicy::Stop),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}
