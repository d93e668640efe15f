//! Metadata Normalizer: pure mapping from a raw platform message to the
//! canonical string-valued metadata pairs stored alongside each record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use scribe_core::types::RawMessage;

use crate::error::PipelineError;

/// Canonical metadata for one message plus its parsed UTC timestamp.
pub struct Normalized {
    pub metadata: BTreeMap<String, String>,
    /// UTC ISO form, also stored under the `timestamp` key.
    pub timestamp: String,
}

/// Normalize a message's identity and display fields.
///
/// A timestamp that does not parse drops the whole record: a record is
/// never stored without a valid timestamp.
pub fn normalize(message: &RawMessage) -> Result<Normalized, PipelineError> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&message.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            PipelineError::Parse(format!(
                "message {} has unparseable timestamp {:?}: {}",
                message.id, message.created_at, e
            ))
        })?;
    let timestamp = parsed.to_rfc3339();

    let mut metadata = BTreeMap::new();
    metadata.insert("message_id".to_string(), message.id.to_string());
    metadata.insert("channel_id".to_string(), message.channel.id.to_string());
    metadata.insert("channel_name".to_string(), message.channel.name.clone());
    metadata.insert("author_id".to_string(), message.author.id.to_string());
    metadata.insert(
        "author_name".to_string(),
        message.author.friendly_name().to_string(),
    );
    metadata.insert("username".to_string(), message.author.username.clone());
    metadata.insert("timestamp".to_string(), timestamp.clone());

    if let Some(server) = &message.server {
        metadata.insert("server_id".to_string(), server.id.to_string());
        metadata.insert("server_name".to_string(), server.name.clone());
    }
    if let Some(reply_to) = &message.reply_to {
        metadata.insert("reply_to".to_string(), reply_to.to_string());
    }

    Ok(Normalized {
        metadata,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::types::{AuthorInfo, ChannelInfo, ServerId, ServerInfo, UserId};

    fn message(ts: &str) -> RawMessage {
        RawMessage {
            id: "1001".into(),
            content: "hello".into(),
            author: AuthorInfo {
                id: UserId::from("7"),
                username: "ada_l".into(),
                display_name: Some("Ada".into()),
                global_name: None,
                nickname: None,
                bot: false,
            },
            channel: ChannelInfo {
                id: "55".into(),
                name: "general".into(),
                kind: "text".into(),
                category: None,
                position: Some(0),
            },
            server: Some(ServerInfo {
                id: ServerId::from("S1"),
                name: "Workshop".into(),
                member_count: Some(12),
            }),
            created_at: ts.into(),
            edited_at: None,
            reply_to: None,
            attachments: Vec::new(),
            has_embeds: false,
            pinned: false,
        }
    }

    #[test]
    fn normalizes_ids_names_and_timestamp() {
        let n = normalize(&message("2024-01-01T05:30:00+05:30")).unwrap();
        assert_eq!(n.metadata["message_id"], "1001");
        assert_eq!(n.metadata["author_name"], "Ada");
        assert_eq!(n.metadata["username"], "ada_l");
        assert_eq!(n.metadata["channel_name"], "general");
        assert_eq!(n.metadata["server_id"], "S1");
        // Offset timestamps land in UTC.
        assert_eq!(n.timestamp, "2024-01-01T00:00:00+00:00");
        assert_eq!(n.metadata["timestamp"], n.timestamp);
    }

    #[test]
    fn unparseable_timestamp_drops_the_record() {
        let result = normalize(&message("yesterday-ish"));
        assert!(matches!(result, Err(PipelineError::Parse(_))));
    }

    #[test]
    fn missing_server_block_omits_server_metadata() {
        let mut m = message("2024-01-01T00:00:00Z");
        m.server = None;
        let n = normalize(&m).unwrap();
        assert!(!n.metadata.contains_key("server_id"));
        assert!(!n.metadata.contains_key("server_name"));
    }
}
