//! serenity model -> platform-neutral [`RawMessage`].

use serenity::model::channel::Message;

use scribe_core::types::{
    AttachmentInfo, AuthorInfo, ChannelInfo, MessageId, RawMessage, ServerInfo, UserId,
};

/// Convert a serenity message into the neutral form the core consumes.
///
/// `channel` and `server` come from the adapter's registry (REST messages
/// do not carry guild context themselves; gateway events do but are
/// normalized through the same path).
pub fn normalize_message(
    msg: &Message,
    channel: ChannelInfo,
    server: Option<ServerInfo>,
) -> RawMessage {
    let nickname = msg.member.as_ref().and_then(|m| m.nick.clone());

    RawMessage {
        id: MessageId(msg.id.to_string()),
        content: msg.content.clone(),
        author: AuthorInfo {
            id: UserId(msg.author.id.to_string()),
            username: msg.author.name.clone(),
            display_name: None,
            global_name: msg.author.global_name.clone(),
            nickname,
            bot: msg.author.bot,
        },
        channel,
        server,
        created_at: msg.timestamp.to_string(),
        edited_at: msg.edited_timestamp.map(|t| t.to_string()),
        reply_to: msg
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| MessageId(id.to_string())),
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentInfo {
                url: a.url.clone(),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
            })
            .collect(),
        has_embeds: !msg.embeds.is_empty(),
        pinned: msg.pinned,
    }
}
