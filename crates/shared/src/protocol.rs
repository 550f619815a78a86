use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChatId, ChatKind, FileId, MemberRole, MessageId, MessageKind, PresenceStatus, StickerId,
    UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_display_name: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_role: Option<MemberRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: u32,
    #[serde(default)]
    pub me: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<StickerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_sender_name: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<ReactionGroup>>,
}

impl MessagePayload {
    /// One-line preview shown in the chat list for this message.
    pub fn preview_text(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }
        match self.kind {
            MessageKind::Sticker => "Sticker".to_string(),
            MessageKind::Voice => "Voice message".to_string(),
            MessageKind::File => "Attachment".to_string(),
            MessageKind::Text => String::new(),
        }
    }
}

/// Frames the client writes to the duplex connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String, active: bool },
    Subscribe { chat_id: ChatId },
    Ping,
    Typing { chat_id: ChatId },
    PresenceUpdate { active: bool },
}

/// Frames the server pushes over the duplex connection, tagged by `type`.
///
/// `message` is flat on the wire (the frame is the message object plus the
/// tag); chat-level events nest their payload under a named key so the tag
/// never collides with a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk {
        user_id: UserId,
    },
    Subscribed {
        chat_id: ChatId,
    },
    Pong,
    Message {
        #[serde(flatten)]
        message: MessagePayload,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    },
    Presence {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<PresenceStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_bucket: Option<String>,
    },
    MessageDeleted {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MessageUpdated {
        chat_id: ChatId,
        message_id: MessageId,
        content: String,
        updated_at: DateTime<Utc>,
    },
    MessagePinned {
        message: MessagePayload,
    },
    MessageUnpinned {
        chat_id: ChatId,
    },
    Reaction {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        action: ReactionAction,
    },
    ReadReceipt {
        chat_id: ChatId,
        user_id: UserId,
        last_read_message_id: MessageId,
    },
    ChatCreated {
        chat: ChatSummary,
    },
    ChatUpdated {
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    ChatDeleted {
        chat_id: ChatId,
    },
    ChatMemberJoined {
        chat_id: ChatId,
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    ChatMemberLeft {
        chat_id: ChatId,
        user_id: UserId,
    },
    UserProfileUpdated {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Error {
        message: String,
    },
}
