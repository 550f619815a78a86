use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatId, PresenceStatus, UserId},
    protocol::{MessagePayload, ServerFrame},
};

use crate::store::{PresenceRecord, StoreState};

/// What the user is currently looking at; fed by the embedding shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub active_chat: Option<ChatId>,
    pub at_bottom: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active_chat: None,
            at_bottom: true,
        }
    }
}

/// Snapshot of everything outside the store that a reconciliation decision
/// may depend on. Built once per inbound frame.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    pub self_user_id: Option<UserId>,
    pub view: ViewState,
    pub locally_active: bool,
    pub notifications_enabled: bool,
    pub now: DateTime<Utc>,
}

impl ReconcileContext {
    fn is_self(&self, user_id: UserId) -> bool {
        self.self_user_id == Some(user_id)
    }

    /// The combined "counts as read immediately" predicate: the message lands
    /// in the chat that is the active one, the viewport is at the bottom, and
    /// the local user is presently active.
    fn is_watching(&self, chat_id: ChatId) -> bool {
        self.view.active_chat == Some(chat_id) && self.view.at_bottom && self.locally_active
    }
}

/// Deferred side effects a reconciliation step asks the connection manager to
/// perform. The dispatcher itself never awaits.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ScheduleMarkRead(ChatId),
    Notify {
        chat_id: ChatId,
        title: String,
        body: String,
    },
    ArmTypingExpiry {
        chat_id: ChatId,
        user_id: UserId,
        epoch: u64,
    },
    Subscribe(ChatId),
    ChatRemoved(ChatId),
}

/// Applies one inbound server frame to the store.
///
/// Connection-control frames (`auth_ok`, `subscribed`, `pong`, `error`) are
/// consumed by the connection manager before reaching this dispatcher; their
/// arms exist so the match stays exhaustive when the protocol grows.
pub fn apply(state: &mut StoreState, frame: ServerFrame, ctx: &ReconcileContext) -> Vec<Effect> {
    match frame {
        ServerFrame::Message { message } => apply_message(state, message, ctx),
        ServerFrame::Typing {
            chat_id,
            user_id,
            username,
        } => {
            if ctx.is_self(user_id) {
                return Vec::new();
            }
            let epoch = state.set_typing(chat_id, user_id, &username);
            vec![Effect::ArmTypingExpiry {
                chat_id,
                user_id,
                epoch,
            }]
        }
        ServerFrame::Presence {
            user_id,
            status,
            last_seen_at,
            last_seen_bucket,
            ..
        } => {
            let online = status == Some(PresenceStatus::Online);
            // Identical consecutive status for the same user is dropped.
            if state.presence(user_id).map(|p| p.online) == Some(online) {
                return Vec::new();
            }
            let last_seen_at = if online {
                None
            } else {
                // Offline without a server-supplied timestamp: approximate
                // with the client clock unless a coarse bucket was given.
                last_seen_at.or_else(|| last_seen_bucket.is_none().then_some(ctx.now))
            };
            state.set_presence(
                user_id,
                PresenceRecord {
                    online,
                    last_seen_at,
                    last_seen_bucket,
                },
            );
            Vec::new()
        }
        ServerFrame::MessageDeleted {
            chat_id,
            message_id,
        } => {
            state.remove_message(chat_id, message_id);
            if state.pinned(chat_id).is_some_and(|p| p.message.id == message_id) {
                state.clear_pinned(chat_id);
            }
            Vec::new()
        }
        ServerFrame::MessageUpdated {
            chat_id,
            message_id,
            content,
            updated_at,
        } => {
            state.patch_message(chat_id, message_id, &content, updated_at);
            Vec::new()
        }
        ServerFrame::MessagePinned { message } => {
            state.set_pinned(message.chat_id, message);
            Vec::new()
        }
        ServerFrame::MessageUnpinned { chat_id } => {
            state.clear_pinned(chat_id);
            Vec::new()
        }
        ServerFrame::Reaction {
            chat_id,
            message_id,
            user_id,
            emoji,
            action,
        } => {
            state.apply_reaction(chat_id, message_id, &emoji, action, ctx.is_self(user_id));
            Vec::new()
        }
        ServerFrame::ReadReceipt {
            chat_id,
            user_id,
            last_read_message_id,
        } => {
            state.apply_read_receipt(chat_id, user_id, last_read_message_id);
            Vec::new()
        }
        ServerFrame::ChatCreated { chat } => {
            let chat_id = chat.id;
            state.upsert_chat(chat);
            vec![Effect::Subscribe(chat_id)]
        }
        ServerFrame::ChatUpdated {
            chat_id,
            title,
            description,
        } => {
            if let Some(chat) = state.chat_mut(chat_id) {
                if let Some(title) = title {
                    chat.title = Some(title);
                }
                if let Some(description) = description {
                    chat.description = Some(description);
                }
            }
            Vec::new()
        }
        ServerFrame::ChatDeleted { chat_id } => {
            if state.remove_chat(chat_id) {
                vec![Effect::ChatRemoved(chat_id)]
            } else {
                Vec::new()
            }
        }
        ServerFrame::ChatMemberJoined { chat_id, .. } => {
            if let Some(chat) = state.chat_mut(chat_id) {
                if let Some(count) = chat.member_count.as_mut() {
                    *count += 1;
                }
            }
            Vec::new()
        }
        ServerFrame::ChatMemberLeft { chat_id, user_id } => {
            if ctx.is_self(user_id) {
                // Our own membership was revoked; the chat goes away locally.
                if state.remove_chat(chat_id) {
                    return vec![Effect::ChatRemoved(chat_id)];
                }
                return Vec::new();
            }
            if let Some(chat) = state.chat_mut(chat_id) {
                if let Some(count) = chat.member_count.as_mut() {
                    *count = count.saturating_sub(1);
                }
            }
            Vec::new()
        }
        ServerFrame::UserProfileUpdated {
            user_id,
            display_name,
            username,
        } => {
            for chat in state.chats.iter_mut() {
                if chat.other_user_id == Some(user_id) {
                    if let Some(display_name) = display_name.clone() {
                        chat.other_display_name = Some(display_name);
                    }
                    if let Some(username) = username.clone() {
                        chat.other_username = Some(username);
                    }
                }
            }
            Vec::new()
        }
        ServerFrame::AuthOk { .. }
        | ServerFrame::Subscribed { .. }
        | ServerFrame::Pong
        | ServerFrame::Error { .. } => Vec::new(),
    }
}

fn apply_message(
    state: &mut StoreState,
    mut message: MessagePayload,
    ctx: &ReconcileContext,
) -> Vec<Effect> {
    let chat_id = message.chat_id;
    let sender_id = message.sender_id;
    let from_self = ctx.is_self(sender_id);

    // The creation endpoint does not echo enriched reply data; fill the
    // cached preview fields from the referenced message before insertion.
    state.backfill_reply_preview(&mut message);

    if !state.insert_message(message.clone()) {
        // Duplicate delivery; the first copy already did all the bookkeeping.
        return Vec::new();
    }
    state.update_chat_preview(&message);

    if from_self {
        return Vec::new();
    }

    state.clear_typing(chat_id, sender_id);

    let mut effects = Vec::new();
    if ctx.is_watching(chat_id) {
        state.clear_unread(chat_id);
        effects.push(Effect::ScheduleMarkRead(chat_id));
    } else {
        state.increment_unread(chat_id);
        let muted = state.chat(chat_id).is_some_and(|c| c.is_muted);
        if ctx.notifications_enabled && !muted {
            effects.push(Effect::Notify {
                chat_id,
                title: notification_title(state, &message),
                body: message.preview_text(),
            });
        }
    }
    effects
}

fn notification_title(state: &StoreState, message: &MessagePayload) -> String {
    let sender = message
        .sender_display_name
        .clone()
        .unwrap_or_else(|| message.sender_username.clone());
    match state.chat(message.chat_id).and_then(|c| c.title.clone()) {
        Some(title) => format!("{sender} ({title})"),
        None => sender,
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
