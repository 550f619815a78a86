use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatId, MessageId, MessageKind, UserId},
    protocol::{ChatSummary, MessagePayload, ReactionAction, ReactionGroup},
};
use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::task::ScheduledTask;

/// Quiet window after which a typing indicator expires absent a refresh.
pub const TYPING_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_seen_bucket: Option<String>,
}

pub struct TypingEntry {
    pub username: String,
    pub(crate) epoch: u64,
    pub(crate) expiry: Option<ScheduledTask>,
}

#[derive(Debug, Clone)]
pub struct PinnedMessage {
    pub message: MessagePayload,
    pub dismissed: bool,
}

/// Optimistic local entry for a message whose send is still in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutbound {
    pub tag: u64,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to_message_id: Option<MessageId>,
    pub queued_at: DateTime<Utc>,
}

/// Which slice of the store a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Chats,
    Messages(ChatId),
    Typing(ChatId),
    Presence(UserId),
    Receipts(ChatId),
}

#[derive(Default)]
pub struct StoreState {
    pub chats: Vec<ChatSummary>,
    pub messages: HashMap<ChatId, Vec<MessagePayload>>,
    pub last_seen: HashMap<ChatId, MessageId>,
    pub pinned: HashMap<ChatId, PinnedMessage>,
    pub typing: HashMap<ChatId, HashMap<UserId, TypingEntry>>,
    pub presence: HashMap<UserId, PresenceRecord>,
    pub read_receipts: HashMap<ChatId, HashMap<UserId, MessageId>>,
    pub pending_outbound: HashMap<ChatId, Vec<PendingOutbound>>,
}

impl StoreState {
    pub fn chat(&self, chat_id: ChatId) -> Option<&ChatSummary> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    pub fn chat_mut(&mut self, chat_id: ChatId) -> Option<&mut ChatSummary> {
        self.chats.iter_mut().find(|c| c.id == chat_id)
    }

    pub fn upsert_chat(&mut self, chat: ChatSummary) {
        match self.chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => self.chats.push(chat),
        }
    }

    pub fn replace_chats(&mut self, chats: Vec<ChatSummary>) {
        self.chats = chats;
    }

    /// Drops a chat and every piece of dependent state; typing expiry tasks
    /// are canceled by dropping their handles.
    pub fn remove_chat(&mut self, chat_id: ChatId) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != chat_id);
        self.messages.remove(&chat_id);
        self.last_seen.remove(&chat_id);
        self.pinned.remove(&chat_id);
        self.typing.remove(&chat_id);
        self.read_receipts.remove(&chat_id);
        self.pending_outbound.remove(&chat_id);
        self.chats.len() != before
    }

    /// Chats in display order: pinned first, then favorites, then recency.
    pub fn sorted_chats(&self) -> Vec<ChatSummary> {
        let mut chats = self.chats.clone();
        chats.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.is_favorite.cmp(&a.is_favorite))
                .then_with(|| {
                    let a_time = a.last_at.unwrap_or(a.updated_at);
                    let b_time = b.last_at.unwrap_or(b.updated_at);
                    b_time.cmp(&a_time)
                })
        });
        chats
    }

    pub fn messages(&self, chat_id: ChatId) -> &[MessagePayload] {
        self.messages.get(&chat_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn message(&self, chat_id: ChatId, message_id: MessageId) -> Option<&MessagePayload> {
        self.messages
            .get(&chat_id)
            .and_then(|list| list.iter().find(|m| m.id == message_id))
    }

    pub fn message_mut(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Option<&mut MessagePayload> {
        self.messages
            .get_mut(&chat_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
    }

    /// Inserts keeping the per-chat list sorted ascending by id. Duplicate
    /// identities are rejected; the high-water mark advances either way.
    pub fn insert_message(&mut self, message: MessagePayload) -> bool {
        let chat_id = message.chat_id;
        let high_water = self.last_seen.entry(chat_id).or_insert(MessageId(0));
        if message.id > *high_water {
            *high_water = message.id;
        }
        let list = self.messages.entry(chat_id).or_default();
        match list.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => false,
            Err(pos) => {
                list.insert(pos, message);
                true
            }
        }
    }

    /// Merges a fetched page, returning how many entries were new.
    pub fn merge_messages(&mut self, messages: Vec<MessagePayload>) -> usize {
        messages
            .into_iter()
            .filter(|m| self.insert_message(m.clone()))
            .count()
    }

    pub fn remove_message(&mut self, chat_id: ChatId, message_id: MessageId) -> bool {
        let Some(list) = self.messages.get_mut(&chat_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != message_id);
        list.len() != before
    }

    pub fn patch_message(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> bool {
        let mut patched = false;
        if let Some(message) = self.message_mut(chat_id, message_id) {
            message.content = content.to_string();
            message.updated_at = Some(updated_at);
            message.is_edited = true;
            patched = true;
        }
        if let Some(slot) = self.pinned.get_mut(&chat_id) {
            if slot.message.id == message_id {
                slot.message.content = content.to_string();
                slot.message.updated_at = Some(updated_at);
                slot.message.is_edited = true;
            }
        }
        patched
    }

    /// Reaction counter toward `(message, emoji)`. Counts clamp at zero and
    /// empty groups are pruned; `me` flips only when the actor is the local
    /// user.
    pub fn apply_reaction(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
        action: ReactionAction,
        is_me: bool,
    ) -> bool {
        let Some(message) = self.message_mut(chat_id, message_id) else {
            return false;
        };
        let reactions = message.reactions.get_or_insert_with(Vec::new);
        match action {
            ReactionAction::Added => {
                if let Some(group) = reactions.iter_mut().find(|r| r.emoji == emoji) {
                    group.count += 1;
                    if is_me {
                        group.me = true;
                    }
                } else {
                    reactions.push(ReactionGroup {
                        emoji: emoji.to_string(),
                        count: 1,
                        me: is_me,
                    });
                }
            }
            ReactionAction::Removed => {
                if let Some(group) = reactions.iter_mut().find(|r| r.emoji == emoji) {
                    group.count = group.count.saturating_sub(1);
                    if is_me {
                        group.me = false;
                    }
                }
                reactions.retain(|r| r.count > 0);
            }
        }
        if reactions.is_empty() {
            message.reactions = None;
        }
        true
    }

    /// Monotonic-only write: older or equal receipts are ignored.
    pub fn apply_read_receipt(
        &mut self,
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
    ) -> bool {
        let per_user = self.read_receipts.entry(chat_id).or_default();
        match per_user.get(&user_id) {
            Some(current) if *current >= message_id => false,
            _ => {
                per_user.insert(user_id, message_id);
                true
            }
        }
    }

    pub fn read_receipt(&self, chat_id: ChatId, user_id: UserId) -> Option<MessageId> {
        self.read_receipts
            .get(&chat_id)
            .and_then(|per_user| per_user.get(&user_id))
            .copied()
    }

    /// Idempotent: re-applying the currently held record is a no-op.
    pub fn set_presence(&mut self, user_id: UserId, record: PresenceRecord) -> bool {
        if self.presence.get(&user_id) == Some(&record) {
            return false;
        }
        self.presence.insert(user_id, record);
        true
    }

    pub fn presence(&self, user_id: UserId) -> Option<&PresenceRecord> {
        self.presence.get(&user_id)
    }

    /// Registers or refreshes a typing indicator, canceling any previous
    /// expiry task. Returns the entry epoch the new expiry must match.
    pub fn set_typing(&mut self, chat_id: ChatId, user_id: UserId, username: &str) -> u64 {
        let per_chat = self.typing.entry(chat_id).or_default();
        let entry = per_chat.entry(user_id).or_insert_with(|| TypingEntry {
            username: username.to_string(),
            epoch: 0,
            expiry: None,
        });
        entry.username = username.to_string();
        entry.epoch += 1;
        if let Some(previous) = entry.expiry.take() {
            previous.cancel();
        }
        entry.epoch
    }

    pub fn attach_typing_expiry(
        &mut self,
        chat_id: ChatId,
        user_id: UserId,
        epoch: u64,
        task: ScheduledTask,
    ) {
        if let Some(entry) = self
            .typing
            .get_mut(&chat_id)
            .and_then(|per_chat| per_chat.get_mut(&user_id))
        {
            if entry.epoch == epoch {
                entry.expiry = Some(task);
            }
        }
    }

    pub fn clear_typing(&mut self, chat_id: ChatId, user_id: UserId) -> bool {
        let Some(per_chat) = self.typing.get_mut(&chat_id) else {
            return false;
        };
        let removed = per_chat.remove(&user_id).is_some();
        if per_chat.is_empty() {
            self.typing.remove(&chat_id);
        }
        removed
    }

    /// Expiry-path clear: a refresh bumps the epoch, so a stale timer firing
    /// after a refresh must not remove the fresh entry.
    pub fn clear_typing_if_epoch(&mut self, chat_id: ChatId, user_id: UserId, epoch: u64) -> bool {
        let matches = self
            .typing
            .get(&chat_id)
            .and_then(|per_chat| per_chat.get(&user_id))
            .is_some_and(|entry| entry.epoch == epoch);
        if matches {
            self.clear_typing(chat_id, user_id)
        } else {
            false
        }
    }

    pub fn typing_usernames(&self, chat_id: ChatId) -> Vec<String> {
        self.typing
            .get(&chat_id)
            .map(|per_chat| per_chat.values().map(|e| e.username.clone()).collect())
            .unwrap_or_default()
    }

    pub fn set_pinned(&mut self, chat_id: ChatId, message: MessagePayload) {
        self.pinned.insert(
            chat_id,
            PinnedMessage {
                message,
                dismissed: false,
            },
        );
    }

    pub fn clear_pinned(&mut self, chat_id: ChatId) {
        self.pinned.remove(&chat_id);
    }

    pub fn dismiss_pinned(&mut self, chat_id: ChatId) {
        if let Some(slot) = self.pinned.get_mut(&chat_id) {
            slot.dismissed = true;
        }
    }

    pub fn pinned(&self, chat_id: ChatId) -> Option<&PinnedMessage> {
        self.pinned.get(&chat_id)
    }

    pub fn increment_unread(&mut self, chat_id: ChatId) {
        if let Some(chat) = self.chat_mut(chat_id) {
            chat.unread_count += 1;
        }
    }

    pub fn clear_unread(&mut self, chat_id: ChatId) {
        if let Some(chat) = self.chat_mut(chat_id) {
            chat.unread_count = 0;
        }
    }

    pub fn update_chat_preview(&mut self, message: &MessagePayload) {
        let preview = message.preview_text();
        if let Some(chat) = self.chat_mut(message.chat_id) {
            chat.last_message = Some(preview);
            chat.last_at = Some(message.created_at);
            chat.updated_at = message.created_at;
        }
    }

    pub fn last_seen(&self, chat_id: ChatId) -> Option<MessageId> {
        self.last_seen.get(&chat_id).copied()
    }

    /// Fills the cached reply-preview fields from the referenced message in
    /// the already-loaded list. Fields the server did supply are left alone.
    pub fn backfill_reply_preview(&self, message: &mut MessagePayload) {
        let Some(reply_to) = message.reply_to_message_id else {
            return;
        };
        let Some(original) = self.message(message.chat_id, reply_to) else {
            return;
        };
        if message.reply_to_sender_name.is_none() {
            message.reply_to_sender_name = Some(
                original
                    .sender_display_name
                    .clone()
                    .unwrap_or_else(|| original.sender_username.clone()),
            );
        }
        if message.reply_to_content.is_none() {
            message.reply_to_content = Some(original.preview_text());
        }
        if message.reply_to_kind.is_none() {
            message.reply_to_kind = Some(original.kind);
        }
    }

    pub fn push_pending(&mut self, chat_id: ChatId, pending: PendingOutbound) {
        self.pending_outbound.entry(chat_id).or_default().push(pending);
    }

    pub fn take_pending(&mut self, chat_id: ChatId, tag: u64) -> Option<PendingOutbound> {
        let list = self.pending_outbound.get_mut(&chat_id)?;
        let pos = list.iter().position(|p| p.tag == tag)?;
        let pending = list.remove(pos);
        if list.is_empty() {
            self.pending_outbound.remove(&chat_id);
        }
        Some(pending)
    }

    pub fn pending(&self, chat_id: ChatId) -> &[PendingOutbound] {
        self.pending_outbound
            .get(&chat_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// In-memory authoritative client-side state. Mutated only while holding the
/// lock, and never across an await point; observers are told what moved via
/// the change channel.
pub struct ChatStore {
    inner: Mutex<StoreState>,
    changed: broadcast::Sender<StoreChange>,
}

impl ChatStore {
    pub fn new() -> Arc<Self> {
        let (changed, _) = broadcast::channel(256);
        Arc::new(Self {
            inner: Mutex::new(StoreState::default()),
            changed,
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().await
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changed.subscribe()
    }

    pub(crate) fn notify(&self, change: StoreChange) {
        let _ = self.changed.send(change);
    }

    pub async fn chats(&self) -> Vec<ChatSummary> {
        self.inner.lock().await.sorted_chats()
    }

    pub async fn chat(&self, chat_id: ChatId) -> Option<ChatSummary> {
        self.inner.lock().await.chat(chat_id).cloned()
    }

    pub async fn chat_messages(&self, chat_id: ChatId) -> Vec<MessagePayload> {
        self.inner.lock().await.messages(chat_id).to_vec()
    }

    pub async fn typing_usernames(&self, chat_id: ChatId) -> Vec<String> {
        self.inner.lock().await.typing_usernames(chat_id)
    }

    pub async fn user_presence(&self, user_id: UserId) -> Option<PresenceRecord> {
        self.inner.lock().await.presence(user_id).cloned()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
