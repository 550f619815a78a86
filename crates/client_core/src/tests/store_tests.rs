use super::*;
use chrono::TimeZone;
use shared::domain::ChatKind;

fn ts(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap()
}

fn chat(id: i64) -> ChatSummary {
    ChatSummary {
        id: ChatId(id),
        kind: ChatKind::Direct,
        title: None,
        description: None,
        other_user_id: Some(UserId(900 + id)),
        other_username: Some(format!("user{id}")),
        other_display_name: None,
        is_favorite: false,
        is_muted: false,
        is_pinned: false,
        is_archived: false,
        unread_count: 0,
        last_message: None,
        last_at: None,
        updated_at: ts(0),
        member_count: None,
        my_role: None,
    }
}

fn message(chat_id: i64, id: i64, sender_id: i64) -> MessagePayload {
    MessagePayload {
        id: MessageId(id),
        chat_id: ChatId(chat_id),
        sender_id: UserId(sender_id),
        sender_username: format!("user{sender_id}"),
        sender_display_name: None,
        kind: MessageKind::Text,
        content: format!("message {id}"),
        sticker_id: None,
        file_id: None,
        duration_seconds: None,
        reply_to_message_id: None,
        reply_to_content: None,
        reply_to_kind: None,
        reply_to_sender_name: None,
        is_edited: false,
        updated_at: None,
        created_at: ts(id),
        reactions: None,
    }
}

#[test]
fn insert_keeps_list_sorted_and_unique_under_reordered_duplicates() {
    let mut state = StoreState::default();
    for id in [3, 1, 2, 3, 1, 5, 4, 5] {
        state.insert_message(message(7, id, 42));
    }
    let ids: Vec<i64> = state.messages(ChatId(7)).iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(state.last_seen(ChatId(7)), Some(MessageId(5)));
}

#[test]
fn high_water_mark_advances_even_for_duplicate_delivery() {
    let mut state = StoreState::default();
    assert!(state.insert_message(message(7, 10, 42)));
    assert!(!state.insert_message(message(7, 10, 42)));
    assert_eq!(state.last_seen(ChatId(7)), Some(MessageId(10)));
}

#[test]
fn merge_messages_counts_only_new_entries() {
    let mut state = StoreState::default();
    state.insert_message(message(7, 1, 42));
    let added = state.merge_messages(vec![message(7, 1, 42), message(7, 2, 42), message(7, 3, 42)]);
    assert_eq!(added, 2);
    assert_eq!(state.messages(ChatId(7)).len(), 3);
}

#[test]
fn reaction_add_remove_pairs_converge_to_absent_entry() {
    let mut state = StoreState::default();
    state.insert_message(message(7, 1, 42));
    let chat = ChatId(7);
    let id = MessageId(1);

    state.apply_reaction(chat, id, "👍", ReactionAction::Added, false);
    state.apply_reaction(chat, id, "🔥", ReactionAction::Added, true);
    state.apply_reaction(chat, id, "👍", ReactionAction::Added, true);
    state.apply_reaction(chat, id, "👍", ReactionAction::Removed, true);
    state.apply_reaction(chat, id, "👍", ReactionAction::Removed, false);
    state.apply_reaction(chat, id, "🔥", ReactionAction::Removed, true);

    assert_eq!(state.message(chat, id).unwrap().reactions, None);
}

#[test]
fn reaction_count_clamps_at_zero() {
    let mut state = StoreState::default();
    state.insert_message(message(7, 1, 42));
    state.apply_reaction(ChatId(7), MessageId(1), "👍", ReactionAction::Added, false);
    state.apply_reaction(ChatId(7), MessageId(1), "👍", ReactionAction::Removed, false);
    state.apply_reaction(ChatId(7), MessageId(1), "👍", ReactionAction::Removed, false);
    assert_eq!(state.message(ChatId(7), MessageId(1)).unwrap().reactions, None);
}

#[test]
fn reaction_me_flag_tracks_only_the_acting_user() {
    let mut state = StoreState::default();
    state.insert_message(message(7, 1, 42));
    state.apply_reaction(ChatId(7), MessageId(1), "👍", ReactionAction::Added, false);
    let groups = state
        .message(ChatId(7), MessageId(1))
        .unwrap()
        .reactions
        .clone()
        .unwrap();
    assert!(!groups[0].me);

    state.apply_reaction(ChatId(7), MessageId(1), "👍", ReactionAction::Added, true);
    let groups = state
        .message(ChatId(7), MessageId(1))
        .unwrap()
        .reactions
        .clone()
        .unwrap();
    assert!(groups[0].me);
    assert_eq!(groups[0].count, 2);
}

#[test]
fn read_receipts_never_decrease() {
    let mut state = StoreState::default();
    assert!(state.apply_read_receipt(ChatId(7), UserId(5), MessageId(10)));
    assert!(!state.apply_read_receipt(ChatId(7), UserId(5), MessageId(10)));
    assert!(!state.apply_read_receipt(ChatId(7), UserId(5), MessageId(4)));
    assert_eq!(state.read_receipt(ChatId(7), UserId(5)), Some(MessageId(10)));
    assert!(state.apply_read_receipt(ChatId(7), UserId(5), MessageId(11)));
}

#[test]
fn presence_reapplying_same_record_is_a_noop() {
    let mut state = StoreState::default();
    let record = PresenceRecord {
        online: true,
        last_seen_at: None,
        last_seen_bucket: None,
    };
    assert!(state.set_presence(UserId(5), record.clone()));
    assert!(!state.set_presence(UserId(5), record));
    assert!(state.set_presence(
        UserId(5),
        PresenceRecord {
            online: false,
            last_seen_at: Some(ts(100)),
            last_seen_bucket: None,
        }
    ));
}

#[test]
fn stale_typing_expiry_does_not_clear_a_refreshed_entry() {
    let mut state = StoreState::default();
    let first = state.set_typing(ChatId(7), UserId(5), "alice");
    let second = state.set_typing(ChatId(7), UserId(5), "alice");
    assert!(second > first);
    // the timer armed for the first epoch fires late
    assert!(!state.clear_typing_if_epoch(ChatId(7), UserId(5), first));
    assert_eq!(state.typing_usernames(ChatId(7)), vec!["alice".to_string()]);
    assert!(state.clear_typing_if_epoch(ChatId(7), UserId(5), second));
    assert!(state.typing_usernames(ChatId(7)).is_empty());
}

#[test]
fn sorted_chats_orders_pinned_then_favorite_then_recency() {
    let mut state = StoreState::default();
    let mut recent = chat(1);
    recent.last_at = Some(ts(500));
    let mut stale = chat(2);
    stale.last_at = Some(ts(100));
    let mut favorite = chat(3);
    favorite.is_favorite = true;
    favorite.last_at = Some(ts(50));
    let mut pinned = chat(4);
    pinned.is_pinned = true;
    pinned.last_at = Some(ts(10));
    for c in [recent, stale, favorite, pinned] {
        state.upsert_chat(c);
    }
    let order: Vec<i64> = state.sorted_chats().iter().map(|c| c.id.0).collect();
    assert_eq!(order, vec![4, 3, 1, 2]);
}

#[test]
fn backfill_fills_only_missing_reply_fields() {
    let mut state = StoreState::default();
    let mut original = message(7, 10, 42);
    original.sender_display_name = Some("Alice".to_string());
    original.content = "hi".to_string();
    state.insert_message(original);

    let mut reply = message(7, 12, 5);
    reply.reply_to_message_id = Some(MessageId(10));
    reply.reply_to_content = Some("server supplied".to_string());
    state.backfill_reply_preview(&mut reply);

    assert_eq!(reply.reply_to_sender_name.as_deref(), Some("Alice"));
    assert_eq!(reply.reply_to_content.as_deref(), Some("server supplied"));
    assert_eq!(reply.reply_to_kind, Some(MessageKind::Text));
}

#[test]
fn backfill_without_loaded_original_leaves_fields_alone() {
    let state = StoreState::default();
    let mut reply = message(7, 12, 5);
    reply.reply_to_message_id = Some(MessageId(10));
    state.backfill_reply_preview(&mut reply);
    assert_eq!(reply.reply_to_sender_name, None);
    assert_eq!(reply.reply_to_content, None);
}

#[test]
fn removing_a_chat_drops_all_dependent_state() {
    let mut state = StoreState::default();
    state.upsert_chat(chat(7));
    state.insert_message(message(7, 1, 42));
    state.set_typing(ChatId(7), UserId(5), "alice");
    state.apply_read_receipt(ChatId(7), UserId(5), MessageId(1));
    state.set_pinned(ChatId(7), message(7, 1, 42));

    assert!(state.remove_chat(ChatId(7)));
    assert!(state.messages(ChatId(7)).is_empty());
    assert!(state.typing_usernames(ChatId(7)).is_empty());
    assert_eq!(state.read_receipt(ChatId(7), UserId(5)), None);
    assert!(state.pinned(ChatId(7)).is_none());
    assert_eq!(state.last_seen(ChatId(7)), None);
}

#[test]
fn patch_message_marks_edit_state_and_updates_pinned_copy() {
    let mut state = StoreState::default();
    state.insert_message(message(7, 1, 42));
    state.set_pinned(ChatId(7), message(7, 1, 42));

    assert!(state.patch_message(ChatId(7), MessageId(1), "edited", ts(99)));
    let patched = state.message(ChatId(7), MessageId(1)).unwrap();
    assert!(patched.is_edited);
    assert_eq!(patched.content, "edited");
    assert_eq!(patched.updated_at, Some(ts(99)));
    assert_eq!(state.pinned(ChatId(7)).unwrap().message.content, "edited");
}

#[test]
fn pending_outbound_entries_resolve_by_tag() {
    let mut state = StoreState::default();
    state.push_pending(
        ChatId(7),
        PendingOutbound {
            tag: 1,
            kind: MessageKind::Text,
            content: "draft".to_string(),
            reply_to_message_id: None,
            queued_at: ts(0),
        },
    );
    assert_eq!(state.pending(ChatId(7)).len(), 1);
    assert!(state.take_pending(ChatId(7), 1).is_some());
    assert!(state.take_pending(ChatId(7), 1).is_none());
    assert!(state.pending(ChatId(7)).is_empty());
}

#[tokio::test]
async fn chat_store_surfaces_change_notifications() {
    let store = ChatStore::new();
    let mut changes = store.subscribe_changes();
    {
        let mut state = store.lock().await;
        state.upsert_chat(chat(7));
    }
    store.notify(StoreChange::Chats);
    assert_eq!(changes.recv().await.unwrap(), StoreChange::Chats);
    assert_eq!(store.chats().await.len(), 1);
}
