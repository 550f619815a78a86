use super::*;
use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode as AxumStatus},
    routing::{get, post},
    Json, Router,
};
use chrono::TimeZone;
use shared::domain::{ChatKind, UserId};
use tokio::net::TcpListener;

use crate::InMemoryCredentialStore;

#[derive(Clone, Default)]
struct ServerState {
    auth_headers: Arc<std::sync::Mutex<Vec<String>>>,
    message_queries: Arc<std::sync::Mutex<Vec<HashMap<String, String>>>>,
    read_chats: Arc<std::sync::Mutex<Vec<i64>>>,
    reject_with_401: Arc<std::sync::Mutex<bool>>,
}

fn sample_chat() -> ChatSummary {
    ChatSummary {
        id: ChatId(5),
        kind: ChatKind::Direct,
        title: None,
        description: None,
        other_user_id: Some(UserId(900)),
        other_username: Some("alice".to_string()),
        other_display_name: Some("Alice".to_string()),
        is_favorite: false,
        is_muted: false,
        is_pinned: false,
        is_archived: false,
        unread_count: 2,
        last_message: Some("hi".to_string()),
        last_at: None,
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        member_count: None,
        my_role: None,
    }
}

async fn handle_list_chats(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSummary>>, AxumStatus> {
    if *state.reject_with_401.lock().unwrap() {
        return Err(AxumStatus::UNAUTHORIZED);
    }
    if let Some(auth) = headers.get("authorization") {
        state
            .auth_headers
            .lock()
            .unwrap()
            .push(auth.to_str().unwrap_or_default().to_string());
    }
    Ok(Json(vec![sample_chat()]))
}

async fn handle_list_messages(
    State(state): State<ServerState>,
    Path(_chat_id): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<MessagePayload>> {
    state.message_queries.lock().unwrap().push(query);
    Json(Vec::new())
}

async fn handle_mark_read(
    State(state): State<ServerState>,
    Path(chat_id): Path<i64>,
) -> AxumStatus {
    state.read_chats.lock().unwrap().push(chat_id);
    AxumStatus::NO_CONTENT
}

async fn spawn_api_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/chats", get(handle_list_chats))
        .route("/chats/:chat_id/messages", get(handle_list_messages))
        .route("/chats/:chat_id/read", post(handle_mark_read))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn requests_carry_the_bearer_credential() {
    let (server_url, state) = spawn_api_server().await;
    let credentials = Arc::new(InMemoryCredentialStore::new("session-token"));
    let api = HttpApi::new(server_url, credentials);

    let chats = api.list_chats().await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, ChatId(5));
    assert_eq!(
        state.auth_headers.lock().unwrap().clone(),
        vec!["Bearer session-token".to_string()]
    );
}

#[tokio::test]
async fn missing_credential_fails_without_a_request() {
    let (server_url, state) = spawn_api_server().await;
    let credentials = Arc::new(InMemoryCredentialStore::empty());
    let api = HttpApi::new(server_url, credentials);

    let err = api.list_chats().await.expect_err("must fail");
    assert!(err.is_auth());
    assert!(state.auth_headers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_401_clears_the_stored_credential() {
    let (server_url, state) = spawn_api_server().await;
    *state.reject_with_401.lock().unwrap() = true;
    let credentials = Arc::new(InMemoryCredentialStore::new("stale-token"));
    let api = HttpApi::new(server_url, Arc::clone(&credentials) as Arc<dyn CredentialStore>);

    let err = api.list_chats().await.expect_err("must fail");
    assert!(err.is_auth());
    assert_eq!(credentials.access_token(), None);
}

#[tokio::test]
async fn paging_parameters_reach_the_wire() {
    let (server_url, state) = spawn_api_server().await;
    let credentials = Arc::new(InMemoryCredentialStore::new("session-token"));
    let api = HttpApi::new(server_url, credentials);

    api.list_messages(
        ChatId(5),
        MessageQuery {
            after_id: Some(MessageId(41)),
            before: None,
            limit: Some(50),
        },
    )
    .await
    .expect("messages");

    let queries = state.message_queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].get("after_id").map(String::as_str), Some("41"));
    assert_eq!(queries[0].get("limit").map(String::as_str), Some("50"));
    assert!(!queries[0].contains_key("before"));
}

#[tokio::test]
async fn mark_read_posts_to_the_chat_read_route() {
    let (server_url, state) = spawn_api_server().await;
    let credentials = Arc::new(InMemoryCredentialStore::new("session-token"));
    let api = HttpApi::new(server_url, credentials);

    api.mark_read(ChatId(5)).await.expect("mark read");
    assert_eq!(state.read_chats.lock().unwrap().clone(), vec![5]);
}
