use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use chrono::Utc;
use shared::{
    domain::{ChatId, MessageId, UserId},
    protocol::{ClientFrame, MessagePayload, ReactionAction, ServerFrame},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;

pub mod api;
pub mod error;
pub mod presence;
pub mod read_marker;
pub mod reconcile;
pub mod store;
pub mod task;
pub mod transport;

pub use api::{ChatApi, HttpApi, MessageQuery, SendMessageRequest};
pub use error::ClientError;
pub use presence::{InteractionKind, PresenceEngine, PresenceTransition};
pub use read_marker::ReadMarkDebouncer;
pub use reconcile::{Effect, ReconcileContext, ViewState};
pub use store::{ChatStore, PendingOutbound, PresenceRecord, StoreChange, StoreState};
pub use transport::{FrameSink, FrameStream, TransportFactory, WsTransportFactory};

use crate::{presence::PresenceTransition as Transition, store::TYPING_TTL, task::ScheduledTask};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PRESENCE_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
const PRESENCE_REFRESH_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);
const RECONNECT_DELAY_FLOOR: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_CEILING: Duration = Duration::from_secs(30);
const FALLBACK_POLL_AFTER: Duration = Duration::from_secs(10);
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(5);
const INITIAL_PAGE_SIZE: u32 = 50;

/// Persistent local storage for the session credential. Retrieved at connect
/// time and cleared on logout or an expired session.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn clear(&self);
}

pub struct InMemoryCredentialStore {
    token: StdMutex<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: StdMutex::new(Some(token.into())),
        }
    }

    pub fn empty() -> Self {
        Self {
            token: StdMutex::new(None),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock().unwrap() = Some(token.into());
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.token.lock().unwrap().take();
    }
}

/// Best-effort OS-level notification side channel.
pub trait Notifier: Send + Sync {
    fn notify(&self, chat_id: ChatId, title: &str, body: &str);
}

pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _chat_id: ChatId, _title: &str, _body: &str) {}
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    SessionExpired,
    Notification {
        chat_id: ChatId,
        title: String,
        body: String,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// http(s) origin of the request API; the websocket endpoint is derived
    /// from it unless `websocket_url` overrides it.
    pub base_url: String,
    pub websocket_url: Option<Url>,
    pub notifications_enabled: bool,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            websocket_url: None,
            notifications_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

struct ConnState {
    phase: ConnectionPhase,
    authed: bool,
    self_user_id: Option<UserId>,
    ever_connected: bool,
    intentional_close: bool,
    reconnect_delay: Duration,
    reconnect: Option<ScheduledTask>,
    fallback_poll: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
    connection: Option<ScheduledTask>,
    writer: Option<ScheduledTask>,
    resync: Option<ScheduledTask>,
    presence_pump: Option<ScheduledTask>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    last_presence_refresh: Option<Instant>,
    view: ViewState,
}

impl ConnState {
    fn new() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            authed: false,
            self_user_id: None,
            ever_connected: false,
            intentional_close: false,
            reconnect_delay: RECONNECT_DELAY_FLOOR,
            reconnect: None,
            fallback_poll: None,
            heartbeat: None,
            connection: None,
            writer: None,
            resync: None,
            presence_pump: None,
            outbound: None,
            last_presence_refresh: None,
            view: ViewState::default(),
        }
    }
}

/// The connection manager: owns the transport lifecycle (connect,
/// authenticate, subscribe, heartbeat, reconnect-with-backoff, degraded
/// fallback polling) and routes inbound frames into the reconciliation
/// engine. Every collaborator is injected; there are no ambient globals.
pub struct SyncClient {
    store: Arc<ChatStore>,
    api: Arc<dyn ChatApi>,
    transport_factory: Arc<dyn TransportFactory>,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    presence: Arc<PresenceEngine>,
    read_marks: Arc<ReadMarkDebouncer>,
    config: SyncConfig,
    inner: Mutex<ConnState>,
    presence_rx: StdMutex<Option<mpsc::UnboundedReceiver<Transition>>>,
    next_tag: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncClient {
    pub fn new(
        store: Arc<ChatStore>,
        api: Arc<dyn ChatApi>,
        transport_factory: Arc<dyn TransportFactory>,
        credentials: Arc<dyn CredentialStore>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Self::new_with_notifier(
            store,
            api,
            transport_factory,
            credentials,
            Arc::new(NoopNotifier),
            config,
        )
    }

    pub fn new_with_notifier(
        store: Arc<ChatStore>,
        api: Arc<dyn ChatApi>,
        transport_factory: Arc<dyn TransportFactory>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let (presence, presence_rx) = PresenceEngine::new();
        let read_marks = ReadMarkDebouncer::new(Arc::clone(&api));
        Arc::new(Self {
            store,
            api,
            transport_factory,
            credentials,
            notifier,
            presence,
            read_marks,
            config,
            inner: Mutex::new(ConnState::new()),
            presence_rx: StdMutex::new(Some(presence_rx)),
            next_tag: AtomicU64::new(1),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub async fn connection_phase(&self) -> ConnectionPhase {
        self.inner.lock().await.phase
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_phase().await == ConnectionPhase::Open
    }

    /// Opens the duplex connection. No-op when already connecting or open;
    /// terminal no-op without a credential (the caller must re-authenticate
    /// out of band).
    pub async fn connect(self: &Arc<Self>) {
        {
            let conn = self.inner.lock().await;
            if matches!(
                conn.phase,
                ConnectionPhase::Connecting | ConnectionPhase::Open
            ) {
                return;
            }
        }
        let Some(token) = self.credentials.access_token() else {
            warn!("connect skipped: no credential available");
            return;
        };
        let url = match self.websocket_url(&token) {
            Ok(url) => url,
            Err(err) => {
                warn!("connect skipped: {err}");
                return;
            }
        };
        let mut conn = self.inner.lock().await;
        if matches!(
            conn.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Open
        ) {
            return;
        }
        conn.phase = ConnectionPhase::Connecting;
        conn.intentional_close = false;
        if conn.presence_pump.is_none() {
            if let Some(rx) = self.presence_rx.lock().unwrap().take() {
                conn.presence_pump = Some(self.spawn_presence_pump(rx));
            }
        }
        let client = Arc::clone(self);
        conn.connection = Some(ScheduledTask::spawn(async move {
            client.run_connection(url, token).await;
        }));
    }

    /// Intentional close: suppresses reconnect, tears down heartbeat, poller
    /// and presence instrumentation, and closes the transport.
    pub async fn disconnect(&self) {
        {
            let mut conn = self.inner.lock().await;
            conn.intentional_close = true;
            conn.reconnect = None;
            conn.fallback_poll = None;
            conn.heartbeat = None;
            conn.resync = None;
            conn.outbound = None;
            if matches!(
                conn.phase,
                ConnectionPhase::Connecting | ConnectionPhase::Open
            ) {
                conn.phase = ConnectionPhase::Closing;
            }
        }
        self.presence.stop();
    }

    fn websocket_url(&self, token: &str) -> Result<Url, ClientError> {
        let mut url = match &self.config.websocket_url {
            Some(url) => url.clone(),
            None => {
                let base = self.config.base_url.trim_end_matches('/');
                let ws_base = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    return Err(ClientError::UnsupportedScheme(base.to_string()));
                };
                Url::parse(&format!("{ws_base}/ws"))?
            }
        };
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    fn run_connection(
        self: Arc<Self>,
        url: Url,
        token: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            match self.transport_factory.connect(&url).await {
                Ok((sink, stream)) => self.run_open(sink, stream, token).await,
                Err(err) => {
                    warn!("websocket connect failed: {err}");
                    self.handle_close().await;
                }
            }
        })
    }

    async fn run_open(
        self: &Arc<Self>,
        mut sink: Box<dyn FrameSink>,
        mut stream: Box<dyn FrameStream>,
        token: String,
    ) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = ScheduledTask::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(err) = sink.send(text).await {
                    warn!("websocket send failed: {err}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let was_connected;
        {
            let mut conn = self.inner.lock().await;
            if conn.intentional_close {
                // disconnect() raced the transport handshake
                conn.phase = ConnectionPhase::Closed;
                return;
            }
            conn.phase = ConnectionPhase::Open;
            conn.authed = false;
            conn.reconnect_delay = RECONNECT_DELAY_FLOOR;
            conn.reconnect = None;
            conn.fallback_poll = None;
            conn.outbound = Some(out_tx);
            conn.writer = Some(writer);
            was_connected = conn.ever_connected;
            conn.ever_connected = true;
        }
        info!("websocket open");
        let _ = self.events.send(ClientEvent::Connected);

        self.send_frame(&ClientFrame::Auth {
            token,
            active: self.presence.is_active(),
        })
        .await;
        let chat_ids: Vec<ChatId> =
            { self.store.lock().await.chats.iter().map(|c| c.id).collect() };
        for chat_id in chat_ids {
            self.send_frame(&ClientFrame::Subscribe { chat_id }).await;
        }

        self.start_heartbeat().await;
        self.presence.start();

        if was_connected {
            // One-shot resynchronization to cover events missed while
            // disconnected; the fresh connection is already delivering.
            let client = Arc::clone(self);
            let resync = ScheduledTask::spawn(async move {
                client.refresh_snapshot().await;
            });
            self.inner.lock().await.resync = Some(resync);
        }

        while let Some(text) = stream.next().await {
            match serde_json::from_str::<ServerFrame>(&text) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(err) => debug!("dropping malformed inbound frame: {err}"),
            }
        }
        self.handle_close().await;
    }

    async fn handle_close(self: &Arc<Self>) {
        let intentional;
        {
            let mut conn = self.inner.lock().await;
            if conn.phase == ConnectionPhase::Closed {
                return;
            }
            conn.phase = ConnectionPhase::Closed;
            conn.authed = false;
            conn.outbound = None;
            conn.heartbeat = None;
            conn.writer = None;
            conn.resync = None;
            intentional = conn.intentional_close;
            if !intentional {
                let reconnect_pending = conn.reconnect.as_ref().is_some_and(|t| !t.is_finished());
                if !reconnect_pending {
                    let delay = conn.reconnect_delay;
                    conn.reconnect_delay = (delay * 2).min(RECONNECT_DELAY_CEILING);
                    let client = Arc::clone(self);
                    conn.reconnect = Some(ScheduledTask::spawn(async move {
                        tokio::time::sleep(delay).await;
                        client.connect().await;
                    }));
                }
                let polling = conn.fallback_poll.as_ref().is_some_and(|t| !t.is_finished());
                if !polling {
                    let client = Arc::clone(self);
                    conn.fallback_poll = Some(ScheduledTask::spawn(async move {
                        tokio::time::sleep(FALLBACK_POLL_AFTER).await;
                        loop {
                            client.refresh_snapshot().await;
                            tokio::time::sleep(FALLBACK_POLL_INTERVAL).await;
                        }
                    }));
                }
            }
        }
        info!(intentional, "websocket closed");
        let _ = self.events.send(ClientEvent::Disconnected);
    }

    async fn start_heartbeat(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let heartbeat = ScheduledTask::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                client.send_frame(&ClientFrame::Ping).await;
                client.maybe_refresh_presence().await;
            }
        });
        self.inner.lock().await.heartbeat = Some(heartbeat);
    }

    /// Piggybacks an "I am still active" signal on the heartbeat, at most
    /// once per refresh interval and only when the user interacted recently.
    /// Keeps server-side presence TTLs fresh without flooding.
    async fn maybe_refresh_presence(&self) {
        if !self.presence.is_active() {
            return;
        }
        if self.presence.idle_for() > PRESENCE_REFRESH_ACTIVITY_WINDOW {
            return;
        }
        {
            let mut conn = self.inner.lock().await;
            let due = conn
                .last_presence_refresh
                .map(|at| at.elapsed() >= PRESENCE_REFRESH_INTERVAL)
                .unwrap_or(true);
            if !due {
                return;
            }
            conn.last_presence_refresh = Some(Instant::now());
        }
        self.send_frame(&ClientFrame::PresenceUpdate { active: true })
            .await;
    }

    fn spawn_presence_pump(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Transition>,
    ) -> ScheduledTask {
        let client = Arc::clone(self);
        ScheduledTask::spawn(async move {
            while let Some(transition) = rx.recv().await {
                match transition {
                    Transition::BecameActive => {
                        client
                            .send_frame(&ClientFrame::PresenceUpdate { active: true })
                            .await;
                    }
                    Transition::BecameAway => {
                        client
                            .send_frame(&ClientFrame::PresenceUpdate { active: false })
                            .await;
                    }
                    Transition::FocusRegained => {
                        client.mark_active_chat_read_if_at_bottom().await;
                    }
                }
            }
        })
    }

    // Marking unseen history as read just because the window regained focus
    // would be wrong; the viewport must be at the bottom.
    async fn mark_active_chat_read_if_at_bottom(&self) {
        let target = {
            let conn = self.inner.lock().await;
            if conn.view.at_bottom {
                conn.view.active_chat
            } else {
                None
            }
        };
        if let Some(chat_id) = target {
            self.store.lock().await.clear_unread(chat_id);
            self.store.notify(StoreChange::Chats);
            self.read_marks.schedule(chat_id);
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: ServerFrame) {
        match &frame {
            ServerFrame::AuthOk { user_id } => {
                let mut conn = self.inner.lock().await;
                conn.authed = true;
                conn.self_user_id = Some(*user_id);
                return;
            }
            ServerFrame::Subscribed { .. } | ServerFrame::Pong => return,
            ServerFrame::Error { message } => {
                let authed = self.inner.lock().await.authed;
                if !authed {
                    // Known-bad credential: terminal for this session, the
                    // manager must not loop-retry with it.
                    warn!("authentication rejected: {message}");
                    self.credentials.clear();
                    self.inner.lock().await.intentional_close = true;
                    let _ = self.events.send(ClientEvent::SessionExpired);
                } else {
                    let _ = self.events.send(ClientEvent::Error(message.clone()));
                }
                return;
            }
            _ => {}
        }

        let ctx = {
            let conn = self.inner.lock().await;
            ReconcileContext {
                self_user_id: conn.self_user_id,
                view: conn.view,
                locally_active: self.presence.is_active(),
                notifications_enabled: self.config.notifications_enabled,
                now: Utc::now(),
            }
        };
        let changes = store_changes_for(&frame);
        let effects = {
            let mut state = self.store.lock().await;
            reconcile::apply(&mut state, frame, &ctx)
        };
        for change in changes {
            self.store.notify(change);
        }
        self.perform_effects(effects).await;
    }

    async fn perform_effects(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ScheduleMarkRead(chat_id) => self.read_marks.schedule(chat_id),
                Effect::Notify {
                    chat_id,
                    title,
                    body,
                } => {
                    self.notifier.notify(chat_id, &title, &body);
                    let _ = self.events.send(ClientEvent::Notification {
                        chat_id,
                        title,
                        body,
                    });
                }
                Effect::ArmTypingExpiry {
                    chat_id,
                    user_id,
                    epoch,
                } => {
                    let store = Arc::clone(&self.store);
                    let expiry = ScheduledTask::spawn(async move {
                        tokio::time::sleep(TYPING_TTL).await;
                        let cleared =
                            { store.lock().await.clear_typing_if_epoch(chat_id, user_id, epoch) };
                        if cleared {
                            store.notify(StoreChange::Typing(chat_id));
                        }
                    });
                    self.store
                        .lock()
                        .await
                        .attach_typing_expiry(chat_id, user_id, epoch, expiry);
                }
                Effect::Subscribe(chat_id) => {
                    self.send_frame(&ClientFrame::Subscribe { chat_id }).await;
                }
                Effect::ChatRemoved(chat_id) => {
                    let mut conn = self.inner.lock().await;
                    if conn.view.active_chat == Some(chat_id) {
                        conn.view.active_chat = None;
                    }
                }
            }
        }
    }

    /// Degraded-mode snapshot refresh, shared by the fallback poller and the
    /// post-reconnect resynchronization: reload the chat list and pull
    /// messages newer than the high-water mark for the active chat.
    async fn refresh_snapshot(self: &Arc<Self>) {
        let view = { self.inner.lock().await.view };
        match self.api.list_chats().await {
            Ok(chats) => {
                {
                    let mut state = self.store.lock().await;
                    state.replace_chats(chats);
                    if let Some(active) = view.active_chat {
                        if view.at_bottom {
                            state.clear_unread(active);
                        }
                    }
                }
                self.store.notify(StoreChange::Chats);
            }
            Err(err) => debug!("chat list refresh failed: {err}"),
        }
        if let Some(active) = view.active_chat {
            if let Err(err) = self.load_newer(active).await {
                debug!(chat_id = active.0, "newer-message refresh failed: {err}");
            }
        }
    }

    async fn send_frame(&self, frame: &ClientFrame) -> bool {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                debug!("failed to encode outbound frame: {err}");
                return false;
            }
        };
        let conn = self.inner.lock().await;
        match &conn.outbound {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    // ── view state ─────────────────────────────────────────────────────────

    /// Switches the active chat. Activation zeroes the unread counter and
    /// schedules a mark-read; the server side is monotonic, so re-marking an
    /// already-read chat is a no-op there.
    pub async fn set_active_chat(&self, chat_id: Option<ChatId>) {
        {
            let mut conn = self.inner.lock().await;
            conn.view.active_chat = chat_id;
        }
        if let Some(chat_id) = chat_id {
            self.store.lock().await.clear_unread(chat_id);
            self.store.notify(StoreChange::Chats);
            self.read_marks.schedule(chat_id);
        }
    }

    pub async fn set_viewport_at_bottom(&self, at_bottom: bool) {
        self.inner.lock().await.view.at_bottom = at_bottom;
    }

    pub async fn active_chat(&self) -> Option<ChatId> {
        self.inner.lock().await.view.active_chat
    }

    // ── presence instrumentation passthrough ───────────────────────────────

    pub fn record_interaction(&self, kind: InteractionKind) {
        self.presence.record_interaction(kind);
    }

    pub fn set_window_focus(self: &Arc<Self>, focused: bool) {
        self.presence.set_window_focus(focused);
    }

    pub fn set_visibility(self: &Arc<Self>, visible: bool) {
        self.presence.set_visibility(visible);
    }

    pub fn presence_engine(&self) -> &Arc<PresenceEngine> {
        &self.presence
    }

    // ── user-originated operations ─────────────────────────────────────────

    pub async fn notify_typing(&self, chat_id: ChatId) -> Result<(), ClientError> {
        if self.send_frame(&ClientFrame::Typing { chat_id }).await {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Optimistic send: a pending entry is visible while the request is in
    /// flight, and the acknowledged message replaces it by identity whether
    /// the HTTP response or the websocket echo lands first.
    pub async fn send_message(
        self: &Arc<Self>,
        chat_id: ChatId,
        request: SendMessageRequest,
    ) -> Result<MessagePayload, ClientError> {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.store.lock().await;
            state.push_pending(
                chat_id,
                PendingOutbound {
                    tag,
                    kind: request.kind,
                    content: request.content.clone(),
                    reply_to_message_id: request.reply_to_message_id,
                    queued_at: Utc::now(),
                },
            );
        }
        self.store.notify(StoreChange::Messages(chat_id));

        let result = self.api.send_message(chat_id, request).await;
        let mut state = self.store.lock().await;
        state.take_pending(chat_id, tag);
        match result {
            Ok(mut message) => {
                state.backfill_reply_preview(&mut message);
                state.insert_message(message.clone());
                state.update_chat_preview(&message);
                drop(state);
                self.store.notify(StoreChange::Messages(chat_id));
                self.store.notify(StoreChange::Chats);
                Ok(message)
            }
            Err(err) => {
                drop(state);
                self.store.notify(StoreChange::Messages(chat_id));
                if err.is_auth() {
                    let _ = self.events.send(ClientEvent::SessionExpired);
                }
                Err(err.into())
            }
        }
    }

    pub async fn load_messages(&self, chat_id: ChatId) -> Result<usize, ClientError> {
        let page = self
            .api
            .list_messages(
                chat_id,
                MessageQuery {
                    limit: Some(INITIAL_PAGE_SIZE),
                    ..MessageQuery::default()
                },
            )
            .await?;
        let added = { self.store.lock().await.merge_messages(page) };
        self.store.notify(StoreChange::Messages(chat_id));
        Ok(added)
    }

    /// Incremental fetch past the per-chat high-water mark.
    pub async fn load_newer(&self, chat_id: ChatId) -> Result<usize, ClientError> {
        let after_id = { self.store.lock().await.last_seen(chat_id) };
        let Some(after_id) = after_id else {
            return self.load_messages(chat_id).await;
        };
        let page = self
            .api
            .list_messages(
                chat_id,
                MessageQuery {
                    after_id: Some(after_id),
                    before: None,
                    limit: Some(INITIAL_PAGE_SIZE),
                },
            )
            .await?;
        let added = { self.store.lock().await.merge_messages(page) };
        if added > 0 {
            self.store.notify(StoreChange::Messages(chat_id));
        }
        Ok(added)
    }

    pub async fn load_older(&self, chat_id: ChatId) -> Result<usize, ClientError> {
        let before = {
            self.store
                .lock()
                .await
                .messages(chat_id)
                .first()
                .map(|m| m.created_at)
        };
        let Some(before) = before else {
            return Ok(0);
        };
        let page = self
            .api
            .list_messages(
                chat_id,
                MessageQuery {
                    after_id: None,
                    before: Some(before),
                    limit: Some(INITIAL_PAGE_SIZE),
                },
            )
            .await?;
        let added = { self.store.lock().await.merge_messages(page) };
        if added > 0 {
            self.store.notify(StoreChange::Messages(chat_id));
        }
        Ok(added)
    }

    pub async fn toggle_reaction(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<ReactionAction, ClientError> {
        let action = self.api.toggle_reaction(chat_id, message_id, emoji).await?;
        self.store
            .lock()
            .await
            .apply_reaction(chat_id, message_id, emoji, action, true);
        self.store.notify(StoreChange::Messages(chat_id));
        Ok(action)
    }

    pub async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), ClientError> {
        let updated = self.api.edit_message(chat_id, message_id, content).await?;
        self.store.lock().await.patch_message(
            chat_id,
            message_id,
            &updated.content,
            updated.updated_at.unwrap_or_else(Utc::now),
        );
        self.store.notify(StoreChange::Messages(chat_id));
        Ok(())
    }

    pub async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ClientError> {
        self.api.delete_message(chat_id, message_id).await?;
        {
            let mut state = self.store.lock().await;
            state.remove_message(chat_id, message_id);
            if state
                .pinned(chat_id)
                .is_some_and(|p| p.message.id == message_id)
            {
                state.clear_pinned(chat_id);
            }
        }
        self.store.notify(StoreChange::Messages(chat_id));
        Ok(())
    }

    pub async fn pin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ClientError> {
        self.api.pin_message(chat_id, message_id).await?;
        let message = { self.store.lock().await.message(chat_id, message_id).cloned() };
        if let Some(message) = message {
            self.store.lock().await.set_pinned(chat_id, message);
            self.store.notify(StoreChange::Messages(chat_id));
        }
        Ok(())
    }

    pub async fn unpin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), ClientError> {
        self.api.unpin_message(chat_id, message_id).await?;
        self.store.lock().await.clear_pinned(chat_id);
        self.store.notify(StoreChange::Messages(chat_id));
        Ok(())
    }
}

fn store_changes_for(frame: &ServerFrame) -> Vec<StoreChange> {
    match frame {
        ServerFrame::Message { message } => vec![
            StoreChange::Messages(message.chat_id),
            StoreChange::Chats,
            StoreChange::Typing(message.chat_id),
        ],
        ServerFrame::Typing { chat_id, .. } => vec![StoreChange::Typing(*chat_id)],
        ServerFrame::Presence { user_id, .. } => vec![StoreChange::Presence(*user_id)],
        ServerFrame::ReadReceipt { chat_id, .. } => vec![StoreChange::Receipts(*chat_id)],
        ServerFrame::MessageDeleted { chat_id, .. }
        | ServerFrame::MessageUpdated { chat_id, .. }
        | ServerFrame::MessageUnpinned { chat_id }
        | ServerFrame::Reaction { chat_id, .. } => vec![StoreChange::Messages(*chat_id)],
        ServerFrame::MessagePinned { message } => vec![StoreChange::Messages(message.chat_id)],
        ServerFrame::ChatCreated { .. }
        | ServerFrame::ChatUpdated { .. }
        | ServerFrame::ChatDeleted { .. }
        | ServerFrame::ChatMemberJoined { .. }
        | ServerFrame::ChatMemberLeft { .. }
        | ServerFrame::UserProfileUpdated { .. } => vec![StoreChange::Chats],
        ServerFrame::AuthOk { .. }
        | ServerFrame::Subscribed { .. }
        | ServerFrame::Pong
        | ServerFrame::Error { .. } => Vec::new(),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
