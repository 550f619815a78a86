use std::sync::{Arc, Mutex};

use shared::domain::ChatId;
use tokio::time::Duration;
use tracing::debug;

use crate::{api::ChatApi, task::ScheduledTask};

/// At most one mark-read call per chat per window.
pub const READ_MARK_WINDOW: Duration = Duration::from_secs(1);

/// Collapses bursts of "this chat should be marked read" intents into one
/// outbound call per window; always uses the last chat id requested. Read
/// state is best-effort: failures are swallowed, never surfaced.
pub struct ReadMarkDebouncer {
    api: Arc<dyn ChatApi>,
    inner: Mutex<DebounceState>,
}

#[derive(Default)]
struct DebounceState {
    pending: Option<ChatId>,
    window_open: bool,
    window: Option<ScheduledTask>,
}

impl ReadMarkDebouncer {
    pub fn new(api: Arc<dyn ChatApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            inner: Mutex::new(DebounceState::default()),
        })
    }

    pub fn schedule(self: &Arc<Self>, chat_id: ChatId) {
        let mut state = self.inner.lock().unwrap();
        state.pending = Some(chat_id);
        let window_open =
            state.window_open && state.window.as_ref().is_some_and(|w| !w.is_finished());
        if window_open {
            return;
        }
        state.window_open = true;
        let debouncer = Arc::clone(self);
        state.window = Some(ScheduledTask::spawn(async move {
            tokio::time::sleep(READ_MARK_WINDOW).await;
            let target = {
                let mut state = debouncer.inner.lock().unwrap();
                state.window_open = false;
                state.pending.take()
            };
            if let Some(chat_id) = target {
                // Detached on purpose: the call must survive the window task
                // being replaced by the next burst.
                let api = Arc::clone(&debouncer.api);
                tokio::spawn(async move {
                    if let Err(err) = api.mark_read(chat_id).await {
                        debug!(chat_id = chat_id.0, "mark-read failed: {err}");
                    }
                });
            }
        }));
    }
}

#[cfg(test)]
#[path = "tests/read_marker_tests.rs"]
mod tests;
