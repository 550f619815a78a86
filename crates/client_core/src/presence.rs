use std::sync::{Arc, Mutex};

use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::task::ScheduledTask;

/// Ambient interaction within this window defines "active".
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace window after losing focus/visibility before flipping to away.
pub const AWAY_GRACE: Duration = Duration::from_secs(3);
/// Cadence of the sweep that catches a visible-but-idle session.
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Pointer,
    Key,
    Click,
    Scroll,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    BecameActive,
    BecameAway,
    FocusRegained,
}

/// Derives the local user's active/away state from ambient interaction
/// signals instead of an explicit toggle. Transitions are pushed to the
/// connection manager over the channel handed out by [`PresenceEngine::new`].
pub struct PresenceEngine {
    transitions: mpsc::UnboundedSender<PresenceTransition>,
    inner: Mutex<EngineState>,
}

struct EngineState {
    started: bool,
    focused: bool,
    visible: bool,
    active: bool,
    last_interaction: Instant,
    grace: Option<ScheduledTask>,
    idle_sweep: Option<ScheduledTask>,
}

impl PresenceEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PresenceTransition>) {
        let (transitions, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            transitions,
            inner: Mutex::new(EngineState {
                started: false,
                focused: true,
                visible: true,
                active: true,
                last_interaction: Instant::now(),
                grace: None,
                idle_sweep: None,
            }),
        });
        (engine, rx)
    }

    /// Installs the periodic idle sweep. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.inner.lock().unwrap();
        if state.started {
            return;
        }
        state.started = true;
        state.last_interaction = Instant::now();
        let engine = Arc::clone(self);
        state.idle_sweep = Some(ScheduledTask::spawn(async move {
            loop {
                tokio::time::sleep(IDLE_SWEEP_INTERVAL).await;
                engine.sweep_idle();
            }
        }));
    }

    /// Cancels every pending timer. Idempotent; safe across reconnect cycles.
    pub fn stop(&self) {
        let mut state = self.inner.lock().unwrap();
        state.started = false;
        state.grace = None;
        state.idle_sweep = None;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.lock().unwrap().last_interaction.elapsed()
    }

    /// A qualifying DOM-level interaction. While the window has focus this
    /// flips away to active immediately; presence should feel instant on
    /// return.
    pub fn record_interaction(&self, _kind: InteractionKind) {
        let mut state = self.inner.lock().unwrap();
        state.last_interaction = Instant::now();
        if !state.started || !state.focused {
            return;
        }
        if !state.active {
            state.active = true;
            drop(state);
            let _ = self.transitions.send(PresenceTransition::BecameActive);
        }
    }

    pub fn set_window_focus(self: &Arc<Self>, focused: bool) {
        self.attention_changed(Some(focused), None);
    }

    pub fn set_visibility(self: &Arc<Self>, visible: bool) {
        self.attention_changed(None, Some(visible));
    }

    fn attention_changed(self: &Arc<Self>, focused: Option<bool>, visible: Option<bool>) {
        let mut state = self.inner.lock().unwrap();
        let was_attended = state.focused && state.visible;
        if let Some(focused) = focused {
            state.focused = focused;
        }
        if let Some(visible) = visible {
            state.visible = visible;
        }
        if !state.started {
            return;
        }
        let now_attended = state.focused && state.visible;

        if was_attended && !now_attended {
            if state.active && state.grace.is_none() {
                let engine = Arc::clone(self);
                state.grace = Some(ScheduledTask::spawn(async move {
                    tokio::time::sleep(AWAY_GRACE).await;
                    engine.grace_elapsed();
                }));
            }
        } else if !was_attended && now_attended {
            // Restored within the grace window: cancel with no emission.
            state.grace = None;
            drop(state);
            let _ = self.transitions.send(PresenceTransition::FocusRegained);
        }
    }

    fn grace_elapsed(&self) {
        let mut state = self.inner.lock().unwrap();
        state.grace = None;
        if !state.started || (state.focused && state.visible) {
            return;
        }
        if state.active {
            state.active = false;
            drop(state);
            let _ = self.transitions.send(PresenceTransition::BecameAway);
        }
    }

    // Catches the visible-but-idle tab: no interaction for the activity
    // timeout forces active -> away even though focus never moved.
    fn sweep_idle(&self) {
        let mut state = self.inner.lock().unwrap();
        if !state.started || !state.active || !state.visible {
            return;
        }
        if state.last_interaction.elapsed() >= ACTIVITY_TIMEOUT {
            state.active = false;
            drop(state);
            let _ = self.transitions.send(PresenceTransition::BecameAway);
        }
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
