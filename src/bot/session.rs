//! Per-subscriber conversational session state.
//!
//! Commands that take an argument can also be sent bare; the bot then
//! prompts and waits for the value in the next message. That pending
//! prompt is the only conversational state the bot keeps, and it lives
//! in memory only — a restart drops everyone back to `Idle`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::matching::stops::SubscriberId;

/// What the bot is waiting for from a subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    /// Waiting for a "City, ST" origin point.
    AwaitingOriginCity,
    /// Waiting for a 2-letter origin state.
    AwaitingOriginState,
    /// Waiting for a 2-letter destination state.
    AwaitingDestinationState,
}

/// In-memory session table, keyed by subscriber.
///
/// Absent entries are `Idle`.
#[derive(Debug, Default)]
pub struct Sessions {
    states: Mutex<HashMap<SubscriberId, SessionState>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subscriber_id: SubscriberId) -> SessionState {
        self.states
            .lock()
            .expect("session lock poisoned")
            .get(&subscriber_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&self, subscriber_id: SubscriberId, state: SessionState) {
        let mut states = self.states.lock().expect("session lock poisoned");
        if state == SessionState::Idle {
            states.remove(&subscriber_id);
        } else {
            states.insert(subscriber_id, state);
        }
    }

    /// Return the current state and reset the subscriber to `Idle`.
    pub fn take(&self, subscriber_id: SubscriberId) -> SessionState {
        self.states
            .lock()
            .expect("session lock poisoned")
            .remove(&subscriber_id)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_subscriber_is_idle() {
        let sessions = Sessions::new();
        assert_eq!(sessions.get(1), SessionState::Idle);
    }

    #[test]
    fn set_and_get() {
        let sessions = Sessions::new();
        sessions.set(1, SessionState::AwaitingOriginCity);
        assert_eq!(sessions.get(1), SessionState::AwaitingOriginCity);
        // Other subscribers are unaffected.
        assert_eq!(sessions.get(2), SessionState::Idle);
    }

    #[test]
    fn take_resets_to_idle() {
        let sessions = Sessions::new();
        sessions.set(1, SessionState::AwaitingDestinationState);
        assert_eq!(sessions.take(1), SessionState::AwaitingDestinationState);
        assert_eq!(sessions.get(1), SessionState::Idle);
    }

    #[test]
    fn setting_idle_clears_entry() {
        let sessions = Sessions::new();
        sessions.set(1, SessionState::AwaitingOriginState);
        sessions.set(1, SessionState::Idle);
        assert_eq!(sessions.take(1), SessionState::Idle);
    }
}
