// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Stream lifecycle state machine.
//!
//! `Uninitialized -> Created -> Activated <-> Deactivated -> Destroyed`.
//! Activation may be toggled any number of times without recreating the
//! stream. A destroyed stream has no handle; creating again starts a fresh
//! lifecycle for the same `(direction, channel)` slot.

use std::fmt;

use serde::Serialize;

/// Events that drive a stream through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamEvent {
    Create,
    Activate,
    Deactivate,
    Destroy,
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Activate => write!(f, "activate"),
            Self::Deactivate => write!(f, "deactivate"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Current lifecycle state of one stream slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StreamState {
    #[default]
    Uninitialized,
    Created,
    Activated,
    Deactivated,
    Destroyed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Created => write!(f, "created"),
            Self::Activated => write!(f, "activated"),
            Self::Deactivated => write!(f, "deactivated"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

impl StreamState {
    /// A handle exists in this state.
    pub fn has_handle(&self) -> bool {
        matches!(self, Self::Created | Self::Activated | Self::Deactivated)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Activated)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamLifecycle {
    state: StreamState,
    transition_count: u64,
}

impl StreamLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Whether `event` is a valid transition from the current state.
    pub fn can_process(&self, event: StreamEvent) -> bool {
        self.next_state(event).is_some()
    }

    /// Force set the state (for recovery after a lost handle).
    pub fn set_state(&mut self, state: StreamState) {
        self.state = state;
        self.transition_count += 1;
    }

    /// Process an event. Returns true if a transition occurred; invalid
    /// events leave the state untouched.
    pub fn process_event(&mut self, event: StreamEvent) -> bool {
        match self.next_state(event) {
            Some(state) => {
                self.state = state;
                self.transition_count += 1;
                true
            }
            None => false,
        }
    }

    fn next_state(&self, event: StreamEvent) -> Option<StreamState> {
        use StreamEvent as E;
        use StreamState as S;
        match (self.state, event) {
            (S::Uninitialized | S::Destroyed, E::Create) => Some(S::Created),
            (S::Created | S::Deactivated, E::Activate) => Some(S::Activated),
            (S::Activated, E::Deactivate) => Some(S::Deactivated),
            (S::Created | S::Deactivated, E::Destroy) => Some(S::Destroyed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let lc = StreamLifecycle::new();
        assert_eq!(lc.state(), StreamState::Uninitialized);
        assert!(!lc.state().has_handle());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut lc = StreamLifecycle::new();
        assert!(lc.process_event(StreamEvent::Create));
        assert!(lc.process_event(StreamEvent::Activate));
        assert!(lc.state().is_active());
        assert!(lc.process_event(StreamEvent::Deactivate));
        assert!(lc.process_event(StreamEvent::Activate));
        assert!(lc.process_event(StreamEvent::Deactivate));
        assert!(lc.process_event(StreamEvent::Destroy));
        assert_eq!(lc.state(), StreamState::Destroyed);
        assert_eq!(lc.transition_count(), 6);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lc = StreamLifecycle::new();
        assert!(!lc.process_event(StreamEvent::Activate));
        assert!(!lc.process_event(StreamEvent::Destroy));

        lc.process_event(StreamEvent::Create);
        assert!(!lc.process_event(StreamEvent::Create));
        assert!(!lc.process_event(StreamEvent::Deactivate));

        lc.process_event(StreamEvent::Activate);
        // Must deactivate before teardown.
        assert!(!lc.process_event(StreamEvent::Destroy));
        assert!(!lc.process_event(StreamEvent::Activate));
        assert_eq!(lc.state(), StreamState::Activated);
    }

    #[test]
    fn test_recreate_after_destroy() {
        let mut lc = StreamLifecycle::new();
        lc.process_event(StreamEvent::Create);
        lc.process_event(StreamEvent::Destroy);
        assert!(!lc.process_event(StreamEvent::Activate));
        assert!(lc.process_event(StreamEvent::Create));
        assert_eq!(lc.state(), StreamState::Created);
    }
}
