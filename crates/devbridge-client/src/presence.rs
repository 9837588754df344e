//! Presence manager.

use crate::channel::Handshake;
use devbridge_core::{ClientId, Message, PresenceReport, PresenceState, now_millis};
use std::sync::{PoisonError, RwLock};

/// Owns this client's identity and presence state.
#[derive(Debug)]
pub struct Presence {
    client_id: ClientId,
    state: RwLock<PresenceState>,
}

impl Presence {
    pub fn new(client_id: ClientId, initial: PresenceState) -> Self {
        Self {
            client_id,
            state: RwLock::new(initial),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> PresenceState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `introduction` carrying the full current state.
    pub fn introduction(&self) -> Message {
        Message::Introduction(self.report(self.snapshot()))
    }

    /// Merge `partial` into the state and return the `state_update` to send.
    ///
    /// The update carries only `partial`, not the merged state.
    pub fn update(&self, partial: PresenceState) -> Message {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(&partial);
        Message::StateUpdate(self.report(partial))
    }

    fn report(&self, state: PresenceState) -> PresenceReport {
        PresenceReport {
            client_id: self.client_id.clone(),
            state,
            timestamp: now_millis(),
        }
    }
}

impl Handshake for Presence {
    fn introduction(&self) -> Message {
        Presence::introduction(self)
    }
}
