use tokio::sync::broadcast;

use crate::nostr::bunker::{AuthUrlDisposition, SessionState};

const CHANNEL_CAPACITY: usize = 64;

/// Notifications for the UI layer. Emitting never blocks the emitter; a slow
/// subscriber only loses the oldest events.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// The remote signer wants the user to approve something out of band
    AuthUrl {
        url: String,
        disposition: AuthUrlDisposition,
    },
    /// Remote signer session moved to a new state
    SignerState(SessionState),
    /// Remote signer session is usable as `pubkey`
    SignerReady { pubkey: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CoreEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
