//! Per-connection protocol state machine driving registry mutations
//!
//! The wire protocol carries no message-kind tag. A payload is classified
//! purely by connection history: the first payload after connect is the
//! identity announcement, everything after it is a movement delta. This
//! module tracks that two-state machine (awaiting identity, synced) per
//! session and translates connect/receive/disconnect events into registry
//! calls. Malformed payloads are logged and dropped; the connection stays
//! up.

use crate::registry::{SessionId, SessionRegistry};
use log::{info, warn};
use shared::{decode_delta, decode_identity};
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    AwaitingIdentity,
    Synced,
}

/// Tracks every open connection's place in the protocol.
#[derive(Debug, Default)]
pub struct LifecycleHandler {
    states: HashMap<SessionId, SyncState>,
}

impl LifecycleHandler {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// A peer finished connecting: register a session and start waiting
    /// for its identity announcement.
    pub fn on_connect(&mut self, registry: &mut SessionRegistry, id: SessionId, addr: SocketAddr) {
        info!("New client connected from {} as session {}", addr, id);
        registry.create(id);
        if self
            .states
            .insert(id, SyncState::AwaitingIdentity)
            .is_some()
        {
            warn!("Connect event for session {} which was already tracked", id);
        }
    }

    /// One discrete payload arrived from a peer. Classified by the
    /// session's current state, never by content.
    pub fn on_payload(&mut self, registry: &mut SessionRegistry, id: SessionId, payload: &[u8]) {
        match self.states.get(&id).copied() {
            Some(SyncState::AwaitingIdentity) => match decode_identity(payload) {
                Ok(color) => {
                    info!(
                        "Received color from session {}: {}, {}, {}",
                        id, color.r, color.g, color.b
                    );
                    registry.set_color(id, color);
                    self.states.insert(id, SyncState::Synced);
                }
                Err(e) => warn!("Dropping payload from session {}: {}", id, e),
            },
            Some(SyncState::Synced) => match decode_delta(payload) {
                Ok(delta) => registry.apply_delta(id, delta),
                Err(e) => warn!("Dropping payload from session {}: {}", id, e),
            },
            None => warn!("Payload from untracked session {}, dropping", id),
        }
    }

    /// The peer went away, in whatever protocol state it was in.
    pub fn on_disconnect(&mut self, registry: &mut SessionRegistry, id: SessionId) {
        if self.states.remove(&id).is_some() {
            info!("Session {} disconnected", id);
        }
        registry.remove(id);
    }

    #[cfg(test)]
    fn is_synced(&self, id: SessionId) -> bool {
        self.states.get(&id) == Some(&SyncState::Synced)
    }
}
