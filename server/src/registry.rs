//! Session registry: the authoritative record of every connected player
//!
//! This module owns the map from connection handle to player state. The
//! lifecycle handler is the only caller that creates or destroys entries;
//! an entry exists exactly as long as its connection is open. Mutations
//! addressed to an unknown handle are defensive no-ops that get logged,
//! since under correct lifecycle sequencing they should never happen.

use log::{info, warn};
use shared::{PlayerColor, RosterEntry, Vec2, SPAWN_POSITION};
use std::collections::HashMap;
use std::fmt;

/// Opaque, stable identifier for one open connection.
///
/// Issued by the acceptor at connect time from a monotonically increasing
/// counter, never reused while the connection is open. Transport-level
/// handles (sockets, stream objects) are deliberately kept out of the
/// registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected player's synchronized state.
///
/// Position starts at the fixed spawn coordinate; color stays zero until
/// the identity message for the connection arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSession {
    pub position: Vec2,
    pub color: PlayerColor,
}

impl PlayerSession {
    fn new() -> Self {
        Self {
            position: SPAWN_POSITION,
            color: PlayerColor::ZERO,
        }
    }
}

/// Map of all live sessions, mutated only from the run loop.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, PlayerSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Inserts a fresh session at the spawn position with zero color.
    ///
    /// A handle that is already present is left untouched; that indicates
    /// a lifecycle bug upstream, so it is logged rather than overwritten.
    pub fn create(&mut self, id: SessionId) {
        if self.sessions.contains_key(&id) {
            warn!("Refusing to re-create existing session {}", id);
            return;
        }

        self.sessions.insert(id, PlayerSession::new());
        info!(
            "Session {} registered at spawn ({}, {})",
            id, SPAWN_POSITION.x, SPAWN_POSITION.y
        );
    }

    /// Overwrites the color of an existing session.
    pub fn set_color(&mut self, id: SessionId, color: PlayerColor) {
        match self.sessions.get_mut(&id) {
            Some(session) => session.color = color,
            None => warn!("Ignoring color for unknown session {}", id),
        }
    }

    /// Applies a movement delta additively. No bounds clamping; world
    /// boundaries are a gameplay concern handled elsewhere.
    pub fn apply_delta(&mut self, id: SessionId, delta: Vec2) {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.position.x += delta.x;
                session.position.y += delta.y;
            }
            None => warn!("Ignoring movement delta for unknown session {}", id),
        }
    }

    /// Deletes a session. Removing an absent handle is a silent no-op so
    /// that a disconnect is always safe to process.
    pub fn remove(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            info!("Session {} removed", id);
        }
    }

    /// Point-in-time copy of every session's broadcastable state, in map
    /// iteration order. Later mutations do not affect the returned roster.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.sessions
            .values()
            .map(|session| RosterEntry {
                position: session.position,
                color: session.color,
            })
            .collect()
    }

    pub(crate) fn get(&self, id: SessionId) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_create_spawns_with_defaults() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));

        let session = registry.get(SessionId(1)).unwrap();
        assert_eq!(session.position, SPAWN_POSITION);
        assert_eq!(session.color, PlayerColor::ZERO);
    }

    #[test]
    fn test_registry_size_tracks_connects() {
        let mut registry = SessionRegistry::new();
        for i in 0..8 {
            registry.create(SessionId(i));
        }
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_duplicate_create_is_noop() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));
        registry.set_color(SessionId(1), PlayerColor::opaque(9, 9, 9));

        // Second create must not reset the existing session
        registry.create(SessionId(1));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(SessionId(1)).unwrap().color,
            PlayerColor::opaque(9, 9, 9)
        );
    }

    #[test]
    fn test_set_color() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(3));
        registry.set_color(SessionId(3), PlayerColor::opaque(10, 20, 30));

        let session = registry.get(SessionId(3)).unwrap();
        assert_eq!(session.color, PlayerColor::opaque(10, 20, 30));
        // Position untouched by identity
        assert_eq!(session.position, SPAWN_POSITION);
    }

    #[test]
    fn test_mutations_on_unknown_handle_are_noops() {
        let mut registry = SessionRegistry::new();
        registry.set_color(SessionId(42), PlayerColor::opaque(1, 2, 3));
        registry.apply_delta(SessionId(42), Vec2::new(10.0, 10.0));
        registry.remove(SessionId(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delta_accumulation_sums_to_zero() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));

        registry.apply_delta(SessionId(1), Vec2::new(1.0, 0.0));
        registry.apply_delta(SessionId(1), Vec2::new(0.0, 1.0));
        registry.apply_delta(SessionId(1), Vec2::new(-1.0, -1.0));

        let session = registry.get(SessionId(1)).unwrap();
        assert_eq!(session.position.x, 960.0);
        assert_eq!(session.position.y, 540.0);
    }

    #[test]
    fn test_fractional_delta_accumulation() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));

        // 0.1 has no exact f32 representation, so ten applications land
        // near 961/542 rather than exactly on them
        for _ in 0..10 {
            registry.apply_delta(SessionId(1), Vec2::new(0.1, 0.2));
        }

        let session = registry.get(SessionId(1)).unwrap();
        assert_approx_eq!(session.position.x, 961.0, 1e-3);
        assert_approx_eq!(session.position.y, 542.0, 1e-3);
    }

    #[test]
    fn test_deltas_are_not_clamped() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));
        registry.apply_delta(SessionId(1), Vec2::new(-100_000.0, 100_000.0));

        let session = registry.get(SessionId(1)).unwrap();
        assert_eq!(session.position.x, 960.0 - 100_000.0);
        assert_eq!(session.position.y, 540.0 + 100_000.0);
    }

    #[test]
    fn test_remove_after_deltas() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(7));
        for _ in 0..50 {
            registry.apply_delta(SessionId(7), Vec2::new(1.0, 1.0));
        }

        registry.remove(SessionId(7));
        assert!(!registry.contains(SessionId(7)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));
        registry.set_color(SessionId(1), PlayerColor::opaque(5, 5, 5));

        let snapshot = registry.snapshot();

        // Mutations after the copy must not leak into it
        registry.apply_delta(SessionId(1), Vec2::new(100.0, 100.0));
        registry.remove(SessionId(1));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].position, SPAWN_POSITION);
        assert_eq!(snapshot[0].color, PlayerColor::opaque(5, 5, 5));
    }

    #[test]
    fn test_snapshot_contains_every_session() {
        let mut registry = SessionRegistry::new();
        for i in 0..5 {
            registry.create(SessionId(i));
        }

        assert_eq!(registry.snapshot().len(), 5);
    }
}
