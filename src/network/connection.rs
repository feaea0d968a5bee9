//! Connection State
//!
//! One logical session between this node and its counterpart.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Unique id of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Session established
    Active,
    /// Session closed
    Inactive,
    /// Session hit an error; always followed by `Inactive`
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Active => write!(f, "ACTIVE"),
            ConnectionState::Inactive => write!(f, "INACTIVE"),
            ConnectionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A session with a peer
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_address: String,
    established_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// A freshly established session
    pub fn new(peer_address: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_address: peer_address.into(),
            established_at: Utc::now(),
            state: Mutex::new(ConnectionState::Active),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an error on an active session
    pub fn mark_failed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == ConnectionState::Active {
            *state = ConnectionState::Failed;
        }
    }

    /// Close the session. Returns false if it was already inactive.
    pub fn mark_inactive(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let changed = *state != ConnectionState::Inactive;
        *state = ConnectionState::Inactive;
        changed
    }
}

/// Tracks which session is the client's designated primary connection to
/// the manager. Only the loss of that session triggers a reconnect.
#[derive(Debug, Default)]
pub struct PrimaryConnection {
    current: Mutex<Option<ConnectionId>>,
}

impl PrimaryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` the primary session
    pub fn designate(&self, id: ConnectionId) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    pub fn is_primary(&self, id: ConnectionId) -> bool {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) == Some(id)
    }

    /// Clear the slot if it holds `id`. Returns true exactly once per
    /// designated session.
    pub fn release(&self, id: ConnectionId) -> bool {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current == Some(id) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<ConnectionId> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
