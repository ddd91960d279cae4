//! Connection sessions and their bound identities.

use crate::message::Identity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Counter mixed into generated IDs so two connections accepted in the same
/// nanosecond still differ.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{counter}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A connection tried to bind a second, different identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Connection {connection} is already bound to {existing}")]
pub struct AlreadyBoundError {
    /// The offending connection.
    pub connection: ConnectionId,
    /// Identity the connection is bound to.
    pub existing: Identity,
    /// Identity that was rejected.
    pub requested: Identity,
}

/// Connection → identity associations.
///
/// Consulted on disconnect to learn which identity to remove from presence.
#[derive(Debug, Default)]
pub struct SessionBinding {
    bindings: DashMap<ConnectionId, Identity>,
}

impl SessionBinding {
    /// Create an empty binding table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`.
    ///
    /// Binding the identity a connection already holds is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is bound to a different identity.
    pub fn bind(&self, connection: &ConnectionId, identity: Identity) -> Result<(), AlreadyBoundError> {
        match self.bindings.entry(connection.clone()) {
            Entry::Occupied(entry) if entry.get() == &identity => Ok(()),
            Entry::Occupied(entry) => Err(AlreadyBoundError {
                connection: connection.clone(),
                existing: entry.get().clone(),
                requested: identity,
            }),
            Entry::Vacant(entry) => {
                debug!(connection = %connection, identity = %identity, "Bound session");
                entry.insert(identity);
                Ok(())
            }
        }
    }

    /// Get the identity bound to `connection`, if it ever joined.
    #[must_use]
    pub fn resolve(&self, connection: &ConnectionId) -> Option<Identity> {
        self.bindings.get(connection).map(|entry| entry.value().clone())
    }

    /// Remove the binding for `connection`, returning the identity it held.
    pub fn unbind(&self, connection: &ConnectionId) -> Option<Identity> {
        let removed = self.bindings.remove(connection).map(|(_, identity)| identity);
        if let Some(identity) = &removed {
            debug!(connection = %connection, identity = %identity, "Unbound session");
        }
        removed
    }

    /// Get the number of bound connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if no connection is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Lifecycle of a connection: `Unjoined -> Joined -> Closed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connected, has not registered yet.
    #[default]
    Unjoined,
    /// Registered under an identity.
    Joined(Identity),
    /// Left or disconnected. Terminal.
    Closed,
}

/// Per-connection state, owned by the worker driving the connection.
///
/// The router takes `&mut Session`, so events from one connection are
/// processed one at a time and in arrival order.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    /// Create a session for a freshly accepted connection.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Unjoined,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Get the identity this session joined as, while joined.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Joined(identity) => Some(identity),
            _ => None,
        }
    }

    /// Check if the session reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub(crate) fn set_state(&mut self, state: SessionState) -> SessionState {
        std::mem::replace(&mut self.state, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_bind_resolve_unbind() {
        let bindings = SessionBinding::new();
        let conn = ConnectionId::from("conn-1");

        assert!(bindings.resolve(&conn).is_none());

        bindings.bind(&conn, "alice".into()).unwrap();
        assert_eq!(bindings.resolve(&conn), Some(Identity::new("alice")));
        assert_eq!(bindings.len(), 1);

        assert_eq!(bindings.unbind(&conn), Some(Identity::new("alice")));
        assert!(bindings.is_empty());

        // Unbinding twice is fine.
        assert!(bindings.unbind(&conn).is_none());
    }

    #[test]
    fn test_rebind_same_identity() {
        let bindings = SessionBinding::new();
        let conn = ConnectionId::from("conn-1");

        bindings.bind(&conn, "alice".into()).unwrap();
        assert!(bindings.bind(&conn, "alice".into()).is_ok());
    }

    #[test]
    fn test_rebind_different_identity() {
        let bindings = SessionBinding::new();
        let conn = ConnectionId::from("conn-1");

        bindings.bind(&conn, "alice".into()).unwrap();
        let err = bindings.bind(&conn, "bob".into()).unwrap_err();

        assert_eq!(err.existing, Identity::new("alice"));
        assert_eq!(err.requested, Identity::new("bob"));
        assert_eq!(bindings.resolve(&conn), Some(Identity::new("alice")));
    }

    #[test]
    fn test_session_states() {
        let mut session = Session::new("conn-1".into());
        assert_eq!(session.state(), &SessionState::Unjoined);
        assert!(session.identity().is_none());

        session.set_state(SessionState::Joined("alice".into()));
        assert_eq!(session.identity(), Some(&Identity::new("alice")));

        let previous = session.set_state(SessionState::Closed);
        assert_eq!(previous, SessionState::Joined("alice".into()));
        assert!(session.is_closed());
    }
}
