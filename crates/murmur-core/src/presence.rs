//! Presence tracking for Murmur.
//!
//! The registry holds the set of identities currently in the chat. Every
//! mutation returns a snapshot taken under the same lock, so the snapshot a
//! caller broadcasts always reflects its own change.

use crate::message::Identity;
use murmur_protocol::{destinations, ServerFrame};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// A point-in-time copy of the presence set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PresenceSnapshot {
    /// Incremented on every change to the set.
    version: u64,
    /// Online identities, sorted.
    #[serde(rename = "users")]
    members: BTreeSet<Identity>,
}

impl PresenceSnapshot {
    /// Get the version of the set this snapshot was taken from.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get the number of online identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if `name` is online.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Iterate over online identities in sorted order.
    pub fn members(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    /// Online display names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(ToString::to_string).collect()
    }

    /// Build the frame published on the users topic.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Users {
            destination: destinations::USERS.to_string(),
            version: self.version,
            users: self.names(),
        }
    }
}

#[derive(Debug, Default)]
struct PresenceSet {
    members: BTreeSet<Identity>,
    version: u64,
}

impl PresenceSet {
    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            version: self.version,
            members: self.members.clone(),
        }
    }
}

/// The set of connected identities.
///
/// Shared between connection workers behind an `Arc`. Critical sections are
/// a single set operation plus a clone for the snapshot.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    inner: RwLock<PresenceSet>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity, returning the resulting snapshot.
    ///
    /// Joining an identity that is already present leaves the set unchanged.
    pub fn join(&self, identity: Identity) -> PresenceSnapshot {
        let mut set = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if set.members.insert(identity.clone()) {
            set.version += 1;
            debug!(identity = %identity, online = set.members.len(), "Presence: joined");
        }
        set.snapshot()
    }

    /// Remove an identity, returning the resulting snapshot.
    ///
    /// Removing an absent identity is a no-op.
    pub fn leave(&self, identity: &Identity) -> PresenceSnapshot {
        let mut set = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if set.members.remove(identity) {
            set.version += 1;
            debug!(identity = %identity, online = set.members.len(), "Presence: left");
        }
        set.snapshot()
    }

    /// Take a snapshot of the current set.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Check if `name` is online.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .contains(name)
    }

    /// Get the number of online identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
