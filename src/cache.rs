//! In-memory identity caches.
//!
//! One node identity slot, a per-username map of other authenticated local
//! users, and a contacts map of secret-free peer identities. Entries live for
//! as long as the cache does; nothing is evicted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::Did;

/// Where an identity ended up when it was cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSlot {
    Node,
    LocalUser,
}

#[derive(Debug, Default)]
struct CacheState {
    node: Option<Did>,
    local_users: HashMap<String, Did>,
    contacts: HashMap<String, Did>,
}

/// Identity caches owned by one engine instance
#[derive(Debug, Default)]
pub struct IdentityCache {
    state: Mutex<CacheState>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caches an authenticated identity.
    ///
    /// The first identity cached becomes the node identity; a later identity
    /// with the node's username refreshes the slot. Everyone else goes to the
    /// per-username map. The check and the write happen under one lock.
    pub fn cache_authenticated(&self, did: Did) -> Option<CacheSlot> {
        let username = did.username.clone()?;
        let mut state = self.state();

        let is_node = match &state.node {
            None => true,
            Some(node) => node.username.as_deref() == Some(username.as_str()),
        };

        if is_node {
            state.local_users.remove(&username);
            state.node = Some(did);
            Some(CacheSlot::Node)
        } else {
            state.local_users.insert(username, did);
            Some(CacheSlot::LocalUser)
        }
    }

    /// Replaces an identity wherever it is already cached; never adds one
    pub fn refresh(&self, did: &Did) -> Option<CacheSlot> {
        let username = did.username.as_deref()?;
        let mut state = self.state();

        if let Some(node) = state.node.as_mut() {
            if node.username.as_deref() == Some(username) {
                *node = did.clone();
                return Some(CacheSlot::Node);
            }
        }
        if let Some(entry) = state.local_users.get_mut(username) {
            *entry = did.clone();
            return Some(CacheSlot::LocalUser);
        }
        None
    }

    pub fn node(&self) -> Option<Did> {
        self.state().node.clone()
    }

    pub fn local_user(&self, username: &str) -> Option<Did> {
        self.state().local_users.get(username).cloned()
    }

    /// The cached identity for `username`, from whichever slot holds it
    pub fn lookup(&self, username: &str) -> Option<Did> {
        let state = self.state();
        if let Some(node) = &state.node {
            if node.username.as_deref() == Some(username) {
                return Some(node.clone());
            }
        }
        state.local_users.get(username).cloned()
    }

    /// Records a known peer, stripped of any credential material
    pub fn put_contact(&self, did: &Did) {
        if let Some(username) = did.username.clone() {
            self.state().contacts.insert(username, did.without_secrets());
        }
    }

    pub fn contact(&self, username: &str) -> Option<Did> {
        self.state().contacts.get(username).cloned()
    }
}
