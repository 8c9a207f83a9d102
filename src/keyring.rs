//! Key ring boundary.
//!
//! Public-key management lives outside this crate. The engine only asks the
//! key ring which public keys belong to an authentication attempt and binds
//! them to the resulting record.

use std::collections::HashMap;

use crate::types::PublicKey;

/// Source of public keys for an authentication attempt
pub trait KeyRing: Send + Sync {
    /// Keys to bind to `username` after a successful authenticate or create
    fn public_keys(&self, username: &str) -> Vec<PublicKey>;
}

/// Key ring that never supplies keys
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyRing;

impl KeyRing for NoKeyRing {
    fn public_keys(&self, _username: &str) -> Vec<PublicKey> {
        Vec::new()
    }
}

/// Key ring backed by a fixed username to keys table
#[derive(Debug, Clone, Default)]
pub struct StaticKeyRing {
    keys: HashMap<String, Vec<PublicKey>>,
}

impl StaticKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, username: impl Into<String>, key: PublicKey) -> Self {
        self.keys.entry(username.into()).or_default().push(key);
        self
    }
}

impl KeyRing for StaticKeyRing {
    fn public_keys(&self, username: &str) -> Vec<PublicKey> {
        self.keys.get(username).cloned().unwrap_or_default()
    }
}
