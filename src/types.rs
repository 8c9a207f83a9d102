//! Core types for DID lifecycle management.
//!
//! This module provides the identity record itself together with the small
//! value types it is made of: lifecycle status, public keys and the passphrase
//! hash algorithm selector.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::DidError;

/// A locally managed decentralized identity record.
///
/// Only `username`, `passphrase_hash`, `passphrase_hash_algorithm`,
/// `public_keys`, `status` and `created` are part of the serialized form. The
/// passphrase and the `verified`/`authenticated` flags live in memory only.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Did {
    /// Unique key of the record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext passphrase, present only while creating or authenticating
    #[serde(skip)]
    pub passphrase: Option<String>,

    /// Self-describing passphrase hash (`$scheme$cost$payload`)
    #[serde(rename = "passphraseHash")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_hash: Option<String>,

    /// Algorithm the passphrase hash was (or is to be) produced with
    #[serde(rename = "passphraseHashAlgorithm")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_hash_algorithm: Option<PassphraseHashAlgorithm>,

    /// Public keys bound to this identity, in insertion order without duplicates
    #[serde(rename = "publicKeys")]
    #[serde(default)]
    pub public_keys: Vec<PublicKey>,

    /// Lifecycle status
    #[serde(default)]
    pub status: DidStatus,

    /// When the record was first saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub verified: bool,

    #[serde(skip)]
    pub authenticated: bool,
}

impl Did {
    /// Creates an empty record for the given username
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Creates a record carrying a plaintext passphrase
    pub fn with_passphrase(username: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            ..Self::new(username)
        }
    }

    /// Declares the passphrase hash algorithm on this record
    pub fn using(mut self, algorithm: PassphraseHashAlgorithm) -> Self {
        self.passphrase_hash_algorithm = Some(algorithm);
        self
    }

    /// Returns the username as a string slice, if any
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Appends a public key unless an identical key is already bound.
    ///
    /// Returns `true` if the key was added.
    pub fn add_public_key(&mut self, key: PublicKey) -> bool {
        if self.public_keys.contains(&key) {
            return false;
        }
        self.public_keys.push(key);
        true
    }

    /// Wipes and drops the plaintext passphrase
    pub fn clear_passphrase(&mut self) {
        if let Some(mut passphrase) = self.passphrase.take() {
            passphrase.zeroize();
        }
    }

    /// Copy of this record without any credential material
    pub fn without_secrets(&self) -> Self {
        Self {
            passphrase: None,
            passphrase_hash: None,
            passphrase_hash_algorithm: None,
            verified: false,
            authenticated: false,
            ..self.clone()
        }
    }

    /// Lifecycle state of a record as loaded from the store
    pub fn lifecycle_state(loaded: Option<&Did>) -> LifecycleState {
        match loaded {
            None => LifecycleState::New,
            Some(did) if did.status == DidStatus::Revoked => LifecycleState::Revoked,
            Some(did) if did.passphrase_hash.is_some() => LifecycleState::Active,
            Some(_) => LifecycleState::New,
        }
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Did")
            .field("username", &self.username)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("passphrase_hash", &self.passphrase_hash.as_ref().map(|_| "[REDACTED]"))
            .field("passphrase_hash_algorithm", &self.passphrase_hash_algorithm)
            .field("public_keys", &self.public_keys)
            .field("status", &self.status)
            .field("created", &self.created)
            .field("verified", &self.verified)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Stored status of a DID record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DidStatus {
    #[default]
    Uninitialized,
    Active,
    Revoked,
}

/// Lifecycle state derived from what the store holds for a username
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No usable record exists
    New,
    /// A record with a passphrase hash exists
    Active,
    /// The record was revoked; terminal
    Revoked,
}

/// A public key bound to an identity, as supplied by the key ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Human readable label of the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Short fingerprint of the key material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Encoded key material
    pub address: String,

    /// Whether this is the identity key of the key ring
    #[serde(rename = "isIdentityKey")]
    #[serde(default)]
    pub identity_key: bool,
}

impl PublicKey {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            alias: None,
            fingerprint: None,
            address: address.into(),
            identity_key: false,
        }
    }
}

/// Key derivation scheme used for passphrase hashes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassphraseHashAlgorithm {
    #[default]
    Argon2id,
    Argon2i,
    Argon2d,
}

impl PassphraseHashAlgorithm {
    /// Scheme identifier written between the first two `$` of an encoded hash
    pub fn scheme_id(&self) -> &'static str {
        match self {
            PassphraseHashAlgorithm::Argon2id => "argon2id",
            PassphraseHashAlgorithm::Argon2i => "argon2i",
            PassphraseHashAlgorithm::Argon2d => "argon2d",
        }
    }
}

impl fmt::Display for PassphraseHashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme_id())
    }
}

impl FromStr for PassphraseHashAlgorithm {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "argon2id" => Ok(PassphraseHashAlgorithm::Argon2id),
            "argon2i" => Ok(PassphraseHashAlgorithm::Argon2i),
            "argon2d" => Ok(PassphraseHashAlgorithm::Argon2d),
            _ => Err(DidError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}
