//! Configuration for the hashing service and the lifecycle engine.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{DidError, Result};
use crate::types::PassphraseHashAlgorithm;

/// Smallest accepted passphrase cost (2^3 KiB, the Argon2 floor for one lane)
pub const MIN_PASSPHRASE_COST: u32 = 3;

/// Largest accepted passphrase cost (2^22 KiB = 4 GiB)
pub const MAX_PASSPHRASE_COST: u32 = 22;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DidConfig {
    pub hashing: HashingConfig,
}

/// Algorithms and cost used by [`crate::HashingService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Digest algorithm name for full content hashes, e.g. `SHA-256`
    pub content_algorithm: String,
    /// Digest algorithm name for fingerprints, e.g. `SHA-224`
    pub fingerprint_algorithm: String,
    /// Scheme used when a record does not declare one
    pub passphrase_algorithm: PassphraseHashAlgorithm,
    /// Base-2 logarithm of the Argon2 memory cost in KiB
    pub passphrase_cost: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            content_algorithm: "SHA-256".to_string(),
            fingerprint_algorithm: "SHA-224".to_string(),
            passphrase_algorithm: PassphraseHashAlgorithm::Argon2id,
            passphrase_cost: 14,
        }
    }
}

impl HashingConfig {
    /// Same defaults with a different passphrase cost
    pub fn with_passphrase_cost(mut self, cost: u32) -> Self {
        self.passphrase_cost = cost;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_PASSPHRASE_COST..=MAX_PASSPHRASE_COST).contains(&self.passphrase_cost) {
            return Err(DidError::InvalidConfig(format!(
                "passphrase cost {} outside {}..={}",
                self.passphrase_cost, MIN_PASSPHRASE_COST, MAX_PASSPHRASE_COST
            )));
        }
        Ok(())
    }
}

impl DidConfig {
    /// Load configuration from `DID_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = HashingConfig::default();

        let content_algorithm =
            env::var("DID_CONTENT_HASH_ALGORITHM").unwrap_or(defaults.content_algorithm);
        let fingerprint_algorithm =
            env::var("DID_FINGERPRINT_ALGORITHM").unwrap_or(defaults.fingerprint_algorithm);
        let passphrase_algorithm = match env::var("DID_PASSPHRASE_HASH_ALGORITHM") {
            Ok(name) => name.parse()?,
            Err(_) => defaults.passphrase_algorithm,
        };
        let passphrase_cost = env::var("DID_PASSPHRASE_HASH_COST")
            .unwrap_or_else(|_| defaults.passphrase_cost.to_string())
            .parse()
            .map_err(|_| DidError::InvalidConfig("Invalid passphrase hash cost".to_string()))?;

        let hashing = HashingConfig {
            content_algorithm,
            fingerprint_algorithm,
            passphrase_algorithm,
            passphrase_cost,
        };
        hashing.validate()?;

        Ok(Self { hashing })
    }
}
