//! Hashing primitives for identity management.
//!
//! This module provides content hashes, short fingerprints and salted
//! passphrase hashes, together with their verification. The service holds
//! only its configuration and is safe to share between threads.

mod content;
mod passphrase;

pub use content::{Hash, HashAlgorithm, HashForm};

use crate::config::HashingConfig;
use crate::error::Result;
use crate::types::PassphraseHashAlgorithm;

use passphrase::PassphraseHash;

/// Stateless hashing service
#[derive(Debug, Clone, Default)]
pub struct HashingService {
    config: HashingConfig,
}

impl HashingService {
    pub fn new(config: HashingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HashingConfig {
        &self.config
    }

    /// Full content hash using the configured content algorithm
    pub fn generate_content_hash(&self, content: &[u8]) -> Result<Hash> {
        let algorithm: HashAlgorithm = self.config.content_algorithm.parse()?;
        Ok(Hash::compute(algorithm, content))
    }

    /// Short fingerprint over the digest bytes of a full content hash
    pub fn generate_fingerprint(&self, full_hash_digest: &[u8]) -> Result<Hash> {
        let algorithm: HashAlgorithm = self.config.fingerprint_algorithm.parse()?;
        Ok(Hash::compute(algorithm, full_hash_digest))
    }

    /// Salted passphrase hash using the configured scheme and cost
    pub fn generate_passphrase_hash(&self, plaintext: &str) -> Result<String> {
        self.generate_passphrase_hash_with(self.config.passphrase_algorithm, plaintext)
    }

    /// Salted passphrase hash using an explicit scheme and the configured cost
    pub fn generate_passphrase_hash_with(
        &self,
        algorithm: PassphraseHashAlgorithm,
        plaintext: &str,
    ) -> Result<String> {
        let hash = PassphraseHash::generate(algorithm, self.config.passphrase_cost, plaintext.as_bytes())?;
        Ok(hash.encode())
    }

    /// Checks `plaintext` against an encoded passphrase hash.
    ///
    /// The scheme and cost are taken from the encoded string, not from the
    /// configuration, so hashes made under an older configuration keep
    /// verifying.
    pub fn verify_passphrase_hash(&self, plaintext: &str, encoded: &str) -> Result<bool> {
        PassphraseHash::parse(encoded)?.verify(plaintext.as_bytes())
    }

    /// Scheme named by an encoded passphrase hash
    pub fn passphrase_hash_algorithm_of(encoded: &str) -> Result<PassphraseHashAlgorithm> {
        Ok(PassphraseHash::parse(encoded)?.algorithm)
    }

    /// Recomputes and compares a content hash.
    ///
    /// A full hash is recomputed with its own algorithm. A fingerprint is
    /// recomputed over the configured full hash of `content`.
    pub fn verify_content_hash(&self, content: &[u8], expected: &Hash, form: HashForm) -> Result<bool> {
        let actual = match form {
            HashForm::Full => Hash::compute(expected.algorithm, content),
            HashForm::Fingerprint => {
                let full = self.generate_content_hash(content)?;
                Hash::compute(expected.algorithm, &full.digest)
            }
        };
        Ok(actual.matches(expected))
    }
}
