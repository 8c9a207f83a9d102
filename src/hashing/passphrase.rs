//! Salted, memory-hard passphrase hashes.
//!
//! Encoded form: `$<scheme-id>$<cost>$<base64url(salt || digest)>`.
//!
//! The cost is the base-2 logarithm of the Argon2 memory cost in KiB.
//! Iterations and lanes are fixed, so an encoded hash carries everything
//! needed to recompute it.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::config::{MAX_PASSPHRASE_COST, MIN_PASSPHRASE_COST};
use crate::error::{DidError, Result};
use crate::types::PassphraseHashAlgorithm;

pub(crate) const SALT_LEN: usize = 16;
pub(crate) const DIGEST_LEN: usize = 32;

const ITERATIONS: u32 = 2;
const LANES: u32 = 1;

/// Decoded parts of an encoded passphrase hash
#[derive(Clone)]
pub(crate) struct PassphraseHash {
    pub algorithm: PassphraseHashAlgorithm,
    pub cost: u32,
    salt: [u8; SALT_LEN],
    digest: [u8; DIGEST_LEN],
}

impl PassphraseHash {
    /// Hashes `passphrase` under a freshly generated salt
    pub fn generate(algorithm: PassphraseHashAlgorithm, cost: u32, passphrase: &[u8]) -> Result<Self> {
        check_cost(cost).map_err(DidError::InvalidConfig)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let digest = derive(algorithm, cost, passphrase, &salt)?;
        Ok(Self {
            algorithm,
            cost,
            salt,
            digest,
        })
    }

    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(SALT_LEN + DIGEST_LEN);
        payload.extend_from_slice(&self.salt);
        payload.extend_from_slice(&self.digest);
        let encoded = format!(
            "${}${}${}",
            self.algorithm.scheme_id(),
            self.cost,
            URL_SAFE_NO_PAD.encode(&payload)
        );
        payload.zeroize();
        encoded
    }

    pub fn parse(encoded: &str) -> Result<Self> {
        let mut parts = encoded.split('$');
        let (Some(""), Some(scheme), Some(cost), Some(payload), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(DidError::MalformedEncoding(
                "expected $scheme$cost$payload".to_string(),
            ));
        };

        let algorithm: PassphraseHashAlgorithm = scheme.parse()?;

        if cost.is_empty() || cost.len() > 2 || !cost.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DidError::MalformedEncoding(format!("invalid cost '{}'", cost)));
        }
        let cost: u32 = cost
            .parse()
            .map_err(|_| DidError::MalformedEncoding("invalid cost".to_string()))?;
        check_cost(cost).map_err(DidError::MalformedEncoding)?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| DidError::MalformedEncoding(format!("payload: {}", e)))?;
        if bytes.len() != SALT_LEN + DIGEST_LEN {
            return Err(DidError::MalformedEncoding(format!(
                "payload must be {} bytes, got {}",
                SALT_LEN + DIGEST_LEN,
                bytes.len()
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut digest = [0u8; DIGEST_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        digest.copy_from_slice(&bytes[SALT_LEN..]);

        Ok(Self {
            algorithm,
            cost,
            salt,
            digest,
        })
    }

    /// Recomputes the digest for `passphrase` and compares in constant time
    pub fn verify(&self, passphrase: &[u8]) -> Result<bool> {
        let mut candidate = derive(self.algorithm, self.cost, passphrase, &self.salt)?;
        let matched = bool::from(candidate.ct_eq(&self.digest));
        candidate.zeroize();
        Ok(matched)
    }
}

impl Drop for PassphraseHash {
    fn drop(&mut self) {
        self.digest.zeroize();
    }
}

fn check_cost(cost: u32) -> std::result::Result<(), String> {
    if (MIN_PASSPHRASE_COST..=MAX_PASSPHRASE_COST).contains(&cost) {
        Ok(())
    } else {
        Err(format!(
            "cost {} outside {}..={}",
            cost, MIN_PASSPHRASE_COST, MAX_PASSPHRASE_COST
        ))
    }
}

fn derive(
    algorithm: PassphraseHashAlgorithm,
    cost: u32,
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
) -> Result<[u8; DIGEST_LEN]> {
    let params = Params::new(1 << cost, ITERATIONS, LANES, Some(DIGEST_LEN))
        .map_err(|e| DidError::UnsupportedAlgorithm(format!("{}: {}", algorithm, e)))?;

    let variant = match algorithm {
        PassphraseHashAlgorithm::Argon2id => Algorithm::Argon2id,
        PassphraseHashAlgorithm::Argon2i => Algorithm::Argon2i,
        PassphraseHashAlgorithm::Argon2d => Algorithm::Argon2d,
    };
    let argon2 = Argon2::new(variant, Version::V0x13, params);

    let mut output = [0u8; DIGEST_LEN];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| DidError::UnsupportedAlgorithm(format!("{}: {}", algorithm, e)))?;
    Ok(output)
}
