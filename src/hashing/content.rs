//! Content hashes and fingerprints.
//!
//! A [`Hash`] is rendered as the base58 encoding of its multihash
//! (`code || length || digest`), so the textual form carries the algorithm
//! along with the digest.

use std::fmt;
use std::str::FromStr;

use base58::{FromBase58, ToBase58};
use multihash::Multihash;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{DidError, Result};

// Multihash table codes
const SHA2_256: u64 = 0x12;
const SHA2_512: u64 = 0x13;
const SHA2_384: u64 = 0x20;
const SHA2_224: u64 = 0x1013;

/// Digest algorithms available to the hashing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "SHA-224",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn multihash_code(&self) -> u64 {
        match self {
            HashAlgorithm::Sha224 => SHA2_224,
            HashAlgorithm::Sha256 => SHA2_256,
            HashAlgorithm::Sha384 => SHA2_384,
            HashAlgorithm::Sha512 => SHA2_512,
        }
    }

    pub fn from_multihash_code(code: u64) -> Result<Self> {
        match code {
            SHA2_224 => Ok(HashAlgorithm::Sha224),
            SHA2_256 => Ok(HashAlgorithm::Sha256),
            SHA2_384 => Ok(HashAlgorithm::Sha384),
            SHA2_512 => Ok(HashAlgorithm::Sha512),
            other => Err(DidError::UnsupportedAlgorithm(format!("multihash code {:#x}", other))),
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = DidError;

    /// Accepts `SHA-256`, `sha256`, `SHA_256` and similar spellings
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA224" => Ok(HashAlgorithm::Sha224),
            "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(DidError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Which kind of hash a caller is verifying against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashForm {
    /// Digest of the content itself
    #[default]
    Full,
    /// Digest of the full hash's digest bytes
    Fingerprint,
}

/// An algorithm tagged digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
}

impl Hash {
    /// Hashes `data` with `algorithm`
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.digest(data),
        }
    }

    /// Base58 multihash rendering
    pub fn encode(&self) -> Result<String> {
        let multihash = Multihash::<64>::wrap(self.algorithm.multihash_code(), &self.digest)
            .map_err(|e| DidError::MalformedEncoding(e.to_string()))?;
        Ok(multihash.to_bytes().to_base58())
    }

    /// Parses a base58 multihash produced by [`Hash::encode`]
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = encoded
            .from_base58()
            .map_err(|e| DidError::MalformedEncoding(format!("base58: {:?}", e)))?;
        let multihash = Multihash::<64>::from_bytes(&bytes)
            .map_err(|e| DidError::MalformedEncoding(e.to_string()))?;
        let algorithm = HashAlgorithm::from_multihash_code(multihash.code())?;
        if multihash.digest().len() != algorithm.output_len() {
            return Err(DidError::MalformedEncoding(format!(
                "{} digest must be {} bytes",
                algorithm,
                algorithm.output_len()
            )));
        }
        Ok(Self {
            algorithm,
            digest: multihash.digest().to_vec(),
        })
    }

    /// Constant-time comparison of algorithm and digest
    pub fn matches(&self, other: &Hash) -> bool {
        self.algorithm == other.algorithm && bool::from(self.digest.ct_eq(&other.digest))
    }
}
