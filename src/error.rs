//! Error types for DID lifecycle operations.
//!
//! This module provides the error taxonomy shared by the hashing service, the
//! lifecycle engine and the record store boundary. It uses the `thiserror`
//! crate for error handling. None of these errors cross the dispatcher: each
//! request type maps them onto its own numeric error codes.

use std::fmt;

use thiserror::Error;

/// Errors that can occur during DID lifecycle and hashing operations
#[derive(Error, Debug)]
pub enum DidError {
    /// The request payload was missing entirely
    #[error("Request required")]
    RequestRequired,

    /// A required input field was absent
    #[error("{0} required")]
    FieldRequired(Field),

    /// No record exists for the username and autogeneration was not requested
    #[error("Username unknown")]
    UsernameUnknown,

    /// The stored and the requested passphrase hash algorithms disagree
    #[error("Passphrase hash algorithm mismatch")]
    PassphraseHashAlgorithmMismatch,

    /// The supplied passphrase does not match the stored hash
    #[error("Passphrase mismatch")]
    PassphraseMismatch,

    /// The identity has been revoked
    #[error("DID revoked")]
    Revoked,

    /// The hashing backend does not know the named algorithm
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A stored hash string could not be decoded
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Loading or saving a record failed
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// A configuration value is out of range or unparsable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The dispatcher does not know the named operation
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// Errors reported by a [`crate::RecordStore`] implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist and creation was not allowed
    #[error("Record not found")]
    NotFound,

    /// A create-only write found the key already taken
    #[error("Record already exists")]
    AlreadyExists,

    /// The record could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure (I/O, locking, ...)
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Request fields that can be reported as missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Did,
    Username,
    Passphrase,
    PassphraseHashAlgorithm,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Did => "DID",
            Field::Username => "Username",
            Field::Passphrase => "Passphrase",
            Field::PassphraseHashAlgorithm => "Passphrase hash algorithm",
        };
        f.write_str(name)
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, DidError>;
