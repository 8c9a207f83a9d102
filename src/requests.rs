//! Request types accepted by the dispatcher.
//!
//! Every operation has its own request type carrying inputs, outputs written
//! in place, and an operation-scoped error code. Codes are small integers
//! numbered from 1 in declaration order; `0` (no code) means success.

use std::fmt;

use tracing::warn;

use crate::error::{DidError, Field};
use crate::hashing::{Hash, HashForm};
use crate::types::Did;

/// Numeric error code of one request type
pub trait ErrorCode: Copy + fmt::Debug {
    /// Code used when the payload was missing entirely
    const REQUEST_REQUIRED: Self;

    fn value(self) -> u8;

    /// Code for a lifecycle error, if this request type can report it
    fn from_error(err: &DidError) -> Option<Self>;
}

/// Behaviour shared by all request types
pub trait ServiceRequest: Default {
    type Code: ErrorCode;

    fn error_code(&self) -> Option<Self::Code>;

    fn set_error_code(&mut self, code: Self::Code);

    /// Fresh request carrying only the request-required code
    fn required() -> Self {
        let mut request = Self::default();
        request.set_error_code(Self::Code::REQUEST_REQUIRED);
        request
    }

    /// Numeric code, `0` on success
    fn code(&self) -> u8 {
        self.error_code().map_or(0, ErrorCode::value)
    }

    fn succeeded(&self) -> bool {
        self.error_code().is_none()
    }

    /// Records `err` as this request's error code
    fn fail(&mut self, err: &DidError) {
        match Self::Code::from_error(err) {
            Some(code) => self.set_error_code(code),
            None => warn!(error = %err, "error has no code for this request type"),
        }
    }
}

/// Checks required fields in the given order, stopping at the first gap.
///
/// Empty strings count as missing.
pub(crate) fn check_required(did: Option<&Did>, fields: &[Field]) -> Result<(), DidError> {
    for field in fields {
        let present = match field {
            Field::Did => did.is_some(),
            Field::Username => did.and_then(|d| d.username.as_deref()).map_or(false, |u| !u.is_empty()),
            Field::Passphrase => did.and_then(|d| d.passphrase.as_deref()).map_or(false, |p| !p.is_empty()),
            Field::PassphraseHashAlgorithm => did.map_or(false, |d| d.passphrase_hash_algorithm.is_some()),
        };
        if !present {
            return Err(DidError::FieldRequired(*field));
        }
    }
    Ok(())
}

macro_rules! impl_service_request {
    ($request:ty, $code:ty) => {
        impl ServiceRequest for $request {
            type Code = $code;

            fn error_code(&self) -> Option<$code> {
                self.error_code
            }

            fn set_error_code(&mut self, code: $code) {
                self.error_code = Some(code);
            }
        }
    };
}

// ==================== GET_LOCAL_DID ====================

/// Looks up (or establishes) the local identity for a username
#[derive(Debug, Clone, Default)]
pub struct GetLocalDidRequest {
    pub did: Option<Did>,
    pub error_code: Option<GetLocalDidErrorCode>,
}

impl GetLocalDidRequest {
    pub fn new(did: Did) -> Self {
        Self {
            did: Some(did),
            error_code: None,
        }
    }
}

/// Error codes of [`GetLocalDidRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GetLocalDidErrorCode {
    RequestRequired = 1,
    DidRequired = 2,
    UsernameRequired = 3,
    PassphraseRequired = 4,
    PassphraseHashAlgorithmUnknown = 5,
    PassphraseHashAlgorithmMismatch = 6,
    Revoked = 7,
    UnsupportedAlgorithm = 8,
    MalformedPassphraseHash = 9,
    PersistenceFailure = 10,
}

impl ErrorCode for GetLocalDidErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::FieldRequired(Field::Did) => Some(Self::DidRequired),
            DidError::FieldRequired(Field::Username) => Some(Self::UsernameRequired),
            DidError::FieldRequired(Field::Passphrase) => Some(Self::PassphraseRequired),
            DidError::FieldRequired(Field::PassphraseHashAlgorithm) => {
                Some(Self::PassphraseHashAlgorithmUnknown)
            }
            DidError::PassphraseHashAlgorithmMismatch => Some(Self::PassphraseHashAlgorithmMismatch),
            DidError::Revoked => Some(Self::Revoked),
            DidError::UnsupportedAlgorithm(_) | DidError::InvalidConfig(_) => {
                Some(Self::UnsupportedAlgorithm)
            }
            DidError::MalformedEncoding(_) => Some(Self::MalformedPassphraseHash),
            DidError::Persistence(_) => Some(Self::PersistenceFailure),
            DidError::UsernameUnknown
            | DidError::PassphraseMismatch
            | DidError::UnknownOperation(_) => None,
        }
    }
}

impl_service_request!(GetLocalDidRequest, GetLocalDidErrorCode);

// ==================== VERIFY ====================

/// Checks whether a stored record exists for the DID's username
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    pub did: Option<Did>,
    pub error_code: Option<VerifyErrorCode>,
}

impl VerifyRequest {
    pub fn new(did: Did) -> Self {
        Self {
            did: Some(did),
            error_code: None,
        }
    }
}

/// Error codes of [`VerifyRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyErrorCode {
    RequestRequired = 1,
}

impl ErrorCode for VerifyErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            _ => None,
        }
    }
}

impl_service_request!(VerifyRequest, VerifyErrorCode);

// ==================== AUTHENTICATE / AUTHENTICATE_CREATE ====================

/// Authenticates a username and passphrase, optionally creating the identity
#[derive(Debug, Clone, Default)]
pub struct AuthenticateRequest {
    pub did: Option<Did>,
    /// Create and authenticate the identity if the username is unknown
    pub autogenerate: bool,
    pub error_code: Option<AuthenticateErrorCode>,
}

impl AuthenticateRequest {
    pub fn new(did: Did) -> Self {
        Self {
            did: Some(did),
            autogenerate: false,
            error_code: None,
        }
    }

    pub fn autogenerate(mut self, autogenerate: bool) -> Self {
        self.autogenerate = autogenerate;
        self
    }

    /// Whether the request's DID came out authenticated
    pub fn authenticated(&self) -> bool {
        self.did.as_ref().map_or(false, |d| d.authenticated)
    }
}

/// Error codes of [`AuthenticateRequest`].
///
/// A wrong passphrase is not an error: it leaves the DID unauthenticated
/// with no code set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthenticateErrorCode {
    RequestRequired = 1,
    DidRequired = 2,
    UsernameRequired = 3,
    PassphraseRequired = 4,
    UsernameUnknown = 5,
    PassphraseHashAlgorithmMismatch = 6,
    Revoked = 7,
    UnsupportedAlgorithm = 8,
    MalformedPassphraseHash = 9,
    PersistenceFailure = 10,
}

impl ErrorCode for AuthenticateErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::FieldRequired(Field::Did) => Some(Self::DidRequired),
            DidError::FieldRequired(Field::Username) => Some(Self::UsernameRequired),
            DidError::FieldRequired(Field::Passphrase) => Some(Self::PassphraseRequired),
            DidError::FieldRequired(Field::PassphraseHashAlgorithm)
            | DidError::PassphraseMismatch
            | DidError::UnknownOperation(_) => None,
            DidError::UsernameUnknown => Some(Self::UsernameUnknown),
            DidError::PassphraseHashAlgorithmMismatch => Some(Self::PassphraseHashAlgorithmMismatch),
            DidError::Revoked => Some(Self::Revoked),
            DidError::UnsupportedAlgorithm(_) | DidError::InvalidConfig(_) => {
                Some(Self::UnsupportedAlgorithm)
            }
            DidError::MalformedEncoding(_) => Some(Self::MalformedPassphraseHash),
            DidError::Persistence(_) => Some(Self::PersistenceFailure),
        }
    }
}

impl_service_request!(AuthenticateRequest, AuthenticateErrorCode);

// ==================== SAVE ====================

/// Creates or updates a stored identity
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub did: Option<Did>,
    /// Create the record if absent; otherwise the record must already exist
    pub auto_create: bool,
    pub error_code: Option<SaveErrorCode>,
}

impl Default for SaveRequest {
    fn default() -> Self {
        Self {
            did: None,
            auto_create: true,
            error_code: None,
        }
    }
}

impl SaveRequest {
    pub fn new(did: Did) -> Self {
        Self {
            did: Some(did),
            ..Self::default()
        }
    }
}

/// Error codes of [`SaveRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SaveErrorCode {
    RequestRequired = 1,
    DidRequired = 2,
    UsernameRequired = 3,
    PassphraseRequired = 4,
    UnsupportedAlgorithm = 5,
    PersistenceFailure = 6,
    Revoked = 7,
}

impl ErrorCode for SaveErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::FieldRequired(Field::Did) => Some(Self::DidRequired),
            DidError::FieldRequired(Field::Username) => Some(Self::UsernameRequired),
            DidError::FieldRequired(Field::Passphrase) => Some(Self::PassphraseRequired),
            DidError::UnsupportedAlgorithm(_) | DidError::InvalidConfig(_) => {
                Some(Self::UnsupportedAlgorithm)
            }
            DidError::Persistence(_) => Some(Self::PersistenceFailure),
            DidError::Revoked => Some(Self::Revoked),
            _ => None,
        }
    }
}

impl_service_request!(SaveRequest, SaveErrorCode);

// ==================== REVOKE ====================

/// Revokes an identity; the owner's passphrase is required
#[derive(Debug, Clone, Default)]
pub struct RevokeRequest {
    pub did: Option<Did>,
    pub error_code: Option<RevokeErrorCode>,
}

impl RevokeRequest {
    pub fn new(did: Did) -> Self {
        Self {
            did: Some(did),
            error_code: None,
        }
    }
}

/// Error codes of [`RevokeRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RevokeErrorCode {
    RequestRequired = 1,
    DidRequired = 2,
    UsernameRequired = 3,
    PassphraseRequired = 4,
    UsernameUnknown = 5,
    PassphraseMismatch = 6,
    AlreadyRevoked = 7,
    UnsupportedAlgorithm = 8,
    MalformedPassphraseHash = 9,
    PersistenceFailure = 10,
}

impl ErrorCode for RevokeErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::FieldRequired(Field::Did) => Some(Self::DidRequired),
            DidError::FieldRequired(Field::Username) => Some(Self::UsernameRequired),
            DidError::FieldRequired(Field::Passphrase) => Some(Self::PassphraseRequired),
            DidError::UsernameUnknown => Some(Self::UsernameUnknown),
            DidError::PassphraseMismatch => Some(Self::PassphraseMismatch),
            DidError::Revoked => Some(Self::AlreadyRevoked),
            DidError::UnsupportedAlgorithm(_) | DidError::InvalidConfig(_) => {
                Some(Self::UnsupportedAlgorithm)
            }
            DidError::MalformedEncoding(_) => Some(Self::MalformedPassphraseHash),
            DidError::Persistence(_) => Some(Self::PersistenceFailure),
            _ => None,
        }
    }
}

impl_service_request!(RevokeRequest, RevokeErrorCode);

// ==================== HASH ====================

/// Computes a content hash and/or its fingerprint
#[derive(Debug, Clone)]
pub struct HashRequest {
    pub content_to_hash: Vec<u8>,
    pub generate_full_hash: bool,
    pub generate_fingerprint: bool,
    /// Full content hash, when requested
    pub hash: Option<Hash>,
    /// Fingerprint of the full hash, when requested
    pub fingerprint: Option<Hash>,
    pub error_code: Option<HashErrorCode>,
}

impl Default for HashRequest {
    fn default() -> Self {
        Self {
            content_to_hash: Vec::new(),
            generate_full_hash: true,
            generate_fingerprint: true,
            hash: None,
            fingerprint: None,
            error_code: None,
        }
    }
}

impl HashRequest {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content_to_hash: content.into(),
            ..Self::default()
        }
    }
}

/// Error codes of [`HashRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashErrorCode {
    RequestRequired = 1,
    UnsupportedAlgorithm = 2,
}

impl ErrorCode for HashErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::UnsupportedAlgorithm(_) => Some(Self::UnsupportedAlgorithm),
            _ => None,
        }
    }
}

impl_service_request!(HashRequest, HashErrorCode);

// ==================== VERIFY_HASH ====================

/// Checks content against an encoded hash
#[derive(Debug, Clone, Default)]
pub struct VerifyHashRequest {
    pub content: Vec<u8>,
    /// Base58 multihash as produced by [`Hash::encode`]
    pub hash_to_verify: String,
    /// Whether `hash_to_verify` is a full hash or a fingerprint
    pub form: HashForm,
    pub is_a_match: bool,
    pub error_code: Option<VerifyHashErrorCode>,
}

impl VerifyHashRequest {
    pub fn new(content: impl Into<Vec<u8>>, hash_to_verify: impl Into<String>, form: HashForm) -> Self {
        Self {
            content: content.into(),
            hash_to_verify: hash_to_verify.into(),
            form,
            ..Self::default()
        }
    }
}

/// Error codes of [`VerifyHashRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyHashErrorCode {
    RequestRequired = 1,
    UnsupportedAlgorithm = 2,
    MalformedHash = 3,
}

impl ErrorCode for VerifyHashErrorCode {
    const REQUEST_REQUIRED: Self = Self::RequestRequired;

    fn value(self) -> u8 {
        self as u8
    }

    fn from_error(err: &DidError) -> Option<Self> {
        match err {
            DidError::RequestRequired => Some(Self::RequestRequired),
            DidError::UnsupportedAlgorithm(_) => Some(Self::UnsupportedAlgorithm),
            DidError::MalformedEncoding(_) => Some(Self::MalformedHash),
            _ => None,
        }
    }
}

impl_service_request!(VerifyHashRequest, VerifyHashErrorCode);
