//! A DID lifecycle and authentication engine for locally managed identities.
//!
//! This library verifies, authenticates, creates, saves and revokes
//! username/passphrase identities, keeps the node identity and other local
//! users in an in-memory cache, and provides content hashing and fingerprint
//! verification. Persistence and public-key management are supplied by the
//! caller through the [`RecordStore`] and [`KeyRing`] traits.

mod cache;
mod config;
mod dispatcher;
mod engine;
mod error;
mod hashing;
mod keyring;
mod requests;
mod store;
mod types;

#[cfg(test)]
mod proptests;

pub use cache::{CacheSlot, IdentityCache};
pub use config::{DidConfig, HashingConfig, MAX_PASSPHRASE_COST, MIN_PASSPHRASE_COST};
pub use dispatcher::{Envelope, Operation, Payload, RequestDispatcher, Routed};
pub use engine::{DidLifecycleEngine, Outcome};
pub use error::{DidError, Field, Result, StoreError};
pub use hashing::{Hash, HashAlgorithm, HashForm, HashingService};
pub use keyring::{KeyRing, NoKeyRing, StaticKeyRing};
pub use requests::{
    AuthenticateErrorCode, AuthenticateRequest, ErrorCode, GetLocalDidErrorCode,
    GetLocalDidRequest, HashErrorCode, HashRequest, RevokeErrorCode, RevokeRequest,
    SaveErrorCode, SaveRequest, ServiceRequest, VerifyErrorCode, VerifyHashErrorCode,
    VerifyHashRequest, VerifyRequest,
};
pub use store::{from_record, to_record, MemoryRecordStore, Record, RecordStore, DID_ENTITY_KIND};
pub use types::{Did, DidStatus, LifecycleState, PassphraseHashAlgorithm, PublicKey};

/// Builds a dispatcher over a fresh engine configured from the environment
///
/// # Arguments
/// * `store` - Record store the engine persists identities to
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use did_lifecycle::{
///     dispatcher_from_env, AuthenticateRequest, Did, Envelope, MemoryRecordStore, Payload,
/// };
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dispatcher = dispatcher_from_env(Arc::new(MemoryRecordStore::new()))?;
///
///     let request = AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret"))
///         .autogenerate(true);
///     let mut envelope = Envelope::new("AUTHENTICATE", Payload::Authenticate(request));
///     dispatcher.dispatch(&mut envelope);
///
///     println!("Envelope after dispatch: {:?}", envelope);
///     Ok(())
/// }
/// ```
pub fn dispatcher_from_env(store: std::sync::Arc<dyn RecordStore>) -> Result<RequestDispatcher> {
    let config = DidConfig::from_env()?;
    let engine = DidLifecycleEngine::from_config(&config, store);
    Ok(RequestDispatcher::new(std::sync::Arc::new(engine)))
}
