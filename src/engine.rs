//! Core DID lifecycle functionality.
//!
//! This module provides the verify / authenticate / save / get-local /
//! authenticate-or-create / revoke state transitions and owns the identity
//! caches. A record's lifecycle state is derived from what the store holds
//! for its username: no record is `New`, a record with a passphrase hash is
//! `Active`, and a revoked record is terminal.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cache::IdentityCache;
use crate::config::DidConfig;
use crate::error::{DidError, Field, Result, StoreError};
use crate::hashing::HashingService;
use crate::keyring::{KeyRing, NoKeyRing};
use crate::requests::{
    check_required, AuthenticateRequest, GetLocalDidRequest, RevokeRequest, ServiceRequest,
};
use crate::store::{from_record, to_record, RecordStore, DID_ENTITY_KIND};
use crate::types::{Did, DidStatus, LifecycleState};

/// A record together with the failure, if any, of the step that produced it.
///
/// Returned where the record stays meaningful even when the step failed,
/// e.g. a save whose persistence failed still carries the hashed record.
#[derive(Debug)]
pub struct Outcome {
    pub did: Did,
    pub failure: Option<DidError>,
}

impl Outcome {
    fn ok(did: Did) -> Self {
        Self { did, failure: None }
    }

    fn failed(did: Did, failure: DidError) -> Self {
        Self {
            did,
            failure: Some(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Writes an outcome back into a request's DID slot and error code
macro_rules! settle {
    ($request:expr, $outcome:expr) => {{
        let outcome: Outcome = $outcome;
        if let Some(err) = &outcome.failure {
            $request.fail(err);
        }
        $request.did = Some(outcome.did);
    }};
}

/// How a record is written to the store
#[derive(Debug, Clone, Copy)]
enum Write {
    /// Create if absent, overwrite otherwise
    Upsert,
    /// The record must already exist
    Update,
    /// The key must be free
    Create,
}

/// DID lifecycle and authentication engine
pub struct DidLifecycleEngine {
    hashing: HashingService,
    store: Arc<dyn RecordStore>,
    key_ring: Arc<dyn KeyRing>,
    cache: IdentityCache,
}

impl DidLifecycleEngine {
    /// Creates an engine with empty caches and no key ring
    pub fn new(hashing: HashingService, store: Arc<dyn RecordStore>) -> Self {
        Self {
            hashing,
            store,
            key_ring: Arc::new(NoKeyRing),
            cache: IdentityCache::new(),
        }
    }

    pub fn from_config(config: &DidConfig, store: Arc<dyn RecordStore>) -> Self {
        Self::new(HashingService::new(config.hashing.clone()), store)
    }

    pub fn with_key_ring(mut self, key_ring: Arc<dyn KeyRing>) -> Self {
        self.key_ring = key_ring;
        self
    }

    pub fn hashing(&self) -> &HashingService {
        &self.hashing
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    fn load(&self, username: &str) -> Result<Option<Did>> {
        let record = self.store.load(DID_ENTITY_KIND, username)?;
        Ok(record.map(from_record).transpose()?)
    }

    fn bind_keys(&self, did: &mut Did) {
        let Some(username) = did.username.clone() else {
            return;
        };
        for key in self.key_ring.public_keys(&username) {
            if did.add_public_key(key) {
                debug!(username = %username, "bound key ring public key");
            }
        }
    }

    /// Checks that a stored record exists under the DID's exact username.
    ///
    /// Returns the loaded record with `verified` set, or the input with
    /// `verified` cleared. Store failures count as "not found".
    pub fn verify(&self, did: Did) -> Did {
        match self.try_verify(did.clone()) {
            Ok(did) => did,
            Err(err) => {
                warn!(error = %err, "DID verification failed to load record");
                Did {
                    verified: false,
                    ..did
                }
            }
        }
    }

    fn try_verify(&self, mut did: Did) -> Result<Did> {
        let Some(username) = did.username.clone() else {
            did.verified = false;
            return Ok(did);
        };

        match self.load(&username)? {
            Some(mut loaded) if loaded.username.as_deref() == Some(username.as_str()) => {
                loaded.verified = true;
                info!(username = %username, "DID verification successful");
                Ok(loaded)
            }
            _ => {
                did.verified = false;
                info!(username = %username, "DID verification unsuccessful");
                Ok(did)
            }
        }
    }

    /// Saves a record, hashing its passphrase first if no hash is present.
    ///
    /// The passphrase is cleared once hashed. `auto_create` selects
    /// create-if-absent over must-exist semantics in the store. The record
    /// is returned even when the save fails, with the failure alongside.
    pub fn save(&self, did: Did, auto_create: bool) -> Outcome {
        let mode = if auto_create { Write::Upsert } else { Write::Update };
        self.persist(did, mode)
    }

    fn persist(&self, mut did: Did, mode: Write) -> Outcome {
        let Some(username) = did.username.clone().filter(|u| !u.is_empty()) else {
            return Outcome::failed(did, DidError::FieldRequired(Field::Username));
        };
        info!(username = %username, ?mode, "saving DID");

        let exists = match self.load(&username) {
            Ok(stored) if Did::lifecycle_state(stored.as_ref()) == LifecycleState::Revoked => {
                warn!(username = %username, "refusing to save over revoked DID");
                return Outcome::failed(scrubbed(did), DidError::Revoked);
            }
            Ok(stored) => stored.is_some(),
            Err(err) => {
                warn!(username = %username, error = %err, "loading DID before save failed");
                return Outcome::failed(scrubbed(did), err);
            }
        };
        if did.status == DidStatus::Revoked {
            // revocation only happens through revoke
            return Outcome::failed(scrubbed(did), DidError::Revoked);
        }

        if did.passphrase_hash.is_none() {
            if did.passphrase.as_deref().map_or(true, str::is_empty) {
                return Outcome::failed(did, DidError::FieldRequired(Field::Passphrase));
            }
            let passphrase = did.passphrase.as_deref().unwrap_or_default();
            let algorithm = did
                .passphrase_hash_algorithm
                .unwrap_or(self.hashing.config().passphrase_algorithm);

            debug!(username = %username, %algorithm, "hashing passphrase");
            match self.hashing.generate_passphrase_hash_with(algorithm, passphrase) {
                Ok(hash) => {
                    did.passphrase_hash = Some(hash);
                    did.passphrase_hash_algorithm = Some(algorithm);
                }
                Err(err) => {
                    warn!(username = %username, error = %err, "passphrase hashing failed, DID not saved");
                    return Outcome::failed(did, err);
                }
            }
        } else if did.passphrase_hash_algorithm.is_none() {
            did.passphrase_hash_algorithm = did
                .passphrase_hash
                .as_deref()
                .and_then(|hash| HashingService::passphrase_hash_algorithm_of(hash).ok());
        }
        did.clear_passphrase();

        if did.status == DidStatus::Uninitialized {
            did.status = DidStatus::Active;
        }
        if did.created.is_none() {
            did.created = Some(Utc::now());
        }

        let saved = to_record(&did).and_then(|record| match mode {
            Write::Upsert => self.store.save(DID_ENTITY_KIND, &username, record, true),
            Write::Update => self.store.save(DID_ENTITY_KIND, &username, record, false),
            // a stored record without a passphrase hash is completed in place
            Write::Create if exists => self.store.save(DID_ENTITY_KIND, &username, record, false),
            Write::Create => self.store.create(DID_ENTITY_KIND, &username, record),
        });
        match saved {
            Ok(()) => {
                info!(username = %username, "DID saved");
                Outcome::ok(did)
            }
            Err(err) => {
                warn!(username = %username, error = %err, "saving DID failed");
                Outcome::failed(did, err.into())
            }
        }
    }

    /// Creates a new identity: verified, key ring keys bound, saved with
    /// create semantics, and cached once its passphrase hash exists.
    fn create(&self, mut did: Did) -> Outcome {
        did.verified = true;
        did.authenticated = false;
        self.bind_keys(&mut did);

        // the store arbitrates concurrent creations of the same username
        let mut outcome = self.persist(did, Write::Create);
        let lost_race = matches!(
            outcome.failure,
            Some(DidError::Persistence(StoreError::AlreadyExists))
        );
        if outcome.did.passphrase_hash.is_none() || lost_race {
            outcome.did.verified = false;
            outcome.did.clear_passphrase();
            return outcome;
        }

        // a store failure still leaves the identity authenticated for this session
        outcome.did.authenticated = true;
        let slot = self.cache.cache_authenticated(outcome.did.clone());
        debug!(username = ?outcome.did.username, ?slot, "created DID cached");
        outcome
    }

    /// Authenticates the DID carried by the request.
    ///
    /// On success the request's DID is replaced by the stored record with
    /// `authenticated` and `verified` set. A wrong passphrase leaves the
    /// input record unauthenticated without an error code. The passphrase is
    /// cleared from the request in every case.
    pub fn authenticate(&self, request: &mut AuthenticateRequest) {
        let Some(did) = request.did.take() else {
            request.fail(&DidError::FieldRequired(Field::Did));
            return;
        };
        if let Err(err) = check_required(Some(&did), &[Field::Username, Field::Passphrase]) {
            request.fail(&err);
            request.did = Some(scrubbed(did));
            return;
        }

        let autogenerate = request.autogenerate;
        let outcome = self.authenticate_did(did, autogenerate);
        settle!(request, outcome);
    }

    fn authenticate_did(&self, mut did: Did, autogenerate: bool) -> Outcome {
        did.authenticated = false;
        let username = did.username.clone().unwrap_or_default();

        let loaded = match self.load(&username) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(username = %username, error = %err, "loading DID for authentication failed");
                return Outcome::failed(scrubbed(did), err);
            }
        };

        let stored = match Did::lifecycle_state(loaded.as_ref()) {
            LifecycleState::New if autogenerate => {
                info!(username = %username, "username unknown and autogenerate set, creating DID");
                return self.create(did);
            }
            LifecycleState::New => {
                warn!(username = %username, "username unknown and autogenerate not set, authentication failed");
                return Outcome::failed(scrubbed(did), DidError::UsernameUnknown);
            }
            LifecycleState::Revoked => {
                warn!(username = %username, "authentication attempted on revoked DID");
                return Outcome::failed(scrubbed(did), DidError::Revoked);
            }
            LifecycleState::Active => match loaded {
                Some(stored) => stored,
                None => return Outcome::failed(scrubbed(did), DidError::UsernameUnknown),
            },
        };

        let stored_hash = stored.passphrase_hash.clone().unwrap_or_default();
        if let Some(declared) = did.passphrase_hash_algorithm {
            let stored_algorithm = stored
                .passphrase_hash_algorithm
                .or_else(|| HashingService::passphrase_hash_algorithm_of(&stored_hash).ok());
            if stored_algorithm.map_or(false, |algorithm| algorithm != declared) {
                warn!(username = %username, %declared, "passphrase hash algorithm mismatch");
                return Outcome::failed(scrubbed(did), DidError::PassphraseHashAlgorithmMismatch);
            }
        }

        let passphrase = Zeroizing::new(did.passphrase.take().unwrap_or_default());
        debug!(username = %username, "verifying passphrase hash");
        match self.hashing.verify_passphrase_hash(&passphrase, &stored_hash) {
            Ok(true) => {
                let mut authenticated = stored;
                authenticated.verified = true;
                authenticated.authenticated = true;
                self.bind_keys(&mut authenticated);
                let slot = self.cache.cache_authenticated(authenticated.clone());
                info!(username = %username, ?slot, "DID authenticated");
                Outcome::ok(authenticated)
            }
            Ok(false) => {
                info!(username = %username, "passphrase did not match");
                Outcome::ok(did)
            }
            Err(err) => {
                warn!(username = %username, error = %err, "passphrase verification failed");
                Outcome::failed(did, err)
            }
        }
    }

    /// Verifies the DID, then authenticates it if a record exists or
    /// creates it (and treats it as authenticated) if none does.
    pub fn authenticate_or_create(&self, request: &mut AuthenticateRequest) {
        let Some(did) = request.did.take() else {
            request.fail(&DidError::FieldRequired(Field::Did));
            return;
        };
        if let Err(err) = check_required(Some(&did), &[Field::Username]) {
            request.fail(&err);
            request.did = Some(scrubbed(did));
            return;
        }

        let verified = match self.try_verify(did.clone()) {
            Ok(verified) => verified.verified,
            Err(err) => {
                request.fail(&err);
                request.did = Some(scrubbed(did));
                return;
            }
        };

        if let Err(err) = check_required(Some(&did), &[Field::Passphrase]) {
            request.fail(&err);
            request.did = Some(scrubbed(did));
            return;
        }

        let outcome = if verified {
            self.authenticate_did(did, request.autogenerate)
        } else {
            info!(username = ?did.username, "DID not found, creating");
            self.create(did)
        };
        settle!(request, outcome);
    }

    /// Returns the cached identity for the requested username, establishing
    /// it from the supplied passphrase when nothing is cached.
    ///
    /// The node identity answers for its own username; other local users
    /// answer from the per-username cache. On a cache miss an existing stored
    /// record is authenticated against, and a missing one is created.
    pub fn get_local_did(&self, request: &mut GetLocalDidRequest) {
        let Some(did) = request.did.take() else {
            request.fail(&DidError::FieldRequired(Field::Did));
            return;
        };
        if let Err(err) = check_required(Some(&did), &[Field::Username]) {
            request.fail(&err);
            request.did = Some(did);
            return;
        }
        let username = did.username.clone().unwrap_or_default();

        if let Some(cached) = self.cache.lookup(&username) {
            if cached.status == DidStatus::Revoked {
                warn!(username = %username, "cached local DID is revoked");
                request.fail(&DidError::Revoked);
            } else {
                debug!(username = %username, "local DID served from cache");
            }
            request.did = Some(cached);
            return;
        }

        if let Err(err) = check_required(
            Some(&did),
            &[Field::Passphrase, Field::PassphraseHashAlgorithm],
        ) {
            request.fail(&err);
            request.did = Some(scrubbed(did));
            return;
        }

        let outcome = match self.load(&username) {
            Err(err) => Outcome::failed(scrubbed(did), err),
            Ok(loaded) => match Did::lifecycle_state(loaded.as_ref()) {
                LifecycleState::New => self.create(did),
                _ => self.authenticate_did(did, false),
            },
        };
        settle!(request, outcome);
    }

    /// Revokes an identity after checking the owner's passphrase.
    ///
    /// The stored record is updated in place (must-exist save) and any cached
    /// copy is replaced by the revoked record.
    pub fn revoke(&self, request: &mut RevokeRequest) {
        let Some(mut did) = request.did.take() else {
            request.fail(&DidError::FieldRequired(Field::Did));
            return;
        };
        if let Err(err) = check_required(Some(&did), &[Field::Username, Field::Passphrase]) {
            request.fail(&err);
            request.did = Some(scrubbed(did));
            return;
        }

        let username = did.username.clone().unwrap_or_default();
        let passphrase = Zeroizing::new(did.passphrase.take().unwrap_or_default());
        match self.revoke_did(&username, &passphrase) {
            Ok(revoked) => {
                info!(username = %username, "DID revoked");
                request.did = Some(revoked);
            }
            Err(err) => {
                warn!(username = %username, error = %err, "DID revocation failed");
                request.fail(&err);
                request.did = Some(did);
            }
        }
    }

    fn revoke_did(&self, username: &str, passphrase: &str) -> Result<Did> {
        let loaded = self.load(username)?;
        let mut stored = match Did::lifecycle_state(loaded.as_ref()) {
            LifecycleState::New => return Err(DidError::UsernameUnknown),
            LifecycleState::Revoked => return Err(DidError::Revoked),
            LifecycleState::Active => loaded.ok_or(DidError::UsernameUnknown)?,
        };

        let stored_hash = stored.passphrase_hash.clone().unwrap_or_default();
        if !self.hashing.verify_passphrase_hash(passphrase, &stored_hash)? {
            return Err(DidError::PassphraseMismatch);
        }

        stored.status = DidStatus::Revoked;
        let record = to_record(&stored)?;
        self.store.save(DID_ENTITY_KIND, username, record, false)?;

        stored.verified = true;
        stored.authenticated = false;
        self.cache.refresh(&stored);
        Ok(stored)
    }
}

/// Drops the passphrase and the authenticated flag from a record that is
/// being handed back after a failure
fn scrubbed(mut did: Did) -> Did {
    did.clear_passphrase();
    did.authenticated = false;
    did
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashingConfig;
    use crate::error::StoreError;
    use crate::keyring::StaticKeyRing;
    use crate::requests::{AuthenticateErrorCode, GetLocalDidErrorCode, RevokeErrorCode};
    use crate::store::{MemoryRecordStore, Record};
    use crate::types::{PassphraseHashAlgorithm, PublicKey};

    fn hashing() -> HashingService {
        HashingService::new(HashingConfig::default().with_passphrase_cost(4))
    }

    fn engine() -> (DidLifecycleEngine, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = DidLifecycleEngine::new(hashing(), store.clone());
        (engine, store)
    }

    fn register(engine: &DidLifecycleEngine, username: &str, passphrase: &str) -> Did {
        let outcome = engine.save(Did::with_passphrase(username, passphrase), true);
        assert!(outcome.is_ok());
        outcome.did
    }

    fn authenticate(engine: &DidLifecycleEngine, username: &str, passphrase: &str) -> AuthenticateRequest {
        let mut request = AuthenticateRequest::new(Did::with_passphrase(username, passphrase));
        engine.authenticate(&mut request);
        request
    }

    /// Store whose saves always fail
    struct ReadOnlyStore(MemoryRecordStore);

    impl RecordStore for ReadOnlyStore {
        fn load(&self, kind: &str, key: &str) -> std::result::Result<Option<Record>, StoreError> {
            self.0.load(kind, key)
        }

        fn save(&self, _: &str, _: &str, _: Record, _: bool) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        fn create(&self, _: &str, _: &str, _: Record) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
    }

    /// Store whose loads always fail
    struct UnreachableStore;

    impl RecordStore for UnreachableStore {
        fn load(&self, _: &str, _: &str) -> std::result::Result<Option<Record>, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        fn save(&self, _: &str, _: &str, _: Record, _: bool) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }

        fn create(&self, _: &str, _: &str, _: Record) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    /// Store whose loads never see a record, as when another creator wrote
    /// it after this engine looked
    struct StaleReadStore(Arc<MemoryRecordStore>);

    impl RecordStore for StaleReadStore {
        fn load(&self, _: &str, _: &str) -> std::result::Result<Option<Record>, StoreError> {
            Ok(None)
        }

        fn save(&self, kind: &str, key: &str, record: Record, auto_create: bool) -> std::result::Result<(), StoreError> {
            self.0.save(kind, key, record, auto_create)
        }

        fn create(&self, kind: &str, key: &str, record: Record) -> std::result::Result<(), StoreError> {
            self.0.create(kind, key, record)
        }
    }

    #[test]
    fn test_concurrent_creation_does_not_overwrite() {
        let (first, inner) = engine();
        register(&first, "alice", "s3cret");
        let original = inner.raw(DID_ENTITY_KIND, "alice");

        let second = DidLifecycleEngine::new(hashing(), Arc::new(StaleReadStore(inner.clone())));
        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "other")).autogenerate(true);
        second.authenticate(&mut request);

        assert_eq!(request.error_code, Some(AuthenticateErrorCode::PersistenceFailure));
        assert!(!request.authenticated());
        assert!(request.did.unwrap().passphrase.is_none());
        assert!(second.cache().node().is_none());
        assert_eq!(inner.raw(DID_ENTITY_KIND, "alice"), original);

        let mut local = GetLocalDidRequest::new(
            Did::with_passphrase("alice", "other").using(PassphraseHashAlgorithm::Argon2id),
        );
        second.get_local_did(&mut local);
        assert_eq!(local.error_code, Some(GetLocalDidErrorCode::PersistenceFailure));
        assert!(!local.did.unwrap().authenticated);
        assert_eq!(inner.raw(DID_ENTITY_KIND, "alice"), original);
    }

    #[test]
    fn test_create_completes_record_without_hash() {
        let (engine, store) = engine();
        store
            .save(DID_ENTITY_KIND, "alice", to_record(&Did::new("alice")).unwrap(), true)
            .unwrap();

        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret")).autogenerate(true);
        engine.authenticate(&mut request);
        assert!(request.succeeded());
        assert!(request.authenticated());

        let stored = from_record(store.load(DID_ENTITY_KIND, "alice").unwrap().unwrap()).unwrap();
        assert!(stored.passphrase_hash.is_some());
        assert_eq!(stored.status, DidStatus::Active);
    }

    #[test]
    fn test_save_hashes_and_clears_passphrase() {
        let (engine, store) = engine();
        let saved = register(&engine, "alice", "s3cret");

        assert!(saved.passphrase.is_none());
        assert!(saved.passphrase_hash.as_deref().unwrap().starts_with("$argon2id$4$"));
        assert_eq!(saved.passphrase_hash_algorithm, Some(PassphraseHashAlgorithm::Argon2id));
        assert_eq!(saved.status, DidStatus::Active);
        assert!(saved.created.is_some());

        let raw = String::from_utf8(store.raw(DID_ENTITY_KIND, "alice").unwrap()).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(!raw.contains("\"passphrase\""));
        assert!(raw.contains("passphraseHash"));
    }

    #[test]
    fn test_save_uses_declared_algorithm() {
        let (engine, _) = engine();
        let outcome = engine.save(
            Did::with_passphrase("alice", "s3cret").using(PassphraseHashAlgorithm::Argon2i),
            true,
        );
        assert!(outcome.did.passphrase_hash.unwrap().starts_with("$argon2i$"));
    }

    #[test]
    fn test_save_keeps_existing_hash() {
        let (engine, _) = engine();
        let saved = register(&engine, "alice", "s3cret");
        let hash = saved.passphrase_hash.clone();

        let mut update = saved.clone();
        update.passphrase_hash_algorithm = None;
        update.add_public_key(PublicKey::new("new-key"));
        let outcome = engine.save(update, false);
        assert!(outcome.is_ok());
        assert_eq!(outcome.did.passphrase_hash, hash);
        assert_eq!(outcome.did.passphrase_hash_algorithm, Some(PassphraseHashAlgorithm::Argon2id));
        assert_eq!(outcome.did.created, saved.created);
    }

    #[test]
    fn test_save_without_passphrase_or_hash() {
        let (engine, store) = engine();
        let outcome = engine.save(Did::new("alice"), true);
        assert!(matches!(outcome.failure, Some(DidError::FieldRequired(Field::Passphrase))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_must_exist_without_auto_create() {
        let (engine, _) = engine();
        let outcome = engine.save(Did::with_passphrase("alice", "s3cret"), false);
        assert!(matches!(
            outcome.failure,
            Some(DidError::Persistence(StoreError::NotFound))
        ));
        // the record comes back hashed even though it was not stored
        assert!(outcome.did.passphrase_hash.is_some());
        assert!(outcome.did.passphrase.is_none());
    }

    #[test]
    fn test_save_with_unsupported_cost_is_not_persisted() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = DidLifecycleEngine::new(
            HashingService::new(HashingConfig::default().with_passphrase_cost(40)),
            store.clone(),
        );
        let outcome = engine.save(Did::with_passphrase("alice", "s3cret"), true);
        assert!(outcome.failure.is_some());
        assert!(outcome.did.passphrase_hash.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_verify_exact_username() {
        let (engine, _) = engine();
        register(&engine, "alice", "s3cret");

        let verified = engine.verify(Did::new("alice"));
        assert!(verified.verified);
        assert_eq!(verified.username(), Some("alice"));
        assert!(verified.passphrase_hash.is_some());

        let bob = engine.verify(Did::new("bob"));
        assert!(!bob.verified);
        assert_eq!(bob.username(), Some("bob"));

        let upper = engine.verify(Did::new("Alice"));
        assert!(!upper.verified);

        assert!(!engine.verify(Did::default()).verified);
    }

    #[test]
    fn test_verify_survives_store_failure() {
        let engine = DidLifecycleEngine::new(hashing(), Arc::new(UnreachableStore));
        let did = engine.verify(Did::new("alice"));
        assert!(!did.verified);
        assert_eq!(did.username(), Some("alice"));
    }

    #[test]
    fn test_authenticate_unknown_username() {
        let (engine, store) = engine();
        let request = authenticate(&engine, "alice", "s3cret");

        assert_eq!(request.error_code, Some(AuthenticateErrorCode::UsernameUnknown));
        assert!(!request.authenticated());
        assert!(request.did.as_ref().unwrap().passphrase.is_none());
        assert!(store.is_empty());
        assert!(engine.cache().node().is_none());
    }

    #[test]
    fn test_authenticate_autogenerate_creates() {
        let (engine, store) = engine();
        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret")).autogenerate(true);
        engine.authenticate(&mut request);

        assert!(request.succeeded());
        let did = request.did.as_ref().unwrap();
        assert!(did.authenticated);
        assert!(did.verified);
        assert!(did.passphrase.is_none());
        assert!(store.raw(DID_ENTITY_KIND, "alice").is_some());
        assert_eq!(engine.cache().node().unwrap().username(), Some("alice"));

        // the created identity authenticates normally afterwards
        let again = authenticate(&engine, "alice", "s3cret");
        assert!(again.authenticated());
    }

    #[test]
    fn test_authenticate_correct_passphrase() {
        let (engine, store) = engine();
        let stored = register(&engine, "alice", "s3cret");
        let request = authenticate(&engine, "alice", "s3cret");

        assert!(request.succeeded());
        let did = request.did.unwrap();
        assert!(did.authenticated);
        assert!(did.verified);
        assert!(did.passphrase.is_none());
        assert_eq!(did.passphrase_hash, stored.passphrase_hash);
        assert_eq!(did.created, stored.created);
        assert_eq!(
            Did {
                verified: false,
                authenticated: false,
                ..did
            },
            from_record(store.load(DID_ENTITY_KIND, "alice").unwrap().unwrap()).unwrap()
        );
    }

    #[test]
    fn test_authenticate_wrong_passphrase() {
        let (engine, _) = engine();
        register(&engine, "alice", "s3cret");
        let request = authenticate(&engine, "alice", "guess");

        assert!(request.succeeded());
        let did = request.did.unwrap();
        assert!(!did.authenticated);
        assert_eq!(did.username(), Some("alice"));
        assert!(did.passphrase.is_none());
        assert!(did.passphrase_hash.is_none());
        assert!(engine.cache().lookup("alice").is_none());
    }

    #[test]
    fn test_authenticate_algorithm_mismatch() {
        let (engine, _) = engine();
        register(&engine, "alice", "s3cret");

        let mut request = AuthenticateRequest::new(
            Did::with_passphrase("alice", "s3cret").using(PassphraseHashAlgorithm::Argon2d),
        );
        engine.authenticate(&mut request);
        assert_eq!(
            request.error_code,
            Some(AuthenticateErrorCode::PassphraseHashAlgorithmMismatch)
        );
        assert!(!request.authenticated());

        let mut matching = AuthenticateRequest::new(
            Did::with_passphrase("alice", "s3cret").using(PassphraseHashAlgorithm::Argon2id),
        );
        engine.authenticate(&mut matching);
        assert!(matching.authenticated());
    }

    #[test]
    fn test_authenticate_missing_fields() {
        let (engine, _) = engine();

        let mut no_did = AuthenticateRequest::default();
        engine.authenticate(&mut no_did);
        assert_eq!(no_did.error_code, Some(AuthenticateErrorCode::DidRequired));

        let mut no_passphrase = AuthenticateRequest::new(Did::new("alice"));
        engine.authenticate(&mut no_passphrase);
        assert_eq!(no_passphrase.error_code, Some(AuthenticateErrorCode::PassphraseRequired));
    }

    #[test]
    fn test_authenticate_store_failure() {
        let engine = DidLifecycleEngine::new(hashing(), Arc::new(UnreachableStore));
        let request = authenticate(&engine, "alice", "s3cret");
        assert_eq!(request.error_code, Some(AuthenticateErrorCode::PersistenceFailure));
        assert!(!request.authenticated());
    }

    #[test]
    fn test_autogenerate_with_failing_save_stays_authenticated_for_session() {
        let engine = DidLifecycleEngine::new(
            hashing(),
            Arc::new(ReadOnlyStore(MemoryRecordStore::new())),
        );
        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret")).autogenerate(true);
        engine.authenticate(&mut request);

        assert_eq!(request.error_code, Some(AuthenticateErrorCode::PersistenceFailure));
        assert!(request.authenticated());
        assert!(engine.cache().node().is_some());
    }

    #[test]
    fn test_autogenerate_with_unsupported_hashing_is_not_authenticated() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = DidLifecycleEngine::new(
            HashingService::new(HashingConfig::default().with_passphrase_cost(40)),
            store.clone(),
        );
        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret")).autogenerate(true);
        engine.authenticate(&mut request);

        assert_eq!(request.error_code, Some(AuthenticateErrorCode::UnsupportedAlgorithm));
        assert!(!request.authenticated());
        assert!(request.did.unwrap().passphrase.is_none());
        assert!(engine.cache().node().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_first_authentication_is_node_identity() {
        let (engine, _) = engine();
        register(&engine, "alice", "a-pass");
        register(&engine, "bob", "b-pass");

        assert!(authenticate(&engine, "alice", "a-pass").authenticated());
        assert!(authenticate(&engine, "bob", "b-pass").authenticated());

        assert_eq!(engine.cache().node().unwrap().username(), Some("alice"));
        assert_eq!(engine.cache().local_user("bob").unwrap().username(), Some("bob"));

        let mut get_alice = GetLocalDidRequest::new(Did::new("alice"));
        engine.get_local_did(&mut get_alice);
        assert_eq!(get_alice.did.unwrap().username(), Some("alice"));

        let mut get_bob = GetLocalDidRequest::new(Did::new("bob"));
        engine.get_local_did(&mut get_bob);
        assert!(get_bob.succeeded());
        assert_eq!(get_bob.did.unwrap().username(), Some("bob"));
    }

    #[test]
    fn test_key_ring_keys_are_bound() {
        let store = Arc::new(MemoryRecordStore::new());
        let ring = StaticKeyRing::new().with_key("alice", PublicKey::new("alice-identity-key"));
        let engine = DidLifecycleEngine::new(hashing(), store.clone()).with_key_ring(Arc::new(ring));

        let mut request =
            AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret")).autogenerate(true);
        engine.authenticate(&mut request);
        let created = request.did.unwrap();
        assert_eq!(created.public_keys, vec![PublicKey::new("alice-identity-key")]);

        // binding again on authenticate does not duplicate the key
        let again = authenticate(&engine, "alice", "s3cret");
        assert_eq!(again.did.unwrap().public_keys.len(), 1);
        assert_eq!(engine.cache().node().unwrap().public_keys.len(), 1);
    }

    #[test]
    fn test_authenticate_or_create() {
        let (engine, store) = engine();

        let mut create = AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret"));
        engine.authenticate_or_create(&mut create);
        assert!(create.succeeded());
        assert!(create.authenticated());
        assert!(store.raw(DID_ENTITY_KIND, "alice").is_some());

        let mut login = AuthenticateRequest::new(Did::with_passphrase("alice", "s3cret"));
        engine.authenticate_or_create(&mut login);
        assert!(login.authenticated());

        let mut wrong = AuthenticateRequest::new(Did::with_passphrase("alice", "nope"));
        engine.authenticate_or_create(&mut wrong);
        assert!(wrong.succeeded());
        assert!(!wrong.authenticated());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_authenticate_or_create_requires_passphrase() {
        let (engine, store) = engine();
        let mut request = AuthenticateRequest::new(Did::new("alice"));
        engine.authenticate_or_create(&mut request);
        assert_eq!(request.error_code, Some(AuthenticateErrorCode::PassphraseRequired));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_local_did_from_cache_does_not_touch_store() {
        let (engine, store) = engine();
        register(&engine, "alice", "s3cret");
        assert!(authenticate(&engine, "alice", "s3cret").authenticated());

        let loads = store.load_count();
        let saves = store.save_count();

        // no passphrase: a cache miss would fail with PassphraseRequired
        let mut request = GetLocalDidRequest::new(Did::new("alice"));
        engine.get_local_did(&mut request);
        assert!(request.succeeded());
        assert!(request.did.unwrap().authenticated);
        assert_eq!(store.load_count(), loads);
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn test_get_local_did_requires_passphrase_then_algorithm() {
        let (engine, _) = engine();

        let mut no_passphrase = GetLocalDidRequest::new(Did::new("alice"));
        engine.get_local_did(&mut no_passphrase);
        assert_eq!(no_passphrase.error_code, Some(GetLocalDidErrorCode::PassphraseRequired));

        let mut no_algorithm = GetLocalDidRequest::new(Did::with_passphrase("alice", "s3cret"));
        engine.get_local_did(&mut no_algorithm);
        assert_eq!(
            no_algorithm.error_code,
            Some(GetLocalDidErrorCode::PassphraseHashAlgorithmUnknown)
        );
        assert!(no_algorithm.did.unwrap().passphrase.is_none());
    }

    #[test]
    fn test_get_local_did_creates_and_caches() {
        let (engine, store) = engine();
        let mut request = GetLocalDidRequest::new(
            Did::with_passphrase("alice", "s3cret").using(PassphraseHashAlgorithm::Argon2id),
        );
        engine.get_local_did(&mut request);

        assert!(request.succeeded());
        let did = request.did.unwrap();
        assert!(did.authenticated);
        assert!(did.passphrase.is_none());
        assert!(store.raw(DID_ENTITY_KIND, "alice").is_some());
        assert_eq!(engine.cache().node().unwrap().username(), Some("alice"));
    }

    #[test]
    fn test_get_local_did_does_not_overwrite_stored_identity() {
        let (engine, _) = engine();
        let stored = register(&engine, "alice", "s3cret");

        let mut wrong = GetLocalDidRequest::new(
            Did::with_passphrase("alice", "other").using(PassphraseHashAlgorithm::Argon2id),
        );
        engine.get_local_did(&mut wrong);
        assert!(!wrong.did.unwrap().authenticated);
        assert!(engine.cache().lookup("alice").is_none());

        let mut right = GetLocalDidRequest::new(
            Did::with_passphrase("alice", "s3cret").using(PassphraseHashAlgorithm::Argon2id),
        );
        engine.get_local_did(&mut right);
        let did = right.did.unwrap();
        assert!(did.authenticated);
        assert_eq!(did.passphrase_hash, stored.passphrase_hash);
    }

    #[test]
    fn test_revoke() {
        let (engine, store) = engine();
        register(&engine, "alice", "s3cret");
        assert!(authenticate(&engine, "alice", "s3cret").authenticated());

        let mut wrong = RevokeRequest::new(Did::with_passphrase("alice", "nope"));
        engine.revoke(&mut wrong);
        assert_eq!(wrong.error_code, Some(RevokeErrorCode::PassphraseMismatch));

        let mut request = RevokeRequest::new(Did::with_passphrase("alice", "s3cret"));
        engine.revoke(&mut request);
        assert!(request.succeeded());
        assert_eq!(request.did.unwrap().status, DidStatus::Revoked);

        let stored = from_record(store.load(DID_ENTITY_KIND, "alice").unwrap().unwrap()).unwrap();
        assert_eq!(stored.status, DidStatus::Revoked);
        assert_eq!(engine.cache().node().unwrap().status, DidStatus::Revoked);

        let login = authenticate(&engine, "alice", "s3cret");
        assert_eq!(login.error_code, Some(AuthenticateErrorCode::Revoked));
        assert!(!login.authenticated());

        let mut twice = RevokeRequest::new(Did::with_passphrase("alice", "s3cret"));
        engine.revoke(&mut twice);
        assert_eq!(twice.error_code, Some(RevokeErrorCode::AlreadyRevoked));
    }

    #[test]
    fn test_revoke_unknown_username() {
        let (engine, _) = engine();
        let mut request = RevokeRequest::new(Did::with_passphrase("ghost", "boo"));
        engine.revoke(&mut request);
        assert_eq!(request.error_code, Some(RevokeErrorCode::UsernameUnknown));
    }

    fn revoke(engine: &DidLifecycleEngine, username: &str, passphrase: &str) {
        let mut request = RevokeRequest::new(Did::with_passphrase(username, passphrase));
        engine.revoke(&mut request);
        assert!(request.succeeded());
    }

    #[test]
    fn test_save_cannot_replace_revoked_identity() {
        let (engine, store) = engine();
        register(&engine, "alice", "s3cret");
        revoke(&engine, "alice", "s3cret");
        let revoked_bytes = store.raw(DID_ENTITY_KIND, "alice");

        let outcome = engine.save(Did::with_passphrase("alice", "attacker"), true);
        assert!(matches!(outcome.failure, Some(DidError::Revoked)));
        assert!(outcome.did.passphrase.is_none());
        assert_eq!(store.raw(DID_ENTITY_KIND, "alice"), revoked_bytes);

        let login = authenticate(&engine, "alice", "attacker");
        assert_eq!(login.error_code, Some(AuthenticateErrorCode::Revoked));
        assert!(!login.authenticated());

        let mut autogenerate =
            AuthenticateRequest::new(Did::with_passphrase("alice", "attacker")).autogenerate(true);
        engine.authenticate(&mut autogenerate);
        assert_eq!(autogenerate.error_code, Some(AuthenticateErrorCode::Revoked));
    }

    #[test]
    fn test_save_update_cannot_reactivate_or_set_revoked() {
        let (engine, store) = engine();
        let saved = register(&engine, "alice", "s3cret");
        revoke(&engine, "alice", "s3cret");

        // an update carrying the old active record is refused
        let outcome = engine.save(saved, false);
        assert!(matches!(outcome.failure, Some(DidError::Revoked)));
        let stored = from_record(store.load(DID_ENTITY_KIND, "alice").unwrap().unwrap()).unwrap();
        assert_eq!(stored.status, DidStatus::Revoked);

        // revocation is not reachable through save
        let mut bob = Did::with_passphrase("bob", "b-pass");
        bob.status = DidStatus::Revoked;
        assert!(matches!(engine.save(bob, true).failure, Some(DidError::Revoked)));
        assert!(store.raw(DID_ENTITY_KIND, "bob").is_none());
    }

    #[test]
    fn test_get_local_did_reports_revoked_cached_identity() {
        let (engine, store) = engine();
        register(&engine, "alice", "s3cret");
        assert!(authenticate(&engine, "alice", "s3cret").authenticated());
        revoke(&engine, "alice", "s3cret");

        let loads = store.load_count();
        let mut request = GetLocalDidRequest::new(Did::new("alice"));
        engine.get_local_did(&mut request);
        assert_eq!(request.error_code, Some(GetLocalDidErrorCode::Revoked));
        let did = request.did.unwrap();
        assert_eq!(did.status, DidStatus::Revoked);
        assert!(!did.authenticated);
        assert_eq!(store.load_count(), loads);
    }

    #[test]
    fn test_engine_is_shareable_across_threads() {
        let (engine, _) = engine();
        for name in ["u0", "u1", "u2", "u3"] {
            register(&engine, name, "pw");
        }
        let engine = Arc::new(engine);

        std::thread::scope(|scope| {
            for name in ["u0", "u1", "u2", "u3"] {
                let engine = Arc::clone(&engine);
                scope.spawn(move || assert!(authenticate(&engine, name, "pw").authenticated()));
            }
        });

        let node = engine.cache().node().unwrap();
        let node_name = node.username().unwrap();
        for name in ["u0", "u1", "u2", "u3"] {
            let in_users = engine.cache().local_user(name).is_some();
            assert_eq!(in_users, name != node_name);
        }
    }
}
