//! Property-based tests for hashing and the lifecycle engine.
//!
//! - Content hashes and fingerprints verify their own content and reject any
//!   single-byte mutation
//! - Passphrase hashes verify the original passphrase and nothing else
//! - Passphrase hashes are salted: equal inputs encode differently
//! - Saved identities verify and authenticate under their own username only

use std::sync::Arc;

use proptest::prelude::*;

use crate::config::HashingConfig;
use crate::engine::DidLifecycleEngine;
use crate::hashing::{HashForm, HashingService};
use crate::requests::AuthenticateRequest;
use crate::store::MemoryRecordStore;
use crate::types::Did;

fn service() -> HashingService {
    HashingService::new(HashingConfig::default().with_passphrase_cost(4))
}

// ==================== Content Hash Property Tests ====================

proptest! {
    /// A content hash always verifies against its own content.
    #[test]
    fn content_hash_verifies(content in prop::collection::vec(any::<u8>(), 0..512)) {
        let service = service();
        let hash = service.generate_content_hash(&content).unwrap();
        prop_assert!(service.verify_content_hash(&content, &hash, HashForm::Full).unwrap());
    }

    /// Changing any single byte breaks verification.
    #[test]
    fn mutated_content_fails(
        content in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let service = service();
        let hash = service.generate_content_hash(&content).unwrap();

        let mut mutated = content.clone();
        let i = index.index(mutated.len());
        mutated[i] ^= flip;
        prop_assert!(!service.verify_content_hash(&mutated, &hash, HashForm::Full).unwrap());
    }

    /// Fingerprints verify against the content, not against the full hash.
    #[test]
    fn fingerprint_verifies(
        content in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let service = service();
        let full = service.generate_content_hash(&content).unwrap();
        let fingerprint = service.generate_fingerprint(&full.digest).unwrap();
        prop_assert!(service.verify_content_hash(&content, &fingerprint, HashForm::Fingerprint).unwrap());

        let mut mutated = content.clone();
        let i = index.index(mutated.len());
        mutated[i] = mutated[i].wrapping_add(1);
        prop_assert!(!service.verify_content_hash(&mutated, &fingerprint, HashForm::Fingerprint).unwrap());
    }

    /// The encoded form decodes back to the same hash.
    #[test]
    fn content_hash_text_form_is_stable(content in prop::collection::vec(any::<u8>(), 0..128)) {
        let service = service();
        let hash = service.generate_content_hash(&content).unwrap();
        let encoded = hash.encode().unwrap();
        let decoded = crate::hashing::Hash::decode(&encoded).unwrap();
        prop_assert!(decoded.matches(&hash));
    }
}

// ==================== Passphrase Hash Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// A passphrase hash verifies the passphrase it was made from and rejects
    /// any other.
    #[test]
    fn passphrase_hash_verifies_only_original(
        passphrase in "[ -~]{1,32}",
        other in "[ -~]{1,32}",
    ) {
        prop_assume!(passphrase != other);
        let service = service();
        let encoded = service.generate_passphrase_hash(&passphrase).unwrap();

        prop_assert!(service.verify_passphrase_hash(&passphrase, &encoded).unwrap());
        prop_assert!(!service.verify_passphrase_hash(&other, &encoded).unwrap());
    }

    /// Hashing the same passphrase twice yields distinct encodings that both
    /// verify.
    #[test]
    fn passphrase_hash_is_salted(passphrase in "\\PC{1,24}") {
        let service = service();
        let first = service.generate_passphrase_hash(&passphrase).unwrap();
        let second = service.generate_passphrase_hash(&passphrase).unwrap();

        prop_assert_ne!(&first, &second);
        prop_assert!(service.verify_passphrase_hash(&passphrase, &first).unwrap());
        prop_assert!(service.verify_passphrase_hash(&passphrase, &second).unwrap());
    }

    /// A saved identity verifies under its own username and authenticates
    /// with its own passphrase.
    #[test]
    fn saved_identity_authenticates(
        username in "[a-z][a-z0-9]{0,15}",
        passphrase in "[ -~]{1,24}",
    ) {
        let engine = DidLifecycleEngine::new(service(), Arc::new(MemoryRecordStore::new()));
        let saved = engine.save(Did::with_passphrase(username.clone(), passphrase.clone()), true);
        prop_assert!(saved.is_ok());

        prop_assert!(engine.verify(Did::new(username.clone())).verified);
        let unknown = format!("{}-unknown", username);
        prop_assert!(!engine.verify(Did::new(unknown)).verified);

        let mut request = AuthenticateRequest::new(Did::with_passphrase(username, passphrase));
        engine.authenticate(&mut request);
        prop_assert!(request.authenticated());
        prop_assert!(request.did.unwrap().passphrase.is_none());
    }
}
