//! Operation routing.
//!
//! The dispatcher reads the operation name from an [`Envelope`], checks the
//! payload and its required fields, and hands the typed request to the
//! lifecycle engine or the hashing service. Every outcome is written back
//! into the request as an error code; nothing is raised to the caller.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::DidLifecycleEngine;
use crate::error::{DidError, Field};
use crate::hashing::Hash;
use crate::requests::{
    check_required, AuthenticateRequest, GetLocalDidRequest, HashRequest, RevokeRequest,
    SaveRequest, ServiceRequest, VerifyHashRequest, VerifyRequest,
};

/// Operations understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetLocalDid,
    Verify,
    Authenticate,
    Save,
    AuthenticateOrCreate,
    Revoke,
    Hash,
    VerifyHash,
}

impl Operation {
    /// Wire name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetLocalDid => "GET_LOCAL_DID",
            Operation::Verify => "VERIFY",
            Operation::Authenticate => "AUTHENTICATE",
            Operation::Save => "SAVE",
            Operation::AuthenticateOrCreate => "AUTHENTICATE_CREATE",
            Operation::Revoke => "REVOKE",
            Operation::Hash => "HASH",
            Operation::VerifyHash => "VERIFY_HASH",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET_LOCAL_DID" => Ok(Operation::GetLocalDid),
            "VERIFY" => Ok(Operation::Verify),
            "AUTHENTICATE" => Ok(Operation::Authenticate),
            "SAVE" => Ok(Operation::Save),
            "AUTHENTICATE_CREATE" | "AUTHENTICATE_OR_CREATE" => Ok(Operation::AuthenticateOrCreate),
            "REVOKE" => Ok(Operation::Revoke),
            "HASH" => Ok(Operation::Hash),
            "VERIFY_HASH" => Ok(Operation::VerifyHash),
            _ => Err(DidError::UnknownOperation(s.to_string())),
        }
    }
}

/// Typed request carried by an envelope
#[derive(Debug, Clone)]
pub enum Payload {
    GetLocalDid(GetLocalDidRequest),
    Verify(VerifyRequest),
    /// Used by both `AUTHENTICATE` and `AUTHENTICATE_CREATE`
    Authenticate(AuthenticateRequest),
    Save(SaveRequest),
    Revoke(RevokeRequest),
    Hash(HashRequest),
    VerifyHash(VerifyHashRequest),
}

/// A routed message: operation name plus its request payload
#[derive(Debug, Clone)]
pub struct Envelope {
    pub operation: String,
    pub payload: Option<Payload>,
}

impl Envelope {
    pub fn new(operation: impl Into<String>, payload: Payload) -> Self {
        Self {
            operation: operation.into(),
            payload: Some(payload),
        }
    }

    /// Envelope with no payload attached
    pub fn empty(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            payload: None,
        }
    }
}

/// Where an envelope went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled(Operation),
    /// Unknown operation name; the payload was left untouched
    DeadLetter,
}

/// Requests that can travel inside a [`Payload`]
trait Carried: ServiceRequest + Sized {
    fn wrap(self) -> Payload;

    fn slot(payload: &mut Payload) -> Option<&mut Self>;
}

macro_rules! impl_carried {
    ($request:ty, $variant:ident) => {
        impl Carried for $request {
            fn wrap(self) -> Payload {
                Payload::$variant(self)
            }

            fn slot(payload: &mut Payload) -> Option<&mut Self> {
                match payload {
                    Payload::$variant(request) => Some(request),
                    _ => None,
                }
            }
        }
    };
}

impl_carried!(GetLocalDidRequest, GetLocalDid);
impl_carried!(VerifyRequest, Verify);
impl_carried!(AuthenticateRequest, Authenticate);
impl_carried!(SaveRequest, Save);
impl_carried!(RevokeRequest, Revoke);
impl_carried!(HashRequest, Hash);
impl_carried!(VerifyHashRequest, VerifyHash);

/// Returns the envelope's request of type `R`.
///
/// A missing or differently typed payload is replaced by a fresh request
/// carrying the request-required code, and `None` is returned.
fn request_of<R: Carried>(payload: &mut Option<Payload>) -> Option<&mut R> {
    if payload.as_mut().and_then(R::slot).is_none() {
        warn!("request required");
        *payload = Some(R::required().wrap());
        return None;
    }
    payload.as_mut().and_then(R::slot)
}

/// Routes envelopes to the lifecycle engine and the hashing service
#[derive(Clone)]
pub struct RequestDispatcher {
    engine: Arc<DidLifecycleEngine>,
}

impl RequestDispatcher {
    pub fn new(engine: Arc<DidLifecycleEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DidLifecycleEngine {
        &self.engine
    }

    /// Handles one envelope in place
    pub fn dispatch(&self, envelope: &mut Envelope) -> Routed {
        let operation = match envelope.operation.parse::<Operation>() {
            Ok(operation) => operation,
            Err(err) => {
                warn!(error = %err, "dead-lettering envelope");
                return Routed::DeadLetter;
            }
        };
        info!(%operation, "received request");

        let payload = &mut envelope.payload;
        match operation {
            Operation::GetLocalDid => {
                if let Some(request) = request_of::<GetLocalDidRequest>(payload) {
                    self.get_local_did(request);
                }
            }
            Operation::Verify => {
                if let Some(request) = request_of::<VerifyRequest>(payload) {
                    self.verify(request);
                }
            }
            Operation::Authenticate => {
                if let Some(request) = request_of::<AuthenticateRequest>(payload) {
                    self.authenticate(request);
                }
            }
            Operation::Save => {
                if let Some(request) = request_of::<SaveRequest>(payload) {
                    self.save(request);
                }
            }
            Operation::AuthenticateOrCreate => {
                if let Some(request) = request_of::<AuthenticateRequest>(payload) {
                    self.authenticate_or_create(request);
                }
            }
            Operation::Revoke => {
                if let Some(request) = request_of::<RevokeRequest>(payload) {
                    self.revoke(request);
                }
            }
            Operation::Hash => {
                if let Some(request) = request_of::<HashRequest>(payload) {
                    self.hash(request);
                }
            }
            Operation::VerifyHash => {
                if let Some(request) = request_of::<VerifyHashRequest>(payload) {
                    self.verify_hash(request);
                }
            }
        }
        Routed::Handled(operation)
    }

    fn get_local_did(&self, request: &mut GetLocalDidRequest) {
        if let Err(err) = check_required(request.did.as_ref(), &[Field::Did, Field::Username]) {
            request.fail(&err);
            return;
        }
        self.engine.get_local_did(request);
    }

    fn verify(&self, request: &mut VerifyRequest) {
        if let Some(did) = request.did.take() {
            request.did = Some(self.engine.verify(did));
        }
    }

    fn authenticate(&self, request: &mut AuthenticateRequest) {
        let required = [Field::Did, Field::Username, Field::Passphrase];
        if let Err(err) = check_required(request.did.as_ref(), &required) {
            request.fail(&err);
            if let Some(did) = request.did.as_mut() {
                did.clear_passphrase();
            }
            return;
        }
        self.engine.authenticate(request);
    }

    fn authenticate_or_create(&self, request: &mut AuthenticateRequest) {
        if let Err(err) = check_required(request.did.as_ref(), &[Field::Did, Field::Username]) {
            request.fail(&err);
            if let Some(did) = request.did.as_mut() {
                did.clear_passphrase();
            }
            return;
        }
        self.engine.authenticate_or_create(request);
    }

    fn save(&self, request: &mut SaveRequest) {
        if let Err(err) = check_required(request.did.as_ref(), &[Field::Did, Field::Username]) {
            request.fail(&err);
            return;
        }
        let Some(did) = request.did.take() else {
            return;
        };

        let outcome = self.engine.save(did, request.auto_create);
        if let Some(err) = &outcome.failure {
            request.fail(err);
        }
        request.did = Some(outcome.did);
    }

    fn revoke(&self, request: &mut RevokeRequest) {
        let required = [Field::Did, Field::Username, Field::Passphrase];
        if let Err(err) = check_required(request.did.as_ref(), &required) {
            request.fail(&err);
            if let Some(did) = request.did.as_mut() {
                did.clear_passphrase();
            }
            return;
        }
        self.engine.revoke(request);
    }

    fn hash(&self, request: &mut HashRequest) {
        if !request.generate_full_hash && !request.generate_fingerprint {
            debug!("nothing to hash");
            return;
        }
        let hashing = self.engine.hashing();

        let full = match hashing.generate_content_hash(&request.content_to_hash) {
            Ok(full) => full,
            Err(err) => {
                warn!(error = %err, "content hashing failed");
                request.fail(&err);
                return;
            }
        };
        if request.generate_fingerprint {
            match hashing.generate_fingerprint(&full.digest) {
                Ok(fingerprint) => request.fingerprint = Some(fingerprint),
                Err(err) => {
                    warn!(error = %err, "fingerprint generation failed");
                    request.fail(&err);
                    return;
                }
            }
        }
        if request.generate_full_hash {
            request.hash = Some(full);
        }
    }

    fn verify_hash(&self, request: &mut VerifyHashRequest) {
        request.is_a_match = false;
        let expected = match Hash::decode(&request.hash_to_verify) {
            Ok(expected) => expected,
            Err(err) => {
                warn!(error = %err, "hash to verify could not be decoded");
                request.fail(&err);
                return;
            }
        };

        match self
            .engine
            .hashing()
            .verify_content_hash(&request.content, &expected, request.form)
        {
            Ok(is_a_match) => request.is_a_match = is_a_match,
            Err(err) => request.fail(&err),
        }
    }
}
