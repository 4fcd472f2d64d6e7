//! End-user identity provider contract and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{ProfileInput, ProfilePatch, ProviderProfile, normalize_email, validate_email};
use serde_json::{Map, Value, json};

use super::FaultInjector;
use crate::error::ActivityFailure;

const COLLABORATOR: &str = "identity provider";

/// The external directory that owns authentication and personal data.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates an identity. Fails with 409 if the email is taken.
    async fn create(&self, input: &ProfileInput) -> Result<ProviderProfile, ActivityFailure>;

    /// Fetches an identity. Fails with 404 if unknown.
    async fn get(&self, id: &str) -> Result<ProviderProfile, ActivityFailure>;

    /// Applies a partial update and returns the new profile.
    async fn update(&self, id: &str, patch: &ProfilePatch)
    -> Result<ProviderProfile, ActivityFailure>;

    /// Physically deletes an identity.
    async fn delete(&self, id: &str) -> Result<(), ActivityFailure>;

    async fn find_by_email(&self, email: &str) -> Result<Option<ProviderProfile>, ActivityFailure>;
}

/// Operations of [`IdentityProvider`], for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    Create,
    Get,
    Update,
    Delete,
    FindByEmail,
}

fn optional_string(doc: &Map<String, Value>, field: &str) -> Result<Option<String>, ActivityFailure> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ActivityFailure::malformed(
            COLLABORATOR,
            format!("{field} should be a string, got {other}"),
        )),
    }
}

/// Parses a provider user document into a [`ProviderProfile`].
///
/// Expects `user_id`, `email`, `email_verified`, and optionally
/// `given_name`, `family_name`, `phone_number` and a string-valued
/// `user_metadata` object.
pub fn parse_profile(doc: &Value) -> Result<ProviderProfile, ActivityFailure> {
    let map = doc
        .as_object()
        .ok_or_else(|| ActivityFailure::malformed(COLLABORATOR, "user document is not an object"))?;

    let id = map
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityFailure::malformed(COLLABORATOR, "user_id is missing"))?;
    let email = map
        .get("email")
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityFailure::malformed(COLLABORATOR, "email is missing"))?;
    let email_verified = match map.get("email_verified") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(ActivityFailure::malformed(
                COLLABORATOR,
                format!("email_verified should be a boolean, got {other}"),
            ));
        }
    };

    let mut attributes = BTreeMap::new();
    if let Some(metadata) = map.get("user_metadata").filter(|m| !m.is_null()) {
        let metadata = metadata.as_object().ok_or_else(|| {
            ActivityFailure::malformed(COLLABORATOR, "user_metadata is not an object")
        })?;
        for (key, value) in metadata {
            let value = value.as_str().ok_or_else(|| {
                ActivityFailure::malformed(COLLABORATOR, format!("user_metadata.{key} is not a string"))
            })?;
            attributes.insert(key.clone(), value.to_string());
        }
    }

    Ok(ProviderProfile {
        id: id.to_string(),
        email: email.to_string(),
        email_verified,
        first_name: optional_string(map, "given_name")?,
        last_name: optional_string(map, "family_name")?,
        phone: optional_string(map, "phone_number")?,
        attributes,
    })
}

fn document_for(id: &str, input: &ProfileInput) -> Value {
    json!({
        "user_id": id,
        "email": normalize_email(&input.email),
        "email_verified": input.email_verified,
        "given_name": input.first_name,
        "family_name": input.last_name,
        "phone_number": input.phone,
        "user_metadata": input.attributes,
    })
}

fn patch_document(doc: &mut Value, patch: &ProfilePatch) {
    let Some(map) = doc.as_object_mut() else {
        return;
    };
    if let Some(verified) = patch.email_verified {
        map.insert("email_verified".into(), json!(verified));
    }
    if let Some(first) = &patch.first_name {
        map.insert("given_name".into(), json!(first));
    }
    if let Some(last) = &patch.last_name {
        map.insert("family_name".into(), json!(last));
    }
    if let Some(phone) = &patch.phone {
        map.insert("phone_number".into(), json!(phone));
    }
    if let Some(attributes) = &patch.attributes {
        map.insert("user_metadata".into(), json!(attributes));
    }
}

fn unknown_user(id: &str) -> ActivityFailure {
    ActivityFailure::Provider {
        status: 404,
        message: format!("user {id} does not exist"),
        detail: Some(json!({ "user_id": id })),
    }
}

#[derive(Debug, Default)]
struct InMemoryIdentityState {
    documents: HashMap<String, Value>,
    next_id: u32,
    faults: FaultInjector<IdentityOp>,
    lost_create_responses: u32,
}

/// In-memory identity provider for testing.
///
/// Keeps raw user documents and parses them on the way out, like an HTTP
/// adapter would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityProvider {
    state: Arc<RwLock<InMemoryIdentityState>>,
}

impl InMemoryIdentityProvider {
    /// Creates a new, empty identity provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail with `failure`.
    pub fn set_failure(&self, op: IdentityOp, failure: ActivityFailure) {
        self.state.write().unwrap().faults.fail(op, failure);
    }

    /// Makes the next `times` calls to `op` fail with `failure`.
    pub fn set_transient_failure(&self, op: IdentityOp, failure: ActivityFailure, times: u32) {
        self.state
            .write()
            .unwrap()
            .faults
            .fail_times(op, failure, times);
    }

    /// Makes the next `times` creates commit the identity and then fail
    /// with a 503, as if the response was lost in transit.
    pub fn lose_create_responses(&self, times: u32) {
        self.state.write().unwrap().lost_create_responses = times;
    }

    pub fn clear_failure(&self, op: IdentityOp) {
        self.state.write().unwrap().faults.clear(op);
    }

    /// Number of calls made to `op`, failed ones included.
    pub fn calls(&self, op: IdentityOp) -> usize {
        self.state.read().unwrap().faults.calls(op)
    }

    /// Returns the number of identities held.
    pub fn identity_count(&self) -> usize {
        self.state.read().unwrap().documents.len()
    }

    /// Returns true if an identity with this email exists.
    pub fn has_email(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.state
            .read()
            .unwrap()
            .documents
            .values()
            .any(|doc| doc.get("email").and_then(Value::as_str) == Some(email.as_str()))
    }

    /// Stores a raw user document as-is, keyed by its `user_id`.
    pub fn insert_raw(&self, id: &str, document: Value) {
        self.state
            .write()
            .unwrap()
            .documents
            .insert(id.to_string(), document);
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn create(&self, input: &ProfileInput) -> Result<ProviderProfile, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(IdentityOp::Create)?;

        if let Err(e) = validate_email(&input.email) {
            return Err(ActivityFailure::provider(400, e.message()));
        }
        let email = normalize_email(&input.email);
        let taken = state
            .documents
            .values()
            .any(|doc| doc.get("email").and_then(Value::as_str) == Some(email.as_str()));
        if taken {
            return Err(ActivityFailure::Provider {
                status: 409,
                message: "the user already exists".to_string(),
                detail: Some(json!({ "email": email })),
            });
        }

        state.next_id += 1;
        let id = format!("idp|{:06}", state.next_id);
        let doc = document_for(&id, input);
        let profile = parse_profile(&doc)?;
        state.documents.insert(id, doc);
        if state.lost_create_responses > 0 {
            state.lost_create_responses -= 1;
            return Err(ActivityFailure::provider(503, "connection reset before response"));
        }
        Ok(profile)
    }

    async fn get(&self, id: &str) -> Result<ProviderProfile, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(IdentityOp::Get)?;
        let doc = state.documents.get(id).ok_or_else(|| unknown_user(id))?;
        parse_profile(doc)
    }

    async fn update(
        &self,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ProviderProfile, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(IdentityOp::Update)?;
        let doc = state.documents.get_mut(id).ok_or_else(|| unknown_user(id))?;
        patch_document(doc, patch);
        parse_profile(doc)
    }

    async fn delete(&self, id: &str) -> Result<(), ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(IdentityOp::Delete)?;
        state
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| unknown_user(id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<ProviderProfile>, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(IdentityOp::FindByEmail)?;
        let email = normalize_email(email);
        state
            .documents
            .values()
            .find(|doc| doc.get("email").and_then(Value::as_str) == Some(email.as_str()))
            .map(parse_profile)
            .transpose()
    }
}
