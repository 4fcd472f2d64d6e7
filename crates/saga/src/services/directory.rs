//! Organization directory contract and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::{NewOrganization, Organization, OrganizationPatch, PlanType};
use serde_json::{Value, json};

use super::FaultInjector;
use crate::error::ActivityFailure;

const COLLABORATOR: &str = "organization directory";

/// The external service holding organizations and their members.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn create_organization(
        &self,
        input: &NewOrganization,
    ) -> Result<Organization, ActivityFailure>;

    async fn get_organization(&self, id: &str) -> Result<Organization, ActivityFailure>;

    async fn update_organization(
        &self,
        id: &str,
        patch: &OrganizationPatch,
    ) -> Result<Organization, ActivityFailure>;

    async fn delete_organization(&self, id: &str) -> Result<(), ActivityFailure>;

    async fn create_membership(&self, user_id: &str, org_id: &str) -> Result<(), ActivityFailure>;

    async fn check_membership(&self, user_id: &str, org_id: &str) -> Result<bool, ActivityFailure>;
}

/// Operations of [`OrganizationDirectory`], for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryOp {
    CreateOrganization,
    GetOrganization,
    UpdateOrganization,
    DeleteOrganization,
    CreateMembership,
    CheckMembership,
}

/// Parses a directory organization document.
///
/// Shape: `{ "id", "display_name", "metadata": { "plan_type" } }`; a missing
/// plan type means `standard`.
pub fn parse_organization(doc: &Value) -> Result<Organization, ActivityFailure> {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityFailure::malformed(COLLABORATOR, "organization id is missing"))?;
    let name = doc
        .get("display_name")
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityFailure::malformed(COLLABORATOR, "display_name is missing"))?;
    let plan_type = match doc.get("metadata").and_then(|m| m.get("plan_type")) {
        None | Some(Value::Null) => PlanType::default(),
        Some(plan) => serde_json::from_value(plan.clone()).map_err(|e| {
            ActivityFailure::malformed(COLLABORATOR, format!("unknown plan_type {plan}: {e}"))
        })?,
    };

    Ok(Organization {
        id: id.to_string(),
        name: name.to_string(),
        plan_type,
    })
}

fn unknown_organization(id: &str) -> ActivityFailure {
    ActivityFailure::Provider {
        status: 404,
        message: format!("organization {id} does not exist"),
        detail: Some(json!({ "organization_id": id })),
    }
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    organizations: HashMap<String, Value>,
    memberships: HashSet<(String, String)>,
    next_id: u32,
    faults: FaultInjector<DirectoryOp>,
}

/// In-memory organization directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrganizationDirectory {
    state: Arc<RwLock<InMemoryDirectoryState>>,
}

impl InMemoryOrganizationDirectory {
    /// Creates a new, empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `op` fail with `failure`.
    pub fn set_failure(&self, op: DirectoryOp, failure: ActivityFailure) {
        self.state.write().unwrap().faults.fail(op, failure);
    }

    pub fn clear_failure(&self, op: DirectoryOp) {
        self.state.write().unwrap().faults.clear(op);
    }

    pub fn calls(&self, op: DirectoryOp) -> usize {
        self.state.read().unwrap().faults.calls(op)
    }

    /// Returns the number of organizations held.
    pub fn organization_count(&self) -> usize {
        self.state.read().unwrap().organizations.len()
    }

    /// Stores a raw organization document as-is.
    pub fn insert_raw(&self, id: &str, document: Value) {
        self.state
            .write()
            .unwrap()
            .organizations
            .insert(id.to_string(), document);
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryOrganizationDirectory {
    async fn create_organization(
        &self,
        input: &NewOrganization,
    ) -> Result<Organization, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::CreateOrganization)?;

        if input.name.trim().is_empty() {
            return Err(ActivityFailure::provider(400, "display_name must not be empty"));
        }
        state.next_id += 1;
        let id = format!("org_{:06}", state.next_id);
        let doc = json!({
            "id": id,
            "display_name": input.name.trim(),
            "metadata": { "plan_type": input.plan_type },
        });
        let organization = parse_organization(&doc)?;
        state.organizations.insert(id, doc);
        Ok(organization)
    }

    async fn get_organization(&self, id: &str) -> Result<Organization, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::GetOrganization)?;
        let doc = state
            .organizations
            .get(id)
            .ok_or_else(|| unknown_organization(id))?;
        parse_organization(doc)
    }

    async fn update_organization(
        &self,
        id: &str,
        patch: &OrganizationPatch,
    ) -> Result<Organization, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::UpdateOrganization)?;
        let doc = state
            .organizations
            .get_mut(id)
            .ok_or_else(|| unknown_organization(id))?;
        if let Some(name) = &patch.name {
            doc["display_name"] = json!(name);
        }
        if let Some(plan_type) = patch.plan_type {
            doc["metadata"]["plan_type"] = json!(plan_type);
        }
        parse_organization(doc)
    }

    async fn delete_organization(&self, id: &str) -> Result<(), ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::DeleteOrganization)?;
        state
            .organizations
            .remove(id)
            .ok_or_else(|| unknown_organization(id))?;
        state.memberships.retain(|(_, org)| org != id);
        Ok(())
    }

    async fn create_membership(&self, user_id: &str, org_id: &str) -> Result<(), ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::CreateMembership)?;
        if !state.organizations.contains_key(org_id) {
            return Err(unknown_organization(org_id));
        }
        state
            .memberships
            .insert((user_id.to_string(), org_id.to_string()));
        Ok(())
    }

    async fn check_membership(&self, user_id: &str, org_id: &str) -> Result<bool, ActivityFailure> {
        let mut state = self.state.write().unwrap();
        state.faults.enter(DirectoryOp::CheckMembership)?;
        Ok(state
            .memberships
            .contains(&(user_id.to_string(), org_id.to_string())))
    }
}
