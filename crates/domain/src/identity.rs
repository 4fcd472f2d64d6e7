//! End-user identity: the provider-owned profile and the locally-owned record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::RecordId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Trims and lower-cases an email so lookups and correlation keys agree.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal structural check; the identity provider has the final word.
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation(format!("invalid email: {email:?}")));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(' ') {
        return Err(DomainError::validation(format!("invalid email: {email:?}")));
    }
    Ok(())
}

/// Profile as owned by the external identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Input for creating an identity at the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileInput {
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ProfileInput {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    /// Validates the input before anything is sent to a collaborator.
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_email(&self.email)?;
        for (field, value) in [("first_name", &self.first_name), ("last_name", &self.last_name)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(DomainError::validation(format!("{field} must not be blank")));
            }
        }
        Ok(())
    }
}

/// Partial update of a provider profile. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub email_verified: Option<bool>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub attributes: Option<BTreeMap<String, String>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.email_verified.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.attributes.is_none()
    }

    /// A patch that puts every patchable field back to `snapshot`.
    pub fn restoring(snapshot: &ProviderProfile) -> Self {
        Self {
            email_verified: Some(snapshot.email_verified),
            first_name: snapshot.first_name.clone(),
            last_name: snapshot.last_name.clone(),
            phone: snapshot.phone.clone(),
            attributes: Some(snapshot.attributes.clone()),
        }
    }

    /// Applies the patch to a profile.
    pub fn apply_to(&self, profile: &mut ProviderProfile) {
        if let Some(verified) = self.email_verified {
            profile.email_verified = verified;
        }
        if let Some(first) = &self.first_name {
            profile.first_name = Some(first.clone());
        }
        if let Some(last) = &self.last_name {
            profile.last_name = Some(last.clone());
        }
        if let Some(phone) = &self.phone {
            profile.phone = Some(phone.clone());
        }
        if let Some(attributes) = &self.attributes {
            profile.attributes = attributes.clone();
        }
    }
}

/// Settings owned by this platform, never sent to the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub locale: Option<String>,
    #[serde(default)]
    pub marketing_opt_in: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Local datastore row for an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: RecordId,
    pub provider_id: String,
    pub email: String,
    pub settings: PlatformSettings,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LocalUser {
    /// Builds a fresh row linked to a provider identity.
    pub fn link(provider: &ProviderProfile, settings: PlatformSettings, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            provider_id: provider.id.clone(),
            email: normalize_email(&provider.email),
            settings,
            last_synced_at: now,
            created_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Partial update of the local record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalUserPatch {
    pub settings: Option<PlatformSettings>,
}

impl LocalUserPatch {
    pub fn is_empty(&self) -> bool {
        self.settings.is_none()
    }
}

/// The merged view returned by the identity saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndUserIdentity {
    pub user: LocalUser,
    pub profile: ProviderProfile,
}

impl EndUserIdentity {
    pub fn local_id(&self) -> RecordId {
        self.user.id
    }

    pub fn provider_id(&self) -> &str {
        &self.user.provider_id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }

    pub fn verified(&self) -> bool {
        self.profile.email_verified
    }
}
