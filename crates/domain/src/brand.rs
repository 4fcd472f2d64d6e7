//! Brands, organizations and plan limits.

use chrono::{DateTime, Utc};
use common::RecordId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Subscription plan of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[default]
    Standard,
    Enterprise,
}

impl PlanType {
    /// Maximum number of active brands an organization on this plan may own.
    pub fn brand_limit(&self) -> u32 {
        match self {
            PlanType::Standard => 1,
            PlanType::Enterprise => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Standard => "standard",
            PlanType::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organization as held by the directory provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub plan_type: PlanType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    #[serde(default)]
    pub plan_type: PlanType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub plan_type: Option<PlanType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub id: RecordId,
    pub organization_id: String,
    pub name: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Validated input for the brand provisioning saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBrand {
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub plan_type: PlanType,
    /// User asking for the brand; when set, must be a member of the organization.
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl NewBrand {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.organization_id.trim().is_empty() {
            return Err(DomainError::validation("organization id is required"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("brand name must not be blank"));
        }
        if self.name.chars().count() > 120 {
            return Err(DomainError::validation("brand name is longer than 120 characters"));
        }
        Ok(())
    }

    /// Builds the row; the first brand of an organization becomes its default.
    pub fn into_brand(self, active_count: u32, now: DateTime<Utc>) -> Brand {
        Brand {
            id: RecordId::new(),
            organization_id: self.organization_id,
            name: self.name.trim().to_string(),
            is_default: active_count == 0,
            is_active: true,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_brand(name: &str) -> NewBrand {
        NewBrand {
            organization_id: "org-1".to_string(),
            name: name.to_string(),
            plan_type: PlanType::Standard,
            requested_by: None,
        }
    }

    #[test]
    fn test_plan_limits() {
        assert_eq!(PlanType::Standard.brand_limit(), 1);
        assert_eq!(PlanType::Enterprise.brand_limit(), 100);
    }

    #[test]
    fn test_first_brand_is_default() {
        let first = new_brand("Acme").into_brand(0, Utc::now());
        let second = new_brand("Acme Two").into_brand(1, Utc::now());
        assert!(first.is_default);
        assert!(first.is_active);
        assert!(!second.is_default);
    }

    #[test]
    fn test_validation() {
        assert!(new_brand("Acme").validate().is_ok());
        assert!(new_brand("  ").validate().is_err());
        assert!(new_brand(&"x".repeat(121)).validate().is_err());
        let mut no_org = new_brand("Acme");
        no_org.organization_id = String::new();
        assert!(no_org.validate().is_err());
    }

    #[test]
    fn test_plan_type_serialization() {
        assert_eq!(
            serde_json::to_string(&PlanType::Enterprise).unwrap(),
            "\"enterprise\""
        );
        let parsed: NewBrand =
            serde_json::from_str(r#"{"organization_id":"o","name":"n"}"#).unwrap();
        assert_eq!(parsed.plan_type, PlanType::Standard);
    }
}
