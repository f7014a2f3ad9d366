//! Identity document model.
//!
//! One YAML file per human identity under `identities/`, matching the
//! `schema_entraid_human.yaml` shape the Terraform apply pipeline consumes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Lifecycle status of an identity. Deactivation is the terminal state;
/// documents are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Deactivated,
}

impl IdentityStatus {
    pub fn from_active(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Deactivated
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deactivated => "deactivated",
        }
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `metadata:` block.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityMetadata {
    #[validate(length(min = 1))]
    pub version: String,
    #[validate(length(min = 1))]
    pub created_date: String,
    pub description: String,
    pub entraid_object_id: String,
    pub entraid_upn: String,
    pub provisioned_via_scim: bool,
}

/// `identity:` block.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityBlock {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub role: String,
    #[validate(length(min = 1))]
    pub team: String,
    pub status: IdentityStatus,
}

/// `authentication:` block.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthenticationBlock {
    #[validate(length(min = 1))]
    pub oidc: String,
    pub disabled: bool,
}

/// `policies:` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBlock {
    pub identity_policies: Vec<String>,
}

/// A complete identity document.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityFile {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[validate]
    pub metadata: IdentityMetadata,
    #[validate]
    pub identity: IdentityBlock,
    #[validate]
    pub authentication: AuthenticationBlock,
    pub policies: PolicyBlock,
}

/// Why a document was rejected before publishing.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document failed schema validation: {0}")]
    Shape(#[from] validator::ValidationErrors),
    #[error("identity.status `{status}` disagrees with authentication.disabled `{disabled}`")]
    StatusDisabledMismatch {
        status: IdentityStatus,
        disabled: bool,
    },
    #[error("identity.{field} `{value}` is not a valid slug")]
    InvalidSlug { field: &'static str, value: String },
}

impl IdentityFile {
    /// Validates the declared shape plus the status/disabled invariant.
    /// A document that fails here must never be written or published.
    pub fn validate_document(&self) -> Result<(), DocumentError> {
        self.validate()?;

        let deactivated = self.identity.status == IdentityStatus::Deactivated;
        if deactivated != self.authentication.disabled {
            return Err(DocumentError::StatusDisabledMismatch {
                status: self.identity.status,
                disabled: self.authentication.disabled,
            });
        }

        for (field, value) in [("role", &self.identity.role), ("team", &self.identity.team)] {
            if !is_slug(value) {
                return Err(DocumentError::InvalidSlug {
                    field,
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

/// True when the value is a non-empty `[a-z0-9_]` slug without edge or
/// doubled underscores.
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !value.starts_with('_')
        && !value.ends_with('_')
        && !value.contains("__")
}
