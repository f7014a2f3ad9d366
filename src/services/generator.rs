//! YAML identity generator.
//!
//! Pure transformation from a SCIM user resource to an identity document and
//! its canonical filename. Regenerating from the same input yields identical
//! output (the creation date is stable within a day), which is what makes
//! provider-side retries safe.

use chrono::Utc;
use thiserror::Error;

use crate::models::identity::{
    AuthenticationBlock, DocumentError, IdentityBlock, IdentityFile, IdentityMetadata,
    IdentityStatus, PolicyBlock,
};
use crate::models::scim::ScimUser;

/// Directory of identity documents, relative to the repository root.
pub const IDENTITIES_DIR: &str = "identities";
/// Filename prefix marking documents provisioned through this pipeline.
pub const FILE_PREFIX: &str = "entraid_human";
/// Fallback filename token when a display name sanitizes to nothing.
const NAME_FALLBACK: &str = "user";
/// Role slug applied when EntraID sends no job title.
const ROLE_FALLBACK: &str = "employee";
/// Team slug applied when EntraID sends no department.
const TEAM_FALLBACK: &str = "general";

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("user has neither displayName nor userName; refusing to generate an unnamed identity")]
    MissingName,
    #[error(transparent)]
    Invalid(#[from] DocumentError),
    #[error("failed to render YAML: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// A rendered identity document ready for publishing.
#[derive(Debug, Clone)]
pub struct GeneratedIdentity {
    /// Canonical filename, e.g. `entraid_human_jane_example.yaml`.
    pub filename: String,
    /// Repo-relative path under `identities/`.
    pub path: String,
    /// Rendered YAML.
    pub content: String,
    /// The validated document.
    pub document: IdentityFile,
}

pub struct YamlGenerator {
    schema_ref: String,
}

impl YamlGenerator {
    pub fn new(schema_ref: impl Into<String>) -> Self {
        Self {
            schema_ref: schema_ref.into(),
        }
    }

    /// Renders and validates the identity document for a SCIM user.
    pub fn generate(&self, user: &ScimUser) -> Result<GeneratedIdentity, GeneratorError> {
        let display_name = user
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let upn = user.user_name.trim();
        if display_name.is_none() && upn.is_empty() {
            return Err(GeneratorError::MissingName);
        }

        // Primary email: the provider's `primary` marker wins, then the UPN.
        let email = user
            .emails
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .find(|e| e.primary && !e.value.trim().is_empty())
            .map(|e| e.value.trim().to_string())
            .unwrap_or_else(|| upn.to_string());

        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| email.clone());
        let role = sanitize_slug(user.title.as_deref().unwrap_or(""), ROLE_FALLBACK);
        let team = sanitize_slug(user.department.as_deref().unwrap_or(""), TEAM_FALLBACK);
        let status = IdentityStatus::from_active(user.active);
        let filename = canonical_filename(&name);

        let document = IdentityFile {
            schema: self.schema_ref.clone(),
            metadata: IdentityMetadata {
                version: "1.0.0".to_string(),
                created_date: Utc::now().format("%Y-%m-%d").to_string(),
                description: format!("EntraID user {name} provisioned via SCIM"),
                entraid_object_id: user.id.clone().unwrap_or_default(),
                entraid_upn: user.user_name.clone(),
                provisioned_via_scim: true,
            },
            identity: IdentityBlock {
                name,
                email: email.clone(),
                role: role.clone(),
                team,
                status,
            },
            authentication: AuthenticationBlock {
                oidc: email,
                disabled: !user.active,
            },
            policies: PolicyBlock {
                identity_policies: vec![format!("{role}-policy")],
            },
        };
        document.validate_document()?;

        let content = serde_yaml::to_string(&document)?;
        Ok(GeneratedIdentity {
            path: format!("{IDENTITIES_DIR}/{filename}"),
            filename,
            content,
            document,
        })
    }
}

/// Lowercases, maps whitespace runs to single underscores, strips everything
/// outside `[a-z0-9_]`, collapses repeated underscores and trims the edges.
/// Empty results take the fallback, so inbound data can never fail this step.
pub fn sanitize_slug(value: &str, fallback: &str) -> String {
    let mut raw = String::with_capacity(value.len());
    for ch in value.to_lowercase().chars() {
        if ch.is_whitespace() {
            raw.push('_');
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            raw.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }

    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonical filename for an identity display name.
pub fn canonical_filename(display_name: &str) -> String {
    format!(
        "{FILE_PREFIX}_{}.yaml",
        sanitize_slug(display_name, NAME_FALLBACK)
    )
}
