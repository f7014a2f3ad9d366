//! SCIM 2.0 wire types.
//!
//! Inbound resources from the EntraID provisioning protocol (RFC 7643/7644
//! subset). These are request-scoped: only the derived identity document and
//! the id mapping ever persist.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SCIM core User schema URN.
pub const SCIM_USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
/// SCIM PatchOp message schema URN.
pub const SCIM_PATCH_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";
/// SCIM ListResponse message schema URN.
pub const SCIM_LIST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
/// SCIM Error message schema URN.
pub const SCIM_ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";
/// Bridge-specific extension namespace carried on responses.
pub const VAULT_EXTENSION_URN: &str = "urn:vault:scim:extension";

/// SCIM email sub-attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimEmail {
    pub value: String,
    #[serde(rename = "type", default = "default_email_type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub primary: bool,
}

/// SCIM group reference carried on a User resource. EntraID guarantees a
/// display name; the group id is not always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimGroupRef {
    #[serde(default)]
    pub value: String,
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// SCIM 2.0 User resource as pushed by EntraID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimUser {
    #[serde(default = "default_user_schemas")]
    pub schemas: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "externalId", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emails: Option<Vec<ScimEmail>>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<ScimGroupRef>>,
}

impl ScimUser {
    /// Minimal record for regeneration when only the store mapping is known
    /// (deactivation and attribute patches arrive without the full resource).
    pub fn minimal(id: &str, name: &str, active: bool) -> Self {
        Self {
            schemas: default_user_schemas(),
            id: Some(id.to_string()),
            external_id: None,
            user_name: name.to_string(),
            display_name: Some(name.to_string()),
            emails: None,
            active,
            title: None,
            department: None,
            groups: None,
        }
    }

    /// Group display names present on the resource, blank entries dropped.
    pub fn group_display_names(&self) -> Vec<String> {
        self.groups
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(|group| group.display.as_deref())
            .map(str::trim)
            .filter(|display| !display.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// One PATCH operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimPatchOperation {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// SCIM PATCH request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimPatch {
    #[serde(default = "default_patch_schemas")]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations")]
    pub operations: Vec<ScimPatchOperation>,
}

/// SCIM ListResponse envelope for reconciliation listings.
#[derive(Debug, Clone, Serialize)]
pub struct ScimListResponse {
    pub schemas: Vec<String>,
    #[serde(rename = "totalResults")]
    pub total_results: usize,
    #[serde(rename = "startIndex")]
    pub start_index: usize,
    #[serde(rename = "itemsPerPage")]
    pub items_per_page: usize,
    #[serde(rename = "Resources")]
    pub resources: Vec<Value>,
}

/// SCIM error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ScimError {
    pub schemas: Vec<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ScimError {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            schemas: vec![SCIM_ERROR_SCHEMA.to_string()],
            status: status.to_string(),
            detail: Some(detail.into()),
        }
    }
}

fn default_email_type() -> String {
    "work".to_string()
}

fn default_true() -> bool {
    true
}

fn default_user_schemas() -> Vec<String> {
    vec![SCIM_USER_SCHEMA.to_string()]
}

fn default_patch_schemas() -> Vec<String> {
    vec![SCIM_PATCH_SCHEMA.to_string()]
}
