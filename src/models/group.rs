//! Group document model.
//!
//! One YAML file per group under `identity_groups/`. The bridge only ever
//! writes the `entraid_human_identities` list; every other field belongs to
//! the humans who author these files and must survive rewrites untouched.

use serde::{Deserialize, Serialize};

/// Directory of group documents, relative to the repository root.
pub const GROUPS_DIR: &str = "identity_groups";
/// Membership list owned by the bridge.
pub const ENTRAID_MEMBERS_KEY: &str = "entraid_human_identities";

/// Group classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Internal,
    External,
}

/// A freshly created group document. Existing documents are edited at the
/// YAML-mapping level instead, so fields this struct does not know about are
/// preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupFile {
    pub name: String,
    pub contact: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    pub human_identities: Vec<String>,
    pub application_identities: Vec<String>,
    pub entraid_human_identities: Vec<String>,
    pub sub_groups: Vec<String>,
    pub identity_group_policies: Vec<String>,
}

impl GroupFile {
    /// New internal group seeded with a single externally-provisioned member.
    pub fn provisioned(name: &str, first_member: &str) -> Self {
        Self {
            name: name.to_string(),
            contact: String::new(),
            group_type: GroupType::Internal,
            human_identities: Vec::new(),
            application_identities: Vec::new(),
            entraid_human_identities: vec![first_member.to_string()],
            sub_groups: Vec::new(),
            identity_group_policies: Vec::new(),
        }
    }
}
