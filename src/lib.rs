//! SCIM Bridge for Vault
//!
//! Receives SCIM 2.0 provisioning webhooks from Microsoft EntraID, renders
//! Vault identity YAML documents, and lands every change as a reviewable
//! GitHub pull request against the configuration-as-code repository.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::BridgeConfig;
pub use services::generator::YamlGenerator;
pub use services::groups::GroupSync;
pub use services::publisher::ChangePublisher;
pub use services::store::UserStore;
