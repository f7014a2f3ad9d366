//! Bridge configuration
//!
//! Every setting comes from an environment variable (with a CLI flag
//! override for local runs) and is validated once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

/// Runtime configuration for the SCIM bridge.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scim-bridge",
    version,
    about = "SCIM 2.0 bridge for Vault identity configuration-as-code"
)]
pub struct BridgeConfig {
    /// Bearer token expected on inbound SCIM requests from EntraID
    #[arg(long, env = "SCIM_BEARER_TOKEN", hide_env_values = true)]
    pub scim_bearer_token: String,

    /// GitHub token used to push branches and open pull requests
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    /// Configuration repository URL (HTTPS or SSH, GitHub only)
    #[arg(long, env = "GIT_REPO_URL")]
    pub git_repo_url: String,

    /// Data directory holding the working copy and the user store
    #[arg(long, env = "DATA_DIR", default_value = "/app/data")]
    pub data_dir: PathBuf,

    /// Default branch of the configuration repository
    #[arg(long, env = "GIT_DEFAULT_BRANCH", default_value = "main")]
    pub default_branch: String,

    /// Listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Commit author name for provisioning commits
    #[arg(long, env = "GIT_AUTHOR_NAME", default_value = "scim-bridge")]
    pub git_author_name: String,

    /// Commit author email for provisioning commits
    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = "scim-bridge@localhost")]
    pub git_author_email: String,

    /// Timeout applied to every outbound network call, in seconds
    #[arg(long, env = "NETWORK_TIMEOUT_SECS", default_value_t = 30)]
    pub network_timeout_secs: u64,

    /// Schema reference embedded in generated identity documents,
    /// relative to the repository root
    #[arg(
        long,
        env = "SCHEMA_FILE_PATH",
        default_value = "identities/schema_entraid_human.yaml"
    )]
    pub schema_file_path: String,
}

impl BridgeConfig {
    /// Rejects configurations that would only fail later, mid-request.
    pub fn validate(&self) -> Result<()> {
        if self.scim_bearer_token.trim().is_empty() {
            bail!("SCIM_BEARER_TOKEN must not be empty");
        }
        if self.github_token.trim().is_empty() {
            bail!("GITHUB_TOKEN must not be empty");
        }
        parse_github_repo(&self.git_repo_url)?;
        Ok(())
    }

    /// Local working copy of the configuration repository.
    pub fn repo_clone_dir(&self) -> PathBuf {
        self.data_dir.join("vault-config-repo")
    }

    /// Durable user store file.
    pub fn user_store_path(&self) -> PathBuf {
        self.data_dir.join("user_store.json")
    }

    /// Bound on every outbound network call.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

/// Splits a GitHub clone URL into `(owner, repository)`.
pub fn parse_github_repo(url: &str) -> Result<(String, String)> {
    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else if let Some(rest) = url.strip_prefix("https://github.com/") {
        rest
    } else {
        bail!("GIT_REPO_URL must be an HTTPS or SSH GitHub URL: {url}");
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo))
            if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
        {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => bail!("GIT_REPO_URL must look like https://github.com/<owner>/<repo>.git: {url}"),
    }
}
