//! Change publisher.
//!
//! Owns the local working copy of the configuration repository and turns a
//! set of changed documents into a pushed branch plus a pull request. The
//! caller serializes access through a single async lock; nothing here may be
//! entered concurrently for the same clone directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, ResetType, Signature};
use octocrab::Octocrab;
use tracing::{info, warn};

use crate::config::{parse_github_repo, BridgeConfig};
use crate::models::identity::IdentityFile;
use crate::services::generator::sanitize_slug;
use crate::services::groups::ChangedFile;

/// Labels applied to every provisioning pull request.
const PR_LABELS: [&str; 2] = ["scim-provisioning", "needs-review"];

/// What kind of change a publish represents; drives branch names, commit
/// messages, and PR copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Provision,
    GroupSync,
    Deactivate,
}

impl Operation {
    fn branch_tag(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::GroupSync => "groups",
            Self::Deactivate => "deactivate",
        }
    }
}

/// Steps of the publish sequence, in order. Reported on failure so callers
/// can tell how far an attempt got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PublishStep {
    SyncWorkingCopy,
    CreateBranch,
    WriteFiles,
    StageFiles,
    Commit,
    Push,
    OpenPullRequest,
}

impl std::fmt::Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SyncWorkingCopy => "sync-working-copy",
            Self::CreateBranch => "create-branch",
            Self::WriteFiles => "write-files",
            Self::StageFiles => "stage-files",
            Self::Commit => "commit",
            Self::Push => "push",
            Self::OpenPullRequest => "open-pull-request",
        };
        f.write_str(name)
    }
}

/// A publish failure, pinned to the step that failed and the branch (once one
/// exists) so a caller can recover without duplicating work.
#[derive(Debug)]
pub struct PublishError {
    pub step: PublishStep,
    pub branch: Option<String>,
    pub source: anyhow::Error,
}

impl PublishError {
    fn new(step: PublishStep, branch: Option<String>, source: anyhow::Error) -> Self {
        Self {
            step,
            branch,
            source,
        }
    }

    /// Tells the caller whether remote state already exists and what to do
    /// about it.
    pub fn remediation(&self) -> String {
        match self.step {
            PublishStep::Push => match &self.branch {
                Some(branch) => format!(
                    "Branch `{branch}` is committed locally but was not pushed; \
                     it is preserved in the working copy. Push it manually or retry, \
                     which will open a fresh branch."
                ),
                None => "No remote state was created; the request can be retried as-is."
                    .to_string(),
            },
            PublishStep::OpenPullRequest => match &self.branch {
                Some(branch) => format!(
                    "Branch `{branch}` was pushed but no pull request was opened. \
                     Open one manually from that branch, or a retry will create a \
                     duplicate branch."
                ),
                None => "No remote state was created; the request can be retried as-is."
                    .to_string(),
            },
            _ => "No branch or commit reached the remote; the request can be retried as-is."
                .to_string(),
        }
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish failed at step `{}`", self.step)?;
        if let Some(branch) = &self.branch {
            write!(f, " on branch `{branch}`")?;
        }
        write!(f, ": {:#}", self.source)
    }
}

impl std::error::Error for PublishError {}

/// A successfully opened review request.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub branch: String,
    pub pr_number: u64,
    pub pr_url: String,
}

// Everything a blocking git closure needs, owned so it can cross threads.
#[derive(Clone)]
struct GitContext {
    repo_url: String,
    clone_dir: PathBuf,
    default_branch: String,
    token: String,
    author_name: String,
    author_email: String,
}

pub struct ChangePublisher {
    ctx: GitContext,
    owner: String,
    repo: String,
    default_branch: String,
    network_timeout: Duration,
    github: Octocrab,
}

impl ChangePublisher {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let (owner, repo) = parse_github_repo(&config.git_repo_url)?;
        let github = Octocrab::builder()
            .personal_token(config.github_token.clone())
            .build()
            .context("failed to create GitHub client")?;

        Ok(Self {
            ctx: GitContext {
                repo_url: config.git_repo_url.clone(),
                clone_dir: config.repo_clone_dir(),
                default_branch: config.default_branch.clone(),
                token: config.github_token.clone(),
                author_name: config.git_author_name.clone(),
                author_email: config.git_author_email.clone(),
            },
            owner,
            repo,
            default_branch: config.default_branch.clone(),
            network_timeout: config.network_timeout(),
            github,
        })
    }

    /// Clone if absent, else fetch and hard-reset to the remote default
    /// branch head. The working copy is bridge-owned and must never
    /// accumulate drift, so divergence is discarded, never merged.
    pub async fn refresh(&self) -> Result<(), PublishError> {
        let ctx = self.ctx.clone();
        self.run_network_step(PublishStep::SyncWorkingCopy, None, move || {
            sync_working_copy(&ctx)
        })
        .await
    }

    /// Runs the full publish sequence for one set of changed files. The
    /// caller must hold the working-copy lock across the whole call.
    pub async fn publish(
        &self,
        operation: Operation,
        files: Vec<ChangedFile>,
        subject: &str,
        identity: Option<&IdentityFile>,
    ) -> Result<ReviewRequest, PublishError> {
        if files.is_empty() {
            return Err(PublishError::new(
                PublishStep::WriteFiles,
                None,
                anyhow!("no changed files to publish"),
            ));
        }

        self.refresh().await?;

        let branch = branch_name(operation, subject);
        let message = commit_message(operation, subject);

        // Branch, write, stage, commit: local and fast, one blocking section.
        {
            let ctx = self.ctx.clone();
            let branch_for_prep = branch.clone();
            let files_for_prep = files.clone();
            let prep = tokio::task::spawn_blocking(move || {
                prepare_branch(&ctx, &branch_for_prep, &files_for_prep, &message)
            })
            .await;
            match prep {
                Err(join_err) => {
                    return Err(PublishError::new(
                        PublishStep::CreateBranch,
                        Some(branch),
                        anyhow!(join_err).context("git task panicked"),
                    ))
                }
                Ok(Err((step, source))) => {
                    return Err(PublishError::new(step, Some(branch), source))
                }
                Ok(Ok(())) => {}
            }
        }

        {
            let ctx = self.ctx.clone();
            let branch_to_push = branch.clone();
            self.run_network_step(PublishStep::Push, Some(branch.clone()), move || {
                push_branch(&ctx, &branch_to_push)
            })
            .await?;
        }

        let (title, body) = pr_copy(operation, subject, &files, identity);
        let pr = tokio::time::timeout(
            self.network_timeout,
            self.github
                .pulls(&self.owner, &self.repo)
                .create(title, branch.clone(), self.default_branch.clone())
                .body(body)
                .send(),
        )
        .await;
        let pr = match pr {
            Err(_) => {
                return Err(PublishError::new(
                    PublishStep::OpenPullRequest,
                    Some(branch),
                    anyhow!("timed out after {:?}", self.network_timeout),
                ))
            }
            Ok(Err(err)) => {
                return Err(PublishError::new(
                    PublishStep::OpenPullRequest,
                    Some(branch),
                    anyhow!(err).context("GitHub pull-request creation failed"),
                ))
            }
            Ok(Ok(pr)) => pr,
        };

        let pr_number = pr.number;
        let pr_url = pr
            .html_url
            .map(|url| url.to_string())
            .unwrap_or_else(|| {
                format!(
                    "https://github.com/{}/{}/pull/{pr_number}",
                    self.owner, self.repo
                )
            });

        // Labels are best-effort; a repository without them should not fail
        // an otherwise published change.
        let labels: Vec<String> = PR_LABELS.iter().map(|label| label.to_string()).collect();
        match tokio::time::timeout(
            self.network_timeout,
            self.github
                .issues(&self.owner, &self.repo)
                .add_labels(pr_number, &labels),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(pr = pr_number, error = %err, "could not apply labels to pull request");
            }
            Err(_) => warn!(pr = pr_number, "label request timed out"),
        }

        info!(branch = %branch, pr = %pr_url, "published change for review");

        Ok(ReviewRequest {
            branch,
            pr_number,
            pr_url,
        })
    }

    async fn run_network_step<T, F>(
        &self,
        step: PublishStep,
        branch: Option<String>,
        task: F,
    ) -> Result<T, PublishError>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.network_timeout, tokio::task::spawn_blocking(task)).await {
            Err(_) => Err(PublishError::new(
                step,
                branch,
                anyhow!("timed out after {:?}", self.network_timeout),
            )),
            Ok(Err(join_err)) => Err(PublishError::new(
                step,
                branch,
                anyhow!(join_err).context("git task panicked"),
            )),
            Ok(Ok(Err(err))) => Err(PublishError::new(step, branch, err)),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

fn callbacks(token: &str) -> RemoteCallbacks<'_> {
    let mut cbs = RemoteCallbacks::new();
    cbs.credentials(move |_url, username, _allowed| {
        Cred::userpass_plaintext(username.unwrap_or("x-access-token"), token)
    });
    cbs
}

fn sync_working_copy(ctx: &GitContext) -> Result<()> {
    if ctx.clone_dir.join(".git").exists() {
        let repo = Repository::open(&ctx.clone_dir)
            .with_context(|| format!("failed to open working copy {}", ctx.clone_dir.display()))?;
        {
            let mut remote = repo
                .find_remote("origin")
                .context("working copy has no origin remote")?;
            let mut opts = FetchOptions::new();
            opts.remote_callbacks(callbacks(&ctx.token));
            let refspec = format!(
                "+refs/heads/{branch}:refs/remotes/origin/{branch}",
                branch = ctx.default_branch
            );
            remote
                .fetch(&[refspec.as_str()], Some(&mut opts), None)
                .with_context(|| format!("fetch of {} failed", ctx.default_branch))?;
        }
        reset_to_remote_head(&repo, ctx)?;
    } else {
        if ctx.clone_dir.exists() {
            // A directory that is not a git repository cannot be trusted.
            std::fs::remove_dir_all(&ctx.clone_dir).with_context(|| {
                format!("failed to clear stale clone dir {}", ctx.clone_dir.display())
            })?;
        }
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(callbacks(&ctx.token));
        RepoBuilder::new()
            .fetch_options(opts)
            .clone(&ctx.repo_url, &ctx.clone_dir)
            .with_context(|| format!("clone of {} failed", ctx.repo_url))?;
    }
    Ok(())
}

fn reset_to_remote_head(repo: &Repository, ctx: &GitContext) -> Result<()> {
    let refname = format!("refs/remotes/origin/{}", ctx.default_branch);
    let oid = repo
        .refname_to_id(&refname)
        .with_context(|| format!("{refname} not found after fetch"))?;
    let commit = repo.find_commit(oid)?;
    let object = repo.find_object(oid, None)?;

    // Detach first so the local default branch can be force-moved even when
    // it is currently checked out.
    repo.set_head_detached(oid)?;
    repo.branch(&ctx.default_branch, &commit, true)?;
    repo.set_head(&format!("refs/heads/{}", ctx.default_branch))?;
    repo.reset(&object, ResetType::Hard, None)?;
    Ok(())
}

fn prepare_branch(
    ctx: &GitContext,
    branch: &str,
    files: &[ChangedFile],
    message: &str,
) -> Result<(), (PublishStep, anyhow::Error)> {
    let repo = Repository::open(&ctx.clone_dir).map_err(|err| {
        (
            PublishStep::CreateBranch,
            anyhow::Error::new(err).context("failed to open working copy"),
        )
    })?;

    create_branch(&repo, ctx, branch).map_err(|err| (PublishStep::CreateBranch, err))?;
    write_files(&ctx.clone_dir, files).map_err(|err| (PublishStep::WriteFiles, err))?;
    stage_files(&repo, files).map_err(|err| (PublishStep::StageFiles, err))?;
    commit_staged(&repo, ctx, message).map_err(|err| (PublishStep::Commit, err))?;
    Ok(())
}

fn create_branch(repo: &Repository, ctx: &GitContext, branch: &str) -> Result<()> {
    let refname = format!("refs/remotes/origin/{}", ctx.default_branch);
    let oid = repo
        .refname_to_id(&refname)
        .with_context(|| format!("{refname} not found"))?;
    let commit = repo.find_commit(oid)?;

    repo.branch(branch, &commit, false)
        .with_context(|| format!("failed to create branch {branch}"))?;
    repo.set_head(&format!("refs/heads/{branch}"))?;

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))
        .context("failed to check out new branch")?;
    Ok(())
}

fn write_files(root: &Path, files: &[ChangedFile]) -> Result<()> {
    for file in files {
        let path = root.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, &file.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

// Stages exactly the changed paths; a blanket add could pick up unrelated
// drift in the working copy.
fn stage_files(repo: &Repository, files: &[ChangedFile]) -> Result<()> {
    let mut index = repo.index().context("failed to open index")?;
    for file in files {
        index
            .add_path(Path::new(&file.path))
            .with_context(|| format!("failed to stage {}", file.path))?;
    }
    index.write().context("failed to write index")?;
    Ok(())
}

fn commit_staged(repo: &Repository, ctx: &GitContext, message: &str) -> Result<()> {
    let mut index = repo.index()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let parent = repo.head()?.peel_to_commit()?;
    let sig = Signature::now(&ctx.author_name, &ctx.author_email)?;

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
    Ok(())
}

fn push_branch(ctx: &GitContext, branch: &str) -> Result<()> {
    let repo = Repository::open(&ctx.clone_dir)
        .with_context(|| format!("failed to open working copy {}", ctx.clone_dir.display()))?;
    let mut remote = repo
        .find_remote("origin")
        .context("working copy has no origin remote")?;

    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks(&ctx.token));
    let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
    remote
        .push(&[refspec.as_str()], Some(&mut opts))
        .with_context(|| format!("push of {branch} failed"))?;
    Ok(())
}

/// Collision-resistant by construction: operation kind, sanitized subject,
/// unix timestamp.
fn branch_name(operation: Operation, subject: &str) -> String {
    format!(
        "scim-{}-{}-{}",
        operation.branch_tag(),
        sanitize_slug(subject, "user"),
        Utc::now().timestamp()
    )
}

fn commit_message(operation: Operation, subject: &str) -> String {
    match operation {
        Operation::Provision => format!("SCIM: add/update user identity for {subject}"),
        Operation::GroupSync => format!("SCIM: update group memberships for {subject}"),
        Operation::Deactivate => format!("SCIM: deactivate user identity for {subject}"),
    }
}

fn pr_copy(
    operation: Operation,
    subject: &str,
    files: &[ChangedFile],
    identity: Option<&IdentityFile>,
) -> (String, String) {
    let title = match operation {
        Operation::Provision => format!("SCIM Provisioning: {subject}"),
        Operation::GroupSync => format!("SCIM Group Sync: {subject} membership changes"),
        Operation::Deactivate => format!("SCIM Deactivation: {subject}"),
    };

    let mut body = String::new();
    match operation {
        Operation::Provision => body.push_str("## SCIM User Provisioning\n\n"),
        Operation::GroupSync => body.push_str("## SCIM Group Membership Update\n\n"),
        Operation::Deactivate => body.push_str("## SCIM User Deactivation\n\n"),
    }

    body.push_str(&format!("**User:** {subject}\n"));
    if let Some(doc) = identity {
        body.push_str(&format!("**Email:** {}\n", doc.identity.email));
        body.push_str(&format!("**Role:** {}\n", doc.identity.role));
        body.push_str(&format!("**Team:** {}\n", doc.identity.team));
        body.push_str(&format!("**Status:** {}\n", doc.identity.status));
    }
    body.push_str(&format!("**Modified files:** {}\n\n", files.len()));
    for file in files {
        body.push_str(&format!("- `{}`\n", file.path));
    }

    body.push_str("\n### Summary\n");
    match operation {
        Operation::Provision => body.push_str(&format!(
            "Adds or updates the identity configuration for {subject}, provisioned \
             via SCIM from EntraID.\n"
        )),
        Operation::GroupSync => body.push_str(&format!(
            "Updates `entraid_human_identities` group memberships for {subject}, \
             synchronized via SCIM from EntraID.\n"
        )),
        Operation::Deactivate => body.push_str(&format!(
            "Deactivates the identity for {subject} and removes their group \
             memberships. The identity document is kept with `status: deactivated`.\n"
        )),
    }

    body.push_str("\n### Verification checklist\n");
    match operation {
        Operation::GroupSync => {
            body.push_str("- [ ] Review group membership changes\n");
            body.push_str("- [ ] Confirm the user should have access to these groups\n");
            body.push_str("- [ ] Check for missing or extra group assignments\n");
        }
        _ => {
            body.push_str("- [ ] Review user details for accuracy\n");
            body.push_str("- [ ] Confirm role and team assignments\n");
            body.push_str("- [ ] Verify authentication configuration\n");
            body.push_str("- [ ] Check policies match the user's role\n");
        }
    }

    body.push_str(
        "\nAfter merging, run `terraform plan` and `terraform apply` to land the \
         change in Vault.\n\n---\n*Opened automatically by the SCIM bridge.*\n",
    );

    (title, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(repo_url: &str, clone_dir: PathBuf) -> GitContext {
        GitContext {
            repo_url: repo_url.to_string(),
            clone_dir,
            default_branch: "main".to_string(),
            token: "unused-for-local-paths".to_string(),
            author_name: "scim-bridge".to_string(),
            author_email: "scim-bridge@localhost".to_string(),
        }
    }

    fn init_origin(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        // Pin the default branch name regardless of host git config.
        repo.set_head("refs/heads/main").unwrap();
        std::fs::create_dir_all(dir.join("identities")).unwrap();
        std::fs::write(dir.join("identities/.gitkeep"), "").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("identities/.gitkeep")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let sig = Signature::now("seed", "seed@example.com").unwrap();
        {
            let tree = repo.find_tree(tree_id).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "seed", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[test]
    fn branch_names_carry_operation_subject_and_timestamp() {
        let name = branch_name(Operation::Provision, "alice.johnson@example.com");
        assert!(name.starts_with("scim-provision-alicejohnsonexamplecom-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert!(suffix.parse::<i64>().is_ok());

        assert!(branch_name(Operation::GroupSync, "Bob").starts_with("scim-groups-bob-"));
        assert!(
            branch_name(Operation::Deactivate, "Bob").starts_with("scim-deactivate-bob-")
        );
    }

    #[test]
    fn commit_messages_describe_the_operation() {
        assert_eq!(
            commit_message(Operation::Provision, "alice"),
            "SCIM: add/update user identity for alice"
        );
        assert_eq!(
            commit_message(Operation::GroupSync, "alice"),
            "SCIM: update group memberships for alice"
        );
        assert_eq!(
            commit_message(Operation::Deactivate, "alice"),
            "SCIM: deactivate user identity for alice"
        );
    }

    #[test]
    fn pr_body_lists_files_and_identity_fields() {
        let files = vec![ChangedFile {
            path: "identities/entraid_human_alice_johnson.yaml".to_string(),
            content: String::new(),
        }];
        let (title, body) = pr_copy(Operation::Provision, "alice", &files, None);
        assert_eq!(title, "SCIM Provisioning: alice");
        assert!(body.contains("`identities/entraid_human_alice_johnson.yaml`"));
        assert!(body.contains("- [ ] Review user details for accuracy"));
        assert!(body.contains("terraform apply"));
    }

    #[test]
    fn remediation_distinguishes_partial_states() {
        let push_failure = PublishError::new(
            PublishStep::Push,
            Some("scim-provision-a-1".to_string()),
            anyhow!("network down"),
        );
        assert!(push_failure.remediation().contains("was not pushed"));

        let pr_failure = PublishError::new(
            PublishStep::OpenPullRequest,
            Some("scim-provision-a-1".to_string()),
            anyhow!("api down"),
        );
        assert!(pr_failure.remediation().contains("no pull request"));

        let early_failure =
            PublishError::new(PublishStep::CreateBranch, None, anyhow!("boom"));
        assert!(early_failure.remediation().contains("retried as-is"));
    }

    #[test]
    fn publish_error_display_names_the_step() {
        let err = PublishError::new(
            PublishStep::Push,
            Some("scim-groups-bob-7".to_string()),
            anyhow!("remote hung up"),
        );
        let text = err.to_string();
        assert!(text.contains("`push`"));
        assert!(text.contains("scim-groups-bob-7"));
        assert!(text.contains("remote hung up"));
    }

    #[test]
    fn clone_branch_commit_push_against_local_origin() {
        let origin_dir = tempdir().unwrap();
        let origin = init_origin(origin_dir.path());

        let work = tempdir().unwrap();
        let clone_dir = work.path().join("vault-config-repo");
        let ctx = context(origin_dir.path().to_str().unwrap(), clone_dir.clone());

        // Clone-or-update twice: fresh clone, then fetch + reset.
        sync_working_copy(&ctx).unwrap();
        assert!(clone_dir.join(".git").exists());
        sync_working_copy(&ctx).unwrap();

        let files = vec![ChangedFile {
            path: "identities/entraid_human_alice_johnson.yaml".to_string(),
            content: "identity:\n  name: Alice Johnson\n".to_string(),
        }];
        prepare_branch(&ctx, "scim-provision-alice-1", &files, "SCIM: add alice").unwrap();

        let repo = Repository::open(&clone_dir).unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head.shorthand(), Some("scim-provision-alice-1"));
        let commit = head.peel_to_commit().unwrap();
        assert_eq!(commit.message(), Some("SCIM: add alice"));
        assert!(clone_dir
            .join("identities/entraid_human_alice_johnson.yaml")
            .exists());

        // Exactly one file staged into the commit beyond the seed tree.
        let tree = commit.tree().unwrap();
        assert!(tree
            .get_path(Path::new("identities/entraid_human_alice_johnson.yaml"))
            .is_ok());

        push_branch(&ctx, "scim-provision-alice-1").unwrap();
        assert!(origin
            .find_branch("scim-provision-alice-1", git2::BranchType::Local)
            .is_ok());

        // A later sync resets the working copy back onto the default branch.
        sync_working_copy(&ctx).unwrap();
        let repo = Repository::open(&clone_dir).unwrap();
        assert_eq!(repo.head().unwrap().shorthand(), Some("main"));
    }

    #[test]
    fn duplicate_branch_creation_fails_cleanly() {
        let origin_dir = tempdir().unwrap();
        init_origin(origin_dir.path());

        let work = tempdir().unwrap();
        let clone_dir = work.path().join("vault-config-repo");
        let ctx = context(origin_dir.path().to_str().unwrap(), clone_dir);

        sync_working_copy(&ctx).unwrap();
        let files = vec![ChangedFile {
            path: "identities/a.yaml".to_string(),
            content: "a: 1\n".to_string(),
        }];
        prepare_branch(&ctx, "scim-provision-dup-1", &files, "first").unwrap();

        sync_working_copy(&ctx).unwrap();
        let err = prepare_branch(&ctx, "scim-provision-dup-1", &files, "second").unwrap_err();
        assert_eq!(err.0, PublishStep::CreateBranch);
    }
}
