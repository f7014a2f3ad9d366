//! Group-membership synchronizer.
//!
//! Computes edits to `identity_groups/*.yaml` documents without touching the
//! working copy itself; the publisher owns all writes. Existing files are
//! edited as YAML mappings, so every field the bridge does not manage
//! survives a rewrite unchanged.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::models::group::{GroupFile, ENTRAID_MEMBERS_KEY, GROUPS_DIR};
use crate::services::generator::sanitize_slug;

/// Fallback filename token when a group display name sanitizes to nothing.
const GROUP_NAME_FALLBACK: &str = "unknown_group";

/// A document the publisher should write, with its repo-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub content: String,
}

pub struct GroupSync {
    repo_dir: PathBuf,
}

impl GroupSync {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    /// Ensures `display_name` is a member of every group in `desired`.
    /// Unknown groups become new internal documents. Already-present
    /// memberships are no-ops, so replaying the same event changes nothing.
    pub fn sync(&self, display_name: &str, desired: &[String]) -> Result<Vec<ChangedFile>> {
        let groups = self.load_all()?;
        let mut changed = Vec::new();
        let mut seen = BTreeSet::new();

        for group_name in desired {
            let group_name = group_name.trim();
            if group_name.is_empty() || !seen.insert(group_name.to_string()) {
                continue;
            }

            match find_group(&groups, group_name) {
                Some((path, mapping)) => {
                    if let Some(updated) = with_member_added(mapping, display_name)? {
                        changed.push(ChangedFile {
                            path: self.relative(path),
                            content: render(&updated)?,
                        });
                    }
                }
                None => {
                    let slug = sanitize_slug(group_name, GROUP_NAME_FALLBACK);
                    let filename = format!("identity_group_{slug}.yaml");
                    if self.repo_dir.join(GROUPS_DIR).join(&filename).exists() {
                        // A file with this slug exists but names a different
                        // group; leave it to a human rather than clobber it.
                        warn!(group = %group_name, file = %filename,
                            "group file slug collision, skipping creation");
                        continue;
                    }
                    let file = GroupFile::provisioned(group_name, display_name);
                    changed.push(ChangedFile {
                        path: format!("{GROUPS_DIR}/{filename}"),
                        content: serde_yaml::to_string(&file)
                            .context("failed to render new group document")?,
                    });
                }
            }
        }

        changed.sort_by(|a, b| a.path.cmp(&b.path));
        changed.dedup_by(|a, b| a.path == b.path);
        Ok(changed)
    }

    /// Removes `display_name` from one group, if present.
    pub fn remove(&self, display_name: &str, group_name: &str) -> Result<Option<ChangedFile>> {
        let groups = self.load_all()?;
        if let Some((path, mapping)) = find_group(&groups, group_name) {
            if let Some(updated) = with_member_removed(mapping, display_name)? {
                return Ok(Some(ChangedFile {
                    path: self.relative(path),
                    content: render(&updated)?,
                }));
            }
        }
        Ok(None)
    }

    /// Removes `display_name` from every group that lists it. Used on
    /// deactivation so a disabled identity holds no memberships.
    pub fn remove_from_all(&self, display_name: &str) -> Result<Vec<ChangedFile>> {
        let groups = self.load_all()?;
        let mut changed = Vec::new();
        for (path, mapping) in &groups {
            if let Some(updated) = with_member_removed(mapping, display_name)? {
                changed.push(ChangedFile {
                    path: self.relative(path),
                    content: render(&updated)?,
                });
            }
        }
        Ok(changed)
    }

    /// Loads every group document once, sorted by path, so duplicate display
    /// names deterministically resolve to the lexicographically-first file.
    fn load_all(&self) -> Result<Vec<(PathBuf, Mapping)>> {
        let dir = self.repo_dir.join(GROUPS_DIR);
        let mut out = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", dir.display()))
            }
        };

        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read entry in {}", dir.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_yaml::from_str::<Value>(&raw) {
                Ok(Value::Mapping(mapping)) if mapping.get(&name_key()).is_some() => {
                    out.push((path, mapping));
                }
                Ok(_) => {
                    warn!(file = %path.display(), "skipping group file without a name field");
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unparseable group file");
                }
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn name_key() -> Value {
    Value::String("name".to_string())
}

fn members_key() -> Value {
    Value::String(ENTRAID_MEMBERS_KEY.to_string())
}

fn find_group<'a>(
    groups: &'a [(PathBuf, Mapping)],
    display_name: &str,
) -> Option<&'a (PathBuf, Mapping)> {
    let key = name_key();
    groups
        .iter()
        .find(|(_, mapping)| mapping.get(&key).and_then(Value::as_str) == Some(display_name))
}

fn members_of(mapping: &Mapping) -> Result<Vec<String>> {
    match mapping.get(&members_key()) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(entries)) => entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_string)
                    .context("non-string entry in entraid_human_identities")
            })
            .collect(),
        Some(other) => bail!("entraid_human_identities is not a list: {other:?}"),
    }
}

fn with_member_added(mapping: &Mapping, member: &str) -> Result<Option<Mapping>> {
    let mut members = members_of(mapping)?;
    if members.iter().any(|existing| existing == member) {
        return Ok(None);
    }
    members.push(member.to_string());
    members.sort();
    Ok(Some(replace_members(mapping, members)))
}

fn with_member_removed(mapping: &Mapping, member: &str) -> Result<Option<Mapping>> {
    let mut members = members_of(mapping)?;
    if !members.iter().any(|existing| existing == member) {
        return Ok(None);
    }
    members.retain(|existing| existing != member);
    members.sort();
    Ok(Some(replace_members(mapping, members)))
}

// Insert keeps the key's original position in the mapping, so rewritten
// documents diff only on the membership list.
fn replace_members(mapping: &Mapping, members: Vec<String>) -> Mapping {
    let mut updated = mapping.clone();
    updated.insert(
        members_key(),
        Value::Sequence(members.into_iter().map(Value::String).collect()),
    );
    updated
}

fn render(mapping: &Mapping) -> Result<String> {
    serde_yaml::to_string(mapping).context("failed to render group document")
}
