//! SCIM Bridge for Vault
//!
//! Receives SCIM 2.0 provisioning webhooks from Microsoft EntraID, renders
//! Vault identity YAML documents, and lands every change as a reviewable
//! GitHub pull request. Nothing becomes authoritative until a human merges
//! and the Terraform apply step runs out-of-band.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scim_bridge::auth;
use scim_bridge::config::BridgeConfig;
use scim_bridge::error::{BridgeError, SCIM_CONTENT_TYPE};
use scim_bridge::models::identity::IdentityStatus;
use scim_bridge::models::scim::{
    ScimListResponse, ScimPatch, ScimUser, SCIM_LIST_SCHEMA, SCIM_USER_SCHEMA, VAULT_EXTENSION_URN,
};
use scim_bridge::services::generator::{GeneratorError, YamlGenerator, IDENTITIES_DIR};
use scim_bridge::services::groups::{ChangedFile, GroupSync};
use scim_bridge::services::publisher::{ChangePublisher, Operation};
use scim_bridge::services::store::{UserEntry, UserStore};

#[derive(Clone)]
struct AppState {
    generator: Arc<YamlGenerator>,
    groups: Arc<GroupSync>,
    publisher: Arc<Mutex<ChangePublisher>>,
    store: Arc<UserStore>,
    bearer_token: Arc<String>,
    repo_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = BridgeConfig::parse();
    config.validate()?;

    info!("starting SCIM bridge");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;

    // A corrupt store is fatal: running with a guessed-empty store would
    // silently orphan every identity document already provisioned.
    let store = Arc::new(UserStore::open(config.user_store_path())?);

    let publisher = ChangePublisher::new(&config)?;
    publisher
        .refresh()
        .await
        .context("initial repository sync failed")?;

    let repo_dir = config.repo_clone_dir();
    let state = AppState {
        generator: Arc::new(YamlGenerator::new(config.schema_file_path.clone())),
        groups: Arc::new(GroupSync::new(repo_dir.clone())),
        publisher: Arc::new(Mutex::new(publisher)),
        store,
        bearer_token: Arc::new(config.scim_bearer_token.clone()),
        repo_dir,
    };

    let scim_routes = Router::new()
        .route("/scim/v2/Users", post(create_user).get(list_users))
        .route(
            "/scim/v2/Users/:user_id",
            patch(update_user).delete(delete_user),
        )
        .layer(middleware::from_fn_with_state(
            state.bearer_token.clone(),
            auth::require_bearer,
        ));

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(scim_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(addr = %config.bind_addr, "SCIM bridge listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Response {
    // Services are wired before the listener starts; the working copy is the
    // one readiness signal that can regress at runtime.
    let working_copy_ready = state.repo_dir.join(".git").exists();
    let body = json!({
        "status": if working_copy_ready { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "yaml_generator": true,
            "group_sync": working_copy_ready,
            "publisher": working_copy_ready,
            "user_store": true,
        },
        "version": env!("CARGO_PKG_VERSION"),
    });
    let status = if working_copy_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// `POST /scim/v2/Users`: provision a new identity.
async fn create_user(
    State(state): State<AppState>,
    Json(user): Json<ScimUser>,
) -> Result<Response, BridgeError> {
    info!(user = %user.user_name, "creating user");

    // Validation failures reject the request before any side effect.
    let generated = state.generator.generate(&user).map_err(map_generator_error)?;

    // The working-copy lock covers refresh, group reads, and both publishes,
    // so concurrent requests cannot interleave git state.
    let publisher = state.publisher.lock().await;
    publisher.refresh().await?;

    let identity_pr = publisher
        .publish(
            Operation::Provision,
            vec![ChangedFile {
                path: generated.path.clone(),
                content: generated.content.clone(),
            }],
            &user.user_name,
            Some(&generated.document),
        )
        .await?;

    let mut group_pr_url = None;
    let group_names = user.group_display_names();
    if !group_names.is_empty() {
        let changed = state
            .groups
            .sync(&generated.document.identity.name, &group_names)?;
        if !changed.is_empty() {
            let group_pr = publisher
                .publish(Operation::GroupSync, changed, &user.user_name, None)
                .await?;
            group_pr_url = Some(group_pr.pr_url);
        }
    }
    drop(publisher);

    state.store.put(UserEntry {
        scim_id: user.id.clone().unwrap_or_else(|| user.user_name.clone()),
        name: generated.document.identity.name.clone(),
        filename: generated.filename.clone(),
        status: generated.document.identity.status,
        updated_at: Utc::now(),
    })?;

    info!(user = %user.user_name, pr = %identity_pr.pr_url, "user created");

    let mut body = serde_json::to_value(&user).context("failed to encode response")?;
    body[VAULT_EXTENSION_URN] = json!({
        "pr_url": identity_pr.pr_url,
        "yaml_file": generated.path,
        "group_pr_url": group_pr_url,
    });

    Ok(scim_response(StatusCode::CREATED, body))
}

/// `PATCH /scim/v2/Users/{id}`: group membership and attribute updates.
async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<ScimPatch>,
) -> Result<Response, BridgeError> {
    info!(user = %user_id, "updating user");

    let entry = state
        .store
        .get(&user_id)
        .ok_or_else(|| BridgeError::NotFound(user_id.clone()))?;

    let outcome = interpret_patch(&patch);

    // Regenerate before anything publishes, so a validation failure cannot
    // leave a half-applied update behind.
    let attribute_change =
        outcome.active.is_some() || outcome.title.is_some() || outcome.department.is_some();
    let regenerated = if attribute_change {
        let active = outcome
            .active
            .unwrap_or(entry.status == IdentityStatus::Active);
        let mut record = ScimUser::minimal(&user_id, &entry.name, active);
        record.title = outcome.title.clone();
        record.department = outcome.department.clone();
        Some(state.generator.generate(&record).map_err(map_generator_error)?)
    } else {
        None
    };

    let publisher = state.publisher.lock().await;
    publisher.refresh().await?;

    let mut group_pr_url = None;
    let mut group_changes = Vec::new();
    if let Some(desired) = &outcome.desired_groups {
        group_changes.extend(state.groups.sync(&entry.name, desired)?);
    }
    for group in &outcome.removed_groups {
        if let Some(change) = state.groups.remove(&entry.name, group)? {
            group_changes.push(change);
        }
    }
    if !group_changes.is_empty() {
        let pr = publisher
            .publish(Operation::GroupSync, group_changes, &entry.name, None)
            .await?;
        group_pr_url = Some(pr.pr_url);
    }

    let mut yaml_pr_url = None;
    let mut status = entry.status;
    let mut filename = entry.filename.clone();
    if let Some(generated) = &regenerated {
        let operation = if generated.document.identity.status == IdentityStatus::Active {
            Operation::Provision
        } else {
            Operation::Deactivate
        };
        let pr = publisher
            .publish(
                operation,
                vec![ChangedFile {
                    path: generated.path.clone(),
                    content: generated.content.clone(),
                }],
                &entry.name,
                Some(&generated.document),
            )
            .await?;
        yaml_pr_url = Some(pr.pr_url);
        status = generated.document.identity.status;
        filename = generated.filename.clone();
    }
    drop(publisher);

    if attribute_change || group_pr_url.is_some() {
        state.store.put(UserEntry {
            scim_id: entry.scim_id.clone(),
            name: entry.name.clone(),
            filename: filename.clone(),
            status,
            updated_at: Utc::now(),
        })?;
    }

    info!(user = %user_id, "user updated");

    let mut body = json!({
        "schemas": [SCIM_USER_SCHEMA],
        "id": entry.scim_id,
        "userName": entry.name,
        "displayName": entry.name,
        "active": status == IdentityStatus::Active,
    });
    body[VAULT_EXTENSION_URN] = json!({
        "yaml_file": format!("{IDENTITIES_DIR}/{filename}"),
        "group_pr_url": group_pr_url,
        "yaml_pr_url": yaml_pr_url,
    });

    Ok(scim_response(StatusCode::OK, body))
}

/// `DELETE /scim/v2/Users/{id}`: soft delete. The identity document stays,
/// with `status: deactivated`, and every group membership is removed; the
/// whole change ships as one review request.
async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, BridgeError> {
    info!(user = %user_id, "deactivating user");

    let entry = state
        .store
        .get(&user_id)
        .ok_or_else(|| BridgeError::NotFound(user_id.clone()))?;

    let record = ScimUser::minimal(&user_id, &entry.name, false);
    let generated = state.generator.generate(&record).map_err(map_generator_error)?;

    let publisher = state.publisher.lock().await;
    publisher.refresh().await?;

    let mut files = state.groups.remove_from_all(&entry.name)?;
    files.push(ChangedFile {
        path: generated.path.clone(),
        content: generated.content.clone(),
    });

    let pr = publisher
        .publish(
            Operation::Deactivate,
            files,
            &entry.name,
            Some(&generated.document),
        )
        .await?;
    drop(publisher);

    state.store.put(UserEntry {
        scim_id: entry.scim_id,
        name: entry.name,
        filename: generated.filename,
        status: IdentityStatus::Deactivated,
        updated_at: Utc::now(),
    })?;

    info!(user = %user_id, pr = %pr.pr_url, "user deactivated");

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_start_index", rename = "startIndex")]
    start_index: usize,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_start_index() -> usize {
    1
}

fn default_count() -> usize {
    100
}

/// `GET /scim/v2/Users`: reconciliation listing from the user store.
async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, BridgeError> {
    let start_index = params.start_index.max(1);
    let count = params.count.clamp(1, 1000);

    let all = state.store.list();
    let total_results = all.len();

    let resources: Vec<Value> = all
        .into_iter()
        .skip(start_index - 1)
        .take(count)
        .map(|entry| {
            let mut resource = json!({
                "schemas": [SCIM_USER_SCHEMA],
                "id": entry.scim_id,
                "userName": entry.name,
                "displayName": entry.name,
                "active": entry.status == IdentityStatus::Active,
            });
            resource[VAULT_EXTENSION_URN] = json!({
                "yaml_file": format!("{IDENTITIES_DIR}/{}", entry.filename),
            });
            resource
        })
        .collect();

    info!(
        returned = resources.len(),
        total = total_results,
        "listed users"
    );

    let body = ScimListResponse {
        schemas: vec![SCIM_LIST_SCHEMA.to_string()],
        total_results,
        start_index,
        items_per_page: resources.len(),
        resources,
    };

    Ok(scim_response(
        StatusCode::OK,
        serde_json::to_value(body).context("failed to encode list response")?,
    ))
}

/// What a PATCH body asks for, reduced to the inputs this bridge acts on.
#[derive(Debug, Default, PartialEq)]
struct PatchOutcome {
    desired_groups: Option<Vec<String>>,
    removed_groups: Vec<String>,
    active: Option<bool>,
    title: Option<String>,
    department: Option<String>,
}

fn interpret_patch(patch: &ScimPatch) -> PatchOutcome {
    let mut outcome = PatchOutcome::default();
    for operation in &patch.operations {
        let op = operation.op.to_ascii_lowercase();
        match operation.path.as_deref() {
            Some("groups") => match op.as_str() {
                "add" | "replace" => {
                    outcome.desired_groups = Some(group_displays(operation.value.as_ref()));
                }
                "remove" => outcome
                    .removed_groups
                    .extend(group_displays(operation.value.as_ref())),
                _ => {}
            },
            Some("active") if op == "replace" => {
                if let Some(active) = parse_bool(operation.value.as_ref()) {
                    outcome.active = Some(active);
                }
            }
            Some("title") if op == "replace" || op == "add" => {
                outcome.title = operation
                    .value
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            Some("department") if op == "replace" || op == "add" => {
                outcome.department = operation
                    .value
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            _ => {}
        }
    }
    outcome
}

fn group_displays(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("display").and_then(Value::as_str))
            .map(str::trim)
            .filter(|display| !display.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

// EntraID sends booleans both as JSON bools and as "True"/"False" strings.
fn parse_bool(value: Option<&Value>) -> Option<bool> {
    match value {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn map_generator_error(err: GeneratorError) -> BridgeError {
    match err {
        GeneratorError::MissingName | GeneratorError::Invalid(_) => {
            BridgeError::Validation(err.to_string())
        }
        GeneratorError::Render(_) => BridgeError::Internal(anyhow::Error::new(err)),
    }
}

fn scim_response(status: StatusCode, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(SCIM_CONTENT_TYPE),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(raw: &str) -> ScimPatch {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn patch_with_group_add_sets_desired_groups() {
        let outcome = interpret_patch(&patch(
            r#"{"Operations": [
                {"op": "add", "path": "groups",
                 "value": [{"value": "g-1", "display": "Developers"},
                           {"value": "g-2", "display": "Oncall"}]}
            ]}"#,
        ));
        assert_eq!(
            outcome.desired_groups,
            Some(vec!["Developers".to_string(), "Oncall".to_string()])
        );
        assert!(outcome.removed_groups.is_empty());
    }

    #[test]
    fn patch_with_group_remove_collects_removals() {
        let outcome = interpret_patch(&patch(
            r#"{"Operations": [
                {"op": "remove", "path": "groups",
                 "value": [{"value": "g-1", "display": "Developers"}]}
            ]}"#,
        ));
        assert!(outcome.desired_groups.is_none());
        assert_eq!(outcome.removed_groups, vec!["Developers".to_string()]);
    }

    #[test]
    fn patch_active_replace_parses_bool_and_string_forms() {
        let outcome = interpret_patch(&patch(
            r#"{"Operations": [{"op": "replace", "path": "active", "value": false}]}"#,
        ));
        assert_eq!(outcome.active, Some(false));

        let outcome = interpret_patch(&patch(
            r#"{"Operations": [{"op": "Replace", "path": "active", "value": "False"}]}"#,
        ));
        assert_eq!(outcome.active, Some(false));

        let outcome = interpret_patch(&patch(
            r#"{"Operations": [{"op": "replace", "path": "active", "value": "True"}]}"#,
        ));
        assert_eq!(outcome.active, Some(true));
    }

    #[test]
    fn patch_attribute_replacements_feed_regeneration() {
        let outcome = interpret_patch(&patch(
            r#"{"Operations": [
                {"op": "replace", "path": "title", "value": "Staff Engineer"},
                {"op": "replace", "path": "department", "value": "Core Platform"}
            ]}"#,
        ));
        assert_eq!(outcome.title.as_deref(), Some("Staff Engineer"));
        assert_eq!(outcome.department.as_deref(), Some("Core Platform"));
    }

    #[test]
    fn unrecognized_paths_are_ignored() {
        let outcome = interpret_patch(&patch(
            r#"{"Operations": [
                {"op": "replace", "path": "nickName", "value": "Al"},
                {"op": "remove", "path": "emails"}
            ]}"#,
        ));
        assert_eq!(outcome, PatchOutcome::default());
    }

    #[test]
    fn group_displays_skips_blank_and_missing_names() {
        let value = serde_json::json!([
            {"value": "g-1", "display": "Developers"},
            {"value": "g-2", "display": "  "},
            {"value": "g-3"}
        ]);
        assert_eq!(group_displays(Some(&value)), vec!["Developers".to_string()]);
        assert!(group_displays(None).is_empty());
    }
}
