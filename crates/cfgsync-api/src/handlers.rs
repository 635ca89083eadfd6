//! Locator handlers.
//!
//! Operator commands answer with a [`CommandResult`]; the HTTP status
//! mirrors its OK/ERROR outcome.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use cfgsync_archive::ArchiveError;
use cfgsync_core::{ApplyReport, CommandResult};
use cfgsync_coordinator::CoordinatorError;
use cfgsync_store::StoreError;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::client::HttpMemberLink;
use crate::{ApiState, JoinRequest};

fn command(status: StatusCode, result: CommandResult) -> Response {
    (status, Json(result)).into_response()
}

fn error_response(e: &CoordinatorError) -> Response {
    let status = match e {
        CoordinatorError::Conflict { .. } => StatusCode::CONFLICT,
        CoordinatorError::NoMembersAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::Archive(ArchiveError::CorruptArchive(_)) => StatusCode::BAD_REQUEST,
        CoordinatorError::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
        CoordinatorError::Store(StoreError::NotFound(_)) | CoordinatorError::UnknownMember(_) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut result = CommandResult::error(e.to_string());
    if let CoordinatorError::NoMembersAvailable { artifact } = e {
        result = result.with_data(json!({ "artifact": artifact }));
    }
    command(status, result)
}

// ── Deploy ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    /// Artifact base name, e.g. `cluster.jar`.
    pub name: String,
    /// Target group; the cluster record when absent.
    pub group: Option<String>,
}

/// POST /api/v1/deploy
pub async fn deploy(
    State(state): State<ApiState>,
    Query(query): Query<DeployQuery>,
    body: Bytes,
) -> Response {
    let target = query.group.as_deref();
    match state.coordinator.on_deploy(target, &body, &query.name).await {
        Ok(result) if result.failures.is_empty() => command(
            StatusCode::OK,
            CommandResult::ok(format!(
                "deployed {} to {} member(s)",
                result.artifact.stored_file_name(),
                result.affected_member_count
            ))
            .with_data(json!(result)),
        ),
        Ok(result) => command(
            StatusCode::BAD_GATEWAY,
            CommandResult::error(format!(
                "deployed {} to {} member(s); {} member(s) failed to apply it",
                result.artifact.stored_file_name(),
                result.affected_member_count,
                result.failures.len()
            ))
            .with_data(json!(result)),
        ),
        Err(e) => {
            warn!(artifact = %query.name, group = ?target, error = %e, "deploy failed");
            error_response(&e)
        }
    }
}

/// DELETE /api/v1/deploy
pub async fn undeploy(State(state): State<ApiState>, Query(query): Query<DeployQuery>) -> Response {
    match state
        .coordinator
        .on_undeploy(query.group.as_deref(), &query.name)
        .await
    {
        Ok(removed) if removed.is_empty() => command(
            StatusCode::NOT_FOUND,
            CommandResult::error(format!("{} is not deployed", query.name)),
        ),
        Ok(removed) => command(
            StatusCode::OK,
            CommandResult::ok(format!("undeployed {} version(s) of {}", removed.len(), query.name))
                .with_data(json!({ "removed": removed })),
        ),
        Err(e) => error_response(&e),
    }
}

// ── Import / export ────────────────────────────────────────────

/// POST /api/v1/import
pub async fn import(State(state): State<ApiState>, body: Bytes) -> Response {
    match state.coordinator.on_import(&body).await {
        Ok(result) => command(
            StatusCode::OK,
            CommandResult::ok(format!(
                "imported {} configuration record(s); previous configuration saved to {}",
                result.records.len(),
                result.backup_dir.display()
            ))
            .with_data(json!(result)),
        ),
        Err(e) => {
            warn!(error = %e, "import failed");
            error_response(&e)
        }
    }
}

/// GET /api/v1/export
pub async fn export(State(state): State<ApiState>) -> Response {
    match state.coordinator.on_export().await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"cluster_config.zip\"",
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Configurations ─────────────────────────────────────────────

/// GET /api/v1/configurations
pub async fn list_configurations(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.coordinator.store().list_names())
}

/// GET /api/v1/configurations/{name}
pub async fn get_configuration(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.coordinator.store().get(&name) {
        Some(record) => Json(record.as_ref().clone()).into_response(),
        None => command(
            StatusCode::NOT_FOUND,
            CommandResult::error(format!("no configuration named {name}")),
        ),
    }
}

// ── Members ────────────────────────────────────────────────────

/// GET /api/v1/members
pub async fn list_members(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.coordinator.members())
}

/// POST /api/v1/members
pub async fn join(State(state): State<ApiState>, Json(req): Json<JoinRequest>) -> Response {
    let link = match HttpMemberLink::new(&req.endpoint) {
        Ok(link) => Arc::new(link),
        Err(e) => {
            return command(
                StatusCode::BAD_REQUEST,
                CommandResult::error(format!("invalid member endpoint: {e:#}")),
            );
        }
    };
    match state.coordinator.on_member_join(&req.groups, link).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/members/{id}/ack
pub async fn ack(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<ApplyReport>,
) -> Response {
    match state.coordinator.on_member_ack(&id, &report) {
        Ok(session_state) => command(
            StatusCode::OK,
            CommandResult::ok(format!("member {id} is {session_state}"))
                .with_data(json!({ "state": session_state })),
        ),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/members/{id}
pub async fn leave(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    if state.coordinator.on_member_leave(&id) {
        command(StatusCode::OK, CommandResult::ok(format!("member {id} left")))
    } else {
        error_response(&CoordinatorError::UnknownMember(id))
    }
}
