//! cfgsync-api: HTTP contract between operators, the locator and members.
//!
//! # Locator routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/deploy?name=&group=` | Deploy the request body as an artifact |
//! | DELETE | `/api/v1/deploy?name=&group=` | Undeploy an artifact |
//! | POST | `/api/v1/import` | Replace the store with a zip archive |
//! | GET | `/api/v1/export` | Download the store as a zip archive |
//! | GET | `/api/v1/configurations` | List record names |
//! | GET | `/api/v1/configurations/{name}` | Get one record |
//! | GET | `/api/v1/members` | List member sessions |
//! | POST | `/api/v1/members` | Join: returns the member's bundle |
//! | POST | `/api/v1/members/{id}/ack` | Report the outcome of applying the bundle |
//! | DELETE | `/api/v1/members/{id}` | Leave |
//!
//! # Member routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/member/v1/artifacts` | Install one pushed artifact |
//! | GET | `/member/v1/artifacts` | List loaded artifacts |
//! | GET | `/member/v1/ping` | Liveness check used before import |

pub mod client;
pub mod handlers;
pub mod member_handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use cfgsync_coordinator::ConfigCoordinator;
use cfgsync_member::MemberAgent;
use serde::{Deserialize, Serialize};

pub use client::{HttpMemberLink, LocatorClient};

/// Upper bound on artifact and archive uploads.
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Body of `POST /api/v1/members`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Comma-separated group names.
    #[serde(default)]
    pub groups: String,
    /// Base URL the locator pushes artifacts to, e.g. `http://10.0.0.5:7071`.
    pub endpoint: String,
}

/// Shared state for locator handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<ConfigCoordinator>,
}

/// Shared state for member handlers.
#[derive(Clone)]
pub struct MemberState {
    pub agent: Arc<MemberAgent>,
}

/// Build the locator router.
pub fn build_router(coordinator: Arc<ConfigCoordinator>) -> Router {
    let state = ApiState { coordinator };

    let api_routes = Router::new()
        .route("/deploy", post(handlers::deploy).delete(handlers::undeploy))
        .route("/import", post(handlers::import))
        .route("/export", get(handlers::export))
        .route("/configurations", get(handlers::list_configurations))
        .route("/configurations/{name}", get(handlers::get_configuration))
        .route("/members", get(handlers::list_members).post(handlers::join))
        .route("/members/{id}", axum::routing::delete(handlers::leave))
        .route("/members/{id}/ack", post(handlers::ack))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

/// Build the router a member serves for locator pushes.
pub fn member_router(agent: Arc<MemberAgent>) -> Router {
    let state = MemberState { agent };

    let routes = Router::new()
        .route(
            "/artifacts",
            get(member_handlers::list_artifacts).post(member_handlers::apply_artifact),
        )
        .route("/ping", get(member_handlers::ping))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    Router::new().nest("/member/v1", routes)
}
