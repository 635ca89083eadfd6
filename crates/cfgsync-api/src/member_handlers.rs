//! Member handlers: the push endpoint the locator calls on deploy.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cfgsync_core::ArtifactPayload;
use tracing::warn;

use crate::MemberState;

/// POST /member/v1/artifacts
///
/// `200` with the loaded [`cfgsync_core::ArtifactRecord`], or `422` with
/// the [`cfgsync_core::ApplyFailure`] describing why it was not applied.
pub async fn apply_artifact(
    State(state): State<MemberState>,
    Json(payload): Json<ArtifactPayload>,
) -> Response {
    let agent = state.agent.clone();
    let applied = tokio::task::spawn_blocking(move || agent.apply_artifact(payload)).await;
    match applied {
        Ok(Ok(artifact)) => Json(artifact).into_response(),
        Ok(Err(failure)) => {
            warn!(%failure, "rejected pushed artifact");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(failure)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// GET /member/v1/artifacts
pub async fn list_artifacts(State(state): State<MemberState>) -> impl IntoResponse {
    Json(state.agent.loaded_artifacts())
}

/// GET /member/v1/ping
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use cfgsync_core::{ApplyFailure, ArtifactRecord, sha256_hex};
    use cfgsync_member::MemberAgent;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::member_router;

    fn push(payload: &ArtifactPayload) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/member/v1/artifacts")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload).unwrap()))
            .unwrap()
    }

    fn payload(content: &[u8]) -> ArtifactPayload {
        ArtifactPayload {
            artifact: ArtifactRecord {
                record_name: "cluster".into(),
                base_name: "cluster.jar".into(),
                version: 1,
                sha256: sha256_hex(b"good"),
                size_bytes: 4,
            },
            content: content.to_vec(),
        }
    }

    #[tokio::test]
    async fn push_installs_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(MemberAgent::open(dir.path(), "").unwrap());
        let router = member_router(agent.clone());

        let resp = router.clone().oneshot(push(&payload(b"good"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(agent.find_loaded("cluster.jar").is_some());

        let req = Request::builder().uri("/member/v1/artifacts").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let loaded: Vec<ArtifactRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_push_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let router = member_router(Arc::new(MemberAgent::open(dir.path(), "").unwrap()));

        let resp = router.oneshot(push(&payload(b"evil"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let failure: ApplyFailure = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(failure, ApplyFailure::CorruptArtifact { .. }));
    }

    #[tokio::test]
    async fn ping_answers_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = member_router(Arc::new(MemberAgent::open(dir.path(), "").unwrap()));

        let req = Request::builder().uri("/member/v1/ping").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
