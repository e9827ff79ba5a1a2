//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::get,
    extract::{State, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tokio::sync::Notify;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::PostAction;
use crate::engine::inference::FaceModels;
use crate::engine::registry::{ModelLoader, ModelSet, ModelState};
use crate::service::pipeline::DetectionPipeline;
use crate::service::types::{DetectionMode, FaceRecord};
use crate::utils::error::FaceError;

use super::dto::*;

/// Application state shared across handlers
pub struct AppState<L: ModelLoader> {
    pub pipeline: Arc<DetectionPipeline<L>>,
    pub post_action: PostAction,
    /// Fired when a `POST /` asks the process to restart
    pub restart: Arc<Notify>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router<L>(state: Arc<AppState<L>>) -> Router
where
    L: ModelLoader,
    ModelSet<L::Model>: FaceModels,
{
    Router::new()
        .route("/", get(detect_handler::<L>).post(unsupported_handler::<L>))
        .route("/health", get(health_handler::<L>))
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Detect faces in the image at `url`
async fn detect_handler<L>(
    State(state): State<Arc<AppState<L>>>,
    Query(query): Query<DetectQuery>,
) -> Result<Json<Vec<FaceRecord>>, FaceError>
where
    L: ModelLoader,
    ModelSet<L::Model>: FaceModels,
{
    let url = query
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or(FaceError::MissingUrl)?;
    let mode = DetectionMode::from_query(query.reco.as_deref());

    let records = state.pipeline.detect(url, mode).await?;
    Ok(Json(records))
}

/// `POST /` is not part of the API
async fn unsupported_handler<L: ModelLoader>(
    State(state): State<Arc<AppState<L>>>,
) -> Response {
    match state.post_action {
        PostAction::Reject => FaceError::UnsupportedOperation.into_response(),
        PostAction::Restart => {
            error!("Unsupported POST request, restarting");
            state.restart.notify_one();
            (StatusCode::INTERNAL_SERVER_ERROR, "RESTART").into_response()
        }
    }
}

/// Health check
async fn health_handler<L>(
    State(state): State<Arc<AppState<L>>>,
) -> Json<HealthResponse>
where
    L: ModelLoader,
    ModelSet<L::Model>: FaceModels,
{
    let registry = state.pipeline.registry();
    let status = registry.status();

    Json(HealthResponse {
        healthy: status.iter().all(|(_, s)| *s != ModelState::Failed),
        ready: registry.is_ready(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        models: status
            .into_iter()
            .map(|(kind, s)| (kind.as_str().to_string(), s))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use crate::engine::embedder::DESCRIPTOR_LEN;
    use crate::engine::registry::tests::all_sources;
    use crate::service::pipeline::tests::{image_server, pipeline_with, FakeLoader};

    fn app(post_action: PostAction) -> (Router, Arc<AppState<FakeLoader>>) {
        let state = Arc::new(AppState {
            pipeline: Arc::new(pipeline_with(FakeLoader::new(1), all_sources())),
            post_action,
            restart: Arc::new(Notify::new()),
            start_time: Instant::now(),
        });
        (create_rest_router(state.clone()), state)
    }

    async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_url_is_400_without_loading() {
        let (router, state) = app(PostAction::Reject);

        let (status, body) = send(router.clone(), Method::GET, "/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "no url");

        let (status, _) = send(router, Method::GET, "/?url=&reco=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(state.pipeline.registry().loader().calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_404() {
        let (router, _) = app(PostAction::Reject);
        let (status, body) = send(router, Method::GET, "/?url=http://127.0.0.1:9/x.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "no data by http://127.0.0.1:9/x.jpg");
    }

    #[tokio::test]
    async fn test_attributes_response() {
        let base = image_server().await;
        let (router, _) = app(PostAction::Reject);

        let (status, body) = send(router, Method::GET, &format!("/?url={}/face.png", base)).await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        let faces = value.as_array().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0]["gender"], "male");
        assert!(faces[0]["age"].is_number());
        assert!(faces[0]["genderProbability"].is_number());
    }

    #[tokio::test]
    async fn test_descriptor_response() {
        let base = image_server().await;
        let (router, _) = app(PostAction::Reject);

        let (status, body) =
            send(router, Method::GET, &format!("/?url={}/face.png&reco=1", base)).await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        let descriptor = value[0].as_array().unwrap();
        assert_eq!(descriptor.len(), DESCRIPTOR_LEN);
        assert!(descriptor.iter().all(|v| v.is_number()));
    }

    #[tokio::test]
    async fn test_post_rejected() {
        let (router, _) = app(PostAction::Reject);
        let (status, _) = send(router, Method::POST, "/").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_post_requests_restart() {
        let (router, state) = app(PostAction::Restart);
        let (status, body) = send(router, Method::POST, "/?url=http://host/a.jpg").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "RESTART");

        tokio::time::timeout(Duration::from_secs(1), state.restart.notified())
            .await
            .expect("restart was not signalled");
    }

    #[tokio::test]
    async fn test_health_reports_model_states() {
        let (router, _) = app(PostAction::Reject);
        let (status, body) = send(router, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["healthy"], true);
        assert_eq!(value["ready"], false);
        assert_eq!(value["models"]["tiny_face_detector"], "unloaded");
        assert_eq!(value["models"]["face_recognition"], "unloaded");
    }
}
