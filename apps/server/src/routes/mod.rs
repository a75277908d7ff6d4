//! HTTP API
//!
//! JSON endpoints for captures and the catalog, plus the streaming relay and
//! playback endpoints. Every request runs inside a span tagged with a fresh
//! request id.

mod catalog;
mod proxy;
mod tasks;

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Build the application router
pub fn router(state: AppState, public_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::RANGE]);

    let mut app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        // Captures
        .route("/download", post(tasks::start_download))
        .route("/download/parse", post(tasks::start_from_text))
        .route("/cancel", post(tasks::cancel_download))
        .route("/delete", post(tasks::delete_download))
        .route("/tasks", get(tasks::list_tasks))
        .route("/play/:id", get(tasks::play))
        // Live relays
        .route("/proxy", get(proxy::proxy_http))
        .route("/proxy-rtmp", get(proxy::proxy_rtmp))
        // Catalog
        .route("/platforms", get(catalog::list_platforms))
        .route("/platforms/sync", post(catalog::sync_platforms))
        .route("/explore/platforms", get(catalog::explore_platforms))
        .route("/explore/channel", get(catalog::explore_channel))
        .route("/platform/:address/favorite", post(catalog::platform_favorite))
        .route("/platform/:address/blocked", post(catalog::platform_blocked))
        .route("/channel/favorite", post(catalog::channel_favorite))
        .route("/channel/blocked", post(catalog::channel_blocked))
        .route("/channels/favorites", get(catalog::channel_favorites))
        .route("/channels/blocked", get(catalog::channels_blocked))
        // Settings
        .route(
            "/config/explore_base_url",
            get(catalog::get_explore_base_url).post(catalog::set_explore_base_url),
        )
        .route(
            "/config/poll_interval_minutes",
            get(catalog::get_poll_interval).post(catalog::set_poll_interval),
        );

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(request_span))
        .layer(cors)
        .with_state(state)
}

/// Wrap each request in a span carrying a request id, and log its completion
async fn request_span(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "request",
        id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let started = Instant::now();
        let mut response = next.run(req).await;
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
    .instrument(span)
    .await
}

// ============================================================================
// Request helpers
// ============================================================================

/// JSON body that tolerates a missing or empty body and answers malformed
/// JSON with a 400 in the usual `{ok, message}` shape
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }

        serde_json::from_slice(&body)
            .map(Self)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
    }
}

/// A boolean flag that accepts `1`, `"1"`, `true` (and `"true"`) as set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flag(pub bool);

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let set = match value {
            serde_json::Value::Bool(b) => b,
            serde_json::Value::Number(n) => n.as_i64() == Some(1),
            serde_json::Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Ok(Flag(set))
    }
}

/// Loose string field: strings pass through, numbers are stringified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loose(pub Option<String>);

impl<'de> Deserialize<'de> for Loose {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Loose(match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }))
    }
}

impl Loose {
    /// Trimmed value, `None` when blank
    pub fn trimmed(&self) -> Option<&str> {
        self.0.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use flvgrab_core::{CoreConfig, GrabCore};
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn app() -> (tempfile::TempDir, AppState, Router) {
        app_with_directory("http://127.0.0.1:9/".to_string()).await
    }

    pub async fn app_with_directory(base: String) -> (tempfile::TempDir, AppState, Router) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.default_explore_base_url = base;
        config.ffmpeg_path = PathBuf::from("/nonexistent/flvgrab-ffmpeg");
        let core = GrabCore::new(config).await.unwrap();
        let state = AppState::new(core);
        let app = router(state.clone(), None);
        (dir, state, app)
    }

    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub async fn send(app: &Router, req: Request) -> (u16, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status().as_u16();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    pub fn post_json(uri: &str, body: Value) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get_req(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }
}
