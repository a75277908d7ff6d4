//! Live relay endpoints

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use flvgrab_core::relay::FLV_CONTENT_TYPE;
use flvgrab_core::{GrabError, RelaySession};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    url: Option<String>,
}

impl ProxyQuery {
    fn required_url(&self) -> Result<&str, ApiError> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::bad_request("url is required"))
    }
}

/// GET /proxy?url=
pub async fn proxy_http(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let url = query.required_url()?;
    let session = state
        .core
        .http_relay
        .open(url)
        .await
        .map_err(|e| relay_failure(url, e, StatusCode::BAD_GATEWAY))?;
    Ok(flv_response(session))
}

/// GET /proxy-rtmp?url=
pub async fn proxy_rtmp(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let url = query.required_url()?;
    let session = state
        .core
        .rtmp_relay
        .open(url)
        .await
        .map_err(|e| relay_failure(url, e, StatusCode::INTERNAL_SERVER_ERROR))?;
    Ok(flv_response(session))
}

fn relay_failure(url: &str, err: GrabError, status: StatusCode) -> ApiError {
    if err.is_client_error() {
        return ApiError::bad_request(err.to_string());
    }
    warn!("Relay of {} failed before any data: {}", url, err);
    ApiError::new(status, err.to_string())
}

fn flv_response(session: RelaySession) -> Response {
    let mut response = Response::new(Body::from_stream(session.into_stream()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FLV_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
