//! Capture endpoints: start, cancel, delete, list, play

use super::{JsonBody, Loose};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use flvgrab_core::naming::parse_command_text;
use flvgrab_core::relay::FLV_CONTENT_TYPE;
use flvgrab_core::{CancelTarget, StartOutcome};
use flvgrab_types::TaskStatus;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    title: Loose,
    url: Loose,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TextRequest {
    text: Loose,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskRef {
    id: Loose,
    title: Loose,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    page: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<String>,
}

fn start_response(outcome: StartOutcome, started_message: &str) -> Response {
    match outcome {
        StartOutcome::Started(task) => (
            StatusCode::ACCEPTED,
            Json(json!({ "ok": true, "message": started_message, "task": task })),
        )
            .into_response(),
        StartOutcome::AlreadyActive {
            title,
            url,
            task_id,
        } => Json(json!({
            "ok": true,
            "message": "a capture with this title is already running, skipped",
            "task": { "title": title, "url": url },
            "taskId": task_id,
        }))
        .into_response(),
    }
}

/// POST /download
pub async fn start_download(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<DownloadRequest>,
) -> Result<Response, ApiError> {
    let title = body.title.trimmed().unwrap_or_default();
    let url = body.url.trimmed().unwrap_or_default();

    let outcome = state.core.engine.start(title, url).await?;
    Ok(start_response(outcome, "capture started"))
}

/// POST /download/parse
///
/// Accepts the pasted command either as a plain text body or as `{"text": ...}`.
pub async fn start_from_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);

    let text = if is_json {
        let parsed: TextRequest = if body.iter().all(u8::is_ascii_whitespace) {
            TextRequest::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))?
        };
        parsed.text.0.unwrap_or_default()
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };

    if text.trim().is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }

    let parsed = parse_command_text(&text)
        .ok_or_else(|| ApiError::bad_request("no http(s) url found in text"))?;
    info!("Parsed capture request: {} -> {}", parsed.title, parsed.url);

    let outcome = state.core.engine.start(&parsed.title, &parsed.url).await?;
    Ok(start_response(outcome, "parsed and capture started"))
}

/// POST /cancel
pub async fn cancel_download(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<TaskRef>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = match (body.id.trimmed(), body.title.trimmed()) {
        (Some(id), _) => CancelTarget::Id(id.to_string()),
        (None, Some(title)) => CancelTarget::Title(title.to_string()),
        (None, None) => return Err(ApiError::bad_request("id or title is required")),
    };

    let task_id = state.core.engine.cancel(target).await?;
    Ok(Json(json!({
        "ok": true,
        "message": "capture cancelled",
        "taskId": task_id,
    })))
}

/// POST /delete
pub async fn delete_download(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<TaskRef>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = body
        .id
        .trimmed()
        .ok_or_else(|| ApiError::bad_request("id is required"))?;

    state.core.engine.delete_completed(id).await?;
    Ok(Json(json!({ "ok": true, "message": "capture deleted", "id": id })))
}

/// GET /tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status: TaskStatus = query
        .status
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| {
            ApiError::bad_request(
                "status must be one of downloading, completed, cancelled, error, deleted",
            )
        })?;

    let page = parse_number(query.page.as_deref()).unwrap_or(1);
    let page_size = parse_number(query.page_size.as_deref()).unwrap_or(10);

    let result = state
        .core
        .engine
        .db()
        .list_by_status(status, page, page_size)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "items": result.items,
        "total": result.total,
        "page": result.page,
        "pageSize": result.page_size,
    })))
}

fn parse_number(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|s| s.trim().parse().ok())
}

/// GET /play/:id
///
/// Serves a completed capture with byte-range support.
pub async fn play(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Response, ApiError> {
    let task = state
        .core
        .engine
        .db()
        .get_task(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task not found: {}", id)))?;

    let path = match task.file_path {
        Some(path) if task.status == TaskStatus::Completed => path,
        _ => return Err(ApiError::bad_request("task is not completed or its file is missing")),
    };
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::bad_request("task is not completed or its file is missing"));
    }

    let response = ServeFile::new(path)
        .oneshot(req)
        .await
        .unwrap_or_else(|e: Infallible| match e {});

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(FLV_CONTENT_TYPE));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::{body::Body, routing::get, Router};
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    /// Upstream that sends one chunk, then waits for `gate` before finishing
    fn gated_upstream(gate: Arc<Notify>) -> Router {
        Router::new().route(
            "/live.flv",
            get(move || {
                let gate = gate.clone();
                async move {
                    let stream = futures::stream::unfold(0u8, move |step| {
                        let gate = gate.clone();
                        async move {
                            match step {
                                0 => Some((Ok::<_, std::io::Error>(Bytes::from_static(b"FLV\x01")), 1)),
                                1 => {
                                    gate.notified().await;
                                    Some((Ok(Bytes::from_static(b"tail")), 2))
                                }
                                _ => None,
                            }
                        }
                    });
                    Body::from_stream(stream)
                }
            }),
        )
    }

    fn fixed_upstream() -> Router {
        Router::new().route("/live.flv", get(|| async { "FLV\x01payload" }))
    }

    async fn wait_for(app: &Router, status: &str, total: u64) -> Value {
        for _ in 0..100 {
            let (code, body) = send(app, get_req(&format!("/tasks?status={}", status))).await;
            assert_eq!(code, 200);
            if body["total"] == json!(total) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("never reached {} {} task(s)", total, status);
    }

    #[tokio::test]
    async fn test_download_end_to_end() {
        let (_dir, _state, app) = app().await;
        let gate = Arc::new(Notify::new());
        let upstream = serve(gated_upstream(gate.clone())).await;

        let (code, body) = send(
            &app,
            post_json(
                "/download",
                json!({ "title": "e2e", "url": format!("{}/live.flv", upstream) }),
            ),
        )
        .await;
        assert_eq!(code, 202);
        assert_eq!(body["ok"], json!(true));
        let id = body["task"]["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("e2e"));
        assert!(body["task"]["filename"].as_str().unwrap().ends_with(".flv"));

        let listed = wait_for(&app, "downloading", 1).await;
        assert_eq!(listed["items"][0]["id"], json!(id));
        assert_eq!(listed["page"], json!(1));
        assert_eq!(listed["pageSize"], json!(10));

        gate.notify_one();

        let listed = wait_for(&app, "completed", 1).await;
        let path = listed["items"][0]["file_path"].as_str().unwrap();
        let content = tokio::fs::read(path).await.unwrap();
        assert_eq!(content, b"FLV\x01tail");
        wait_for(&app, "downloading", 0).await;
    }

    #[tokio::test]
    async fn test_download_rejects_bad_input() {
        let (_dir, _state, app) = app().await;

        let (code, body) = send(&app, post_json("/download", json!({ "title": "x" }))).await;
        assert_eq!(code, 400);
        assert_eq!(body["ok"], json!(false));

        let (code, _) = send(
            &app,
            post_json("/download", json!({ "title": "x", "url": "rtmp://host/live/a" })),
        )
        .await;
        assert_eq!(code, 400);

        let (code, _) = send(
            &app,
            post_json("/download", json!({ "title": "///", "url": "http://host/a.flv" })),
        )
        .await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_dedup_and_cancel() {
        let (_dir, _state, app) = app().await;
        let gate = Arc::new(Notify::new());
        let upstream = serve(gated_upstream(gate)).await;
        let url = format!("{}/live.flv", upstream);

        let (code, first) =
            send(&app, post_json("/download", json!({ "title": "dup", "url": url }))).await;
        assert_eq!(code, 202);
        let id = first["task"]["id"].as_str().unwrap().to_string();

        let (code, second) =
            send(&app, post_json("/download", json!({ "title": "dup", "url": url }))).await;
        assert_eq!(code, 200);
        assert_eq!(second["task"]["title"], json!("dup"));
        assert_eq!(second["taskId"], json!(id));
        wait_for(&app, "downloading", 1).await;

        let (code, body) = send(&app, post_json("/cancel", json!({ "title": "dup" }))).await;
        assert_eq!(code, 200);
        assert_eq!(body["taskId"], json!(id));
        wait_for(&app, "cancelled", 1).await;

        let (code, _) = send(&app, post_json("/cancel", json!({ "title": "dup" }))).await;
        assert_eq!(code, 404);
        let (code, _) = send(&app, post_json("/cancel", json!({ "id": id }))).await;
        assert_eq!(code, 400);
        let (code, _) = send(&app, post_json("/cancel", json!({ "id": "missing" }))).await;
        assert_eq!(code, 404);
        let (code, _) = send(&app, post_json("/cancel", json!({}))).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_start_from_text() {
        let (_dir, _state, app) = app().await;
        let upstream = serve(fixed_upstream()).await;

        let text = format!(
            "Night Show ffmpeg -i \"{}/live.flv\" -c copy ./NightShow20240101.flv",
            upstream
        );
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/download/parse")
            .header("content-type", "text/plain")
            .body(Body::from(text))
            .unwrap();
        let (code, body) = send(&app, req).await;
        assert_eq!(code, 202);
        assert_eq!(body["task"]["title"], json!("Night Show"));

        let (code, body) = send(
            &app,
            post_json("/download/parse", json!({ "text": format!("{}/b.flv", upstream) })),
        )
        .await;
        assert_eq!(code, 202);
        assert_eq!(body["task"]["title"], json!("b"));

        let (code, _) = send(
            &app,
            post_json("/download/parse", json!({ "text": "no link here" })),
        )
        .await;
        assert_eq!(code, 400);
        let (code, _) = send(&app, post_json("/download/parse", json!({}))).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_play_and_delete() {
        let (_dir, _state, app) = app().await;
        let upstream = serve(fixed_upstream()).await;

        let (code, body) = send(
            &app,
            post_json(
                "/download",
                json!({ "title": "clip", "url": format!("{}/live.flv", upstream) }),
            ),
        )
        .await;
        assert_eq!(code, 202);
        let id = body["task"]["id"].as_str().unwrap().to_string();
        wait_for(&app, "completed", 1).await;

        let req = axum::http::Request::builder()
            .uri(format!("/play/{}", id))
            .header("range", "bytes=0-3")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), 206);
        assert_eq!(response.headers()["content-type"], "video/x-flv");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"FLV\x01");

        let (code, _) = send(&app, get_req("/play/nope")).await;
        assert_eq!(code, 404);

        let (code, body) = send(&app, post_json("/delete", json!({ "id": id }))).await;
        assert_eq!(code, 200);
        assert_eq!(body["id"], json!(id));
        let (code, _) = send(&app, post_json("/delete", json!({ "id": id }))).await;
        assert_eq!(code, 400);
        let (code, _) = send(&app, post_json("/delete", json!({ "id": "nope" }))).await;
        assert_eq!(code, 404);
        let (code, _) = send(&app, post_json("/delete", json!({}))).await;
        assert_eq!(code, 400);

        let (code, _) = send(&app, get_req(&format!("/play/{}", id))).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_status() {
        let (_dir, _state, app) = app().await;
        let (code, body) = send(&app, get_req("/tasks?status=bogus")).await;
        assert_eq!(code, 400);
        assert_eq!(body["ok"], json!(false));

        let (code, _) = send(&app, get_req("/tasks")).await;
        assert_eq!(code, 400);

        let (code, body) = send(&app, get_req("/tasks?status=completed&page=x&pageSize=5")).await;
        assert_eq!(code, 200);
        assert_eq!(body["page"], json!(1));
        assert_eq!(body["pageSize"], json!(5));
        assert_eq!(body["total"], json!(0));
    }
}
