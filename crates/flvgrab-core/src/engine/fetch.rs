//! Streaming fetch-to-disk for a single capture
//!
//! Opens one GET against the source and copies the body into an already
//! created file until the source ends, fails, or the capture is cancelled.

use crate::error::GrabError;
use crate::naming::toggle_scheme;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeouts applied to a capture
#[derive(Debug, Clone, Copy)]
pub struct FetchTimeouts {
    /// Time allowed until response headers arrive
    pub header: Duration,
    /// Longest gap allowed between two body chunks
    pub idle: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            header: Duration::from_secs(5 * 60),
            idle: Duration::from_secs(5 * 60),
        }
    }
}

/// How a fetch ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Source ended; `bytes` were written
    Completed { bytes: u64 },
    /// Cancellation token fired
    Cancelled,
}

/// Copy `url` into `file`.
///
/// A request failure that looks like a wrong http/https guess is retried
/// exactly once with the other scheme. The file handle is dropped before
/// this returns.
pub async fn fetch_to_file(
    client: &Client,
    url: &str,
    mut file: File,
    cancel: &CancellationToken,
    timeouts: FetchTimeouts,
) -> Result<FetchOutcome, GrabError> {
    let response = match send(client, url, cancel, timeouts.header).await {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(FetchOutcome::Cancelled),
        Err(e) if e.is_scheme_mismatch() => {
            let alt = toggle_scheme(url);
            if alt == url {
                return Err(e);
            }
            warn!("Request to {} failed ({}), retrying as {}", url, e, alt);
            match send(client, &alt, cancel, timeouts.header).await? {
                Some(r) => r,
                None => return Ok(FetchOutcome::Cancelled),
            }
        }
        Err(e) => return Err(e),
    };

    let status = response.status();
    if !(status.is_success() || status.is_redirection()) {
        return Err(GrabError::ServerError {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
        });
    }

    info!("Capturing {} (status {})", response.url(), status);

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Capture of {} cancelled after {} bytes", url, written);
                return Ok(FetchOutcome::Cancelled);
            }
            next = tokio::time::timeout(timeouts.idle, stream.next()) => {
                match next {
                    Err(_) => {
                        return Err(GrabError::Timeout(format!(
                            "no data from source for {}s",
                            timeouts.idle.as_secs()
                        )));
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(Some(Ok(chunk))) => {
                        file.write_all(&chunk).await?;
                        written += chunk.len() as u64;
                    }
                }
            }
        }
    }

    file.flush().await?;
    Ok(FetchOutcome::Completed { bytes: written })
}

/// Send the request; `Ok(None)` means cancelled while waiting for headers
async fn send(
    client: &Client,
    url: &str,
    cancel: &CancellationToken,
    header_timeout: Duration,
) -> Result<Option<reqwest::Response>, GrabError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = tokio::time::timeout(header_timeout, client.get(url).send()) => match result {
            Err(_) => Err(GrabError::Timeout(format!(
                "no response headers within {}s",
                header_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(response)) => Ok(Some(response)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_writes_body() {
        let base = serve(Router::new().route("/a.flv", get(|| async { "FLV-BYTES" }))).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        let file = File::create(&path).await.unwrap();

        let outcome = fetch_to_file(
            &Client::new(),
            &format!("{}/a.flv", base),
            file,
            &CancellationToken::new(),
            FetchTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Completed { bytes: 9 });
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"FLV-BYTES");
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status() {
        let base = serve(Router::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("x.flv")).await.unwrap();

        let err = fetch_to_file(
            &Client::new(),
            &format!("{}/missing.flv", base),
            file,
            &CancellationToken::new(),
            FetchTimeouts::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, GrabError::ServerError { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fetch_toggles_scheme_once() {
        let base = serve(Router::new().route("/a.flv", get(|| async { "ok" }))).await;
        let https = base.replacen("http://", "https://", 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        let file = File::create(&path).await.unwrap();

        let outcome = fetch_to_file(
            &Client::new(),
            &format!("{}/a.flv", https),
            file,
            &CancellationToken::new(),
            FetchTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Completed { bytes: 2 });
    }

    #[tokio::test]
    async fn test_fetch_honours_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("x.flv")).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fetch_to_file(
            &Client::new(),
            "http://127.0.0.1:9/never.flv",
            file,
            &cancel,
            FetchTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Cancelled);
    }
}
