//! HTTP(S)-FLV passthrough with reconnect and backoff

use crate::error::GrabError;
use crate::naming::{classify_scheme, normalize_url, toggle_scheme, Scheme};
use crate::relay::{channel, ChunkSender, RelaySession, RetryPolicy};
use crate::BROWSER_USER_AGENT;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{redirect, Client};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-attempt timeouts for the upstream connection
#[derive(Debug, Clone, Copy)]
pub struct RelayTimeouts {
    pub header: Duration,
    pub idle: Duration,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            header: Duration::from_secs(2 * 60),
            idle: Duration::from_secs(2 * 60),
        }
    }
}

/// Relays a remote HTTP(S) stream to a local client
#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    policy: RetryPolicy,
    timeouts: RelayTimeouts,
    /// Ends every relay when the server shuts down
    shutdown: CancellationToken,
}

/// Why a single upstream attempt stopped without an error
enum AttemptEnd {
    /// Upstream finished the body
    Finished,
    /// Receiver dropped
    ClientGone,
    /// Server is shutting down
    Shutdown,
}

impl HttpRelay {
    pub fn new() -> Result<Self, GrabError> {
        Self::with_policy(RetryPolicy::default(), RelayTimeouts::default())
    }

    pub fn with_policy(policy: RetryPolicy, timeouts: RelayTimeouts) -> Result<Self, GrabError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .redirect(redirect::Policy::limited(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            policy,
            timeouts,
            shutdown: CancellationToken::new(),
        })
    }

    /// Stop relaying once `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Start relaying `url`. Resolves once the first chunk arrives or every
    /// attempt has failed.
    pub async fn open(&self, url: &str) -> Result<RelaySession, GrabError> {
        let url = normalize_url(url);
        if url.is_empty() {
            return Err(GrabError::InvalidInput("url is required".to_string()));
        }
        if classify_scheme(&url) != Scheme::Http {
            return Err(GrabError::InvalidUrl(format!("not an http(s) url: {}", url)));
        }

        let (tx, rx) = channel();
        let relay = self.clone();
        tokio::spawn(async move {
            relay.pump(url, tx).await;
        });

        RelaySession::establish(rx).await
    }

    /// Worker loop: connect, forward, reconnect until the budget runs out
    async fn pump(&self, url: String, tx: ChunkSender) {
        let mut current = url;
        let mut failures: u32 = 0;
        let mut toggled = false;
        let mut sent_any = false;

        loop {
            let err = match self.attempt(&current, &tx, &mut sent_any).await {
                Ok(AttemptEnd::Finished) => {
                    debug!("Upstream {} ended", current);
                    return;
                }
                Ok(AttemptEnd::ClientGone) => {
                    debug!("Client left relay of {}", current);
                    return;
                }
                Ok(AttemptEnd::Shutdown) => {
                    debug!("Relay of {} stopped for shutdown", current);
                    return;
                }
                Err(e) => e,
            };

            if failures == 0 && !toggled && !sent_any && err.is_scheme_mismatch() {
                let alt = toggle_scheme(&current);
                if alt != current {
                    warn!("Relay of {} failed ({}), switching to {}", current, err, alt);
                    toggled = true;
                    current = alt;
                    continue;
                }
            }

            failures += 1;
            if !self.policy.allows_another(failures) {
                warn!("Relay of {} gave up after {} attempts: {}", current, failures, err);
                if !sent_any {
                    let message = format!("relay failed after {} attempts: {}", failures, err);
                    let _ = tx.send(Err(GrabError::Relay(message))).await;
                }
                return;
            }

            let delay = self.policy.delay_after(failures);
            info!(
                "Relay of {} failed ({}), retrying in {}ms",
                current,
                err,
                delay.as_millis()
            );
            tokio::select! {
                _ = tx.closed() => return,
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One upstream connection, forwarding chunks until it ends
    async fn attempt(
        &self,
        url: &str,
        tx: &ChunkSender,
        sent_any: &mut bool,
    ) -> Result<AttemptEnd, GrabError> {
        let response = tokio::select! {
            _ = tx.closed() => return Ok(AttemptEnd::ClientGone),
            _ = self.shutdown.cancelled() => return Ok(AttemptEnd::Shutdown),
            result = tokio::time::timeout(self.timeouts.header, self.client.get(url).send()) => {
                match result {
                    Err(_) => return Err(GrabError::Timeout("upstream sent no headers".to_string())),
                    Ok(r) => r?,
                }
            }
        };

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(GrabError::ServerError {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }

        let mut stream = response.bytes_stream();
        loop {
            tokio::select! {
                _ = tx.closed() => return Ok(AttemptEnd::ClientGone),
                _ = self.shutdown.cancelled() => return Ok(AttemptEnd::Shutdown),
                next = tokio::time::timeout(self.timeouts.idle, stream.next()) => match next {
                    Err(_) => return Err(GrabError::Timeout("upstream went quiet".to_string())),
                    Ok(None) => return Ok(AttemptEnd::Finished),
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(Some(Ok(chunk))) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Ok(AttemptEnd::ClientGone);
                        }
                        *sent_any = true;
                    }
                }
            }
        }
    }
}
