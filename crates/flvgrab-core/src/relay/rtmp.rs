//! RTMP → HTTP-FLV relay through an ffmpeg child process

use crate::error::GrabError;
use crate::naming::{classify_scheme, normalize_url, Scheme};
use crate::relay::{channel, ChunkSender, RelaySession};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remuxes an RTMP source to FLV on stdout
#[derive(Debug, Clone)]
pub struct RtmpRelay {
    ffmpeg_path: PathBuf,
    /// How long ffmpeg gets to exit after an interrupt before it is killed
    shutdown_grace: Duration,
    /// Stops every running ffmpeg when the server shuts down
    shutdown: CancellationToken,
}

impl RtmpRelay {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            shutdown_grace: Duration::from_secs(5),
            shutdown: CancellationToken::new(),
        }
    }

    /// Interrupt ffmpeg once `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// ffmpeg arguments for a low-latency copy of `url` to FLV on stdout
    pub fn build_args(url: &str) -> Vec<String> {
        [
            "-loglevel",
            "error",
            "-rtmp_transport",
            "tcp",
            "-rtmp_live",
            "live",
            "-i",
            url,
            "-fflags",
            "+genpts",
            "-re",
            "-analyzeduration",
            "0",
            "-probesize",
            "8192",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-ar",
            "44100",
            "-f",
            "flv",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Spawn ffmpeg for `url` and wait for its first output.
    ///
    /// There is no internal retry: an exit before any output is an error.
    pub async fn open(&self, url: &str) -> Result<RelaySession, GrabError> {
        let url = normalize_url(url);
        if url.is_empty() {
            return Err(GrabError::InvalidInput("url is required".to_string()));
        }
        if classify_scheme(&url) != Scheme::Rtmp {
            return Err(GrabError::InvalidUrl(format!("not an rtmp url: {}", url)));
        }

        let args = Self::build_args(&url);
        debug!("Spawning {} with args: {:?}", self.ffmpeg_path.display(), args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GrabError::Process(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GrabError::Process("Failed to capture ffmpeg stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let source = url.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("ffmpeg [{}]: {}", source, line);
                }
            });
        }

        info!("Relaying {} through ffmpeg", url);

        let (tx, rx) = channel();
        let grace = self.shutdown_grace;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            pump(child, stdout, tx, grace, shutdown).await;
        });

        RelaySession::establish(rx).await
    }
}

/// Forward stdout until ffmpeg exits or the client leaves
async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    tx: ChunkSender,
    grace: Duration,
    shutdown: CancellationToken,
) {
    let mut reader = ReaderStream::new(stdout);
    let mut sent_any = false;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("Client left, stopping ffmpeg");
                interrupt(&mut child, grace).await;
                return;
            }
            _ = shutdown.cancelled() => {
                debug!("Shutting down, stopping ffmpeg");
                interrupt(&mut child, grace).await;
                return;
            }
            next = reader.next() => match next {
                Some(Ok(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        interrupt(&mut child, grace).await;
                        return;
                    }
                    sent_any = true;
                }
                Some(Err(e)) => {
                    warn!("Failed reading ffmpeg output: {}", e);
                    if !sent_any {
                        let _ = tx.send(Err(GrabError::Io(e))).await;
                        sent_any = true;
                    }
                    interrupt(&mut child, grace).await;
                    return;
                }
                None => break,
            }
        }
    }

    let status = child.wait().await;
    debug!("ffmpeg exited: {:?}", status);

    if !sent_any {
        let message = match status {
            Ok(s) => format!("ffmpeg exited ({}) before producing output", s),
            Err(e) => format!("ffmpeg failed before producing output: {}", e),
        };
        let _ = tx.send(Err(GrabError::Process(message))).await;
    }
}

/// Ask ffmpeg to stop, then kill it if it ignores the request
async fn interrupt(child: &mut Child, grace: Duration) {
    send_interrupt(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("ffmpeg stopped: {}", status),
        Ok(Err(e)) => warn!("Error waiting for ffmpeg: {}", e),
        Err(_) => {
            warn!("ffmpeg ignored interrupt, killing it");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill ffmpeg: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            debug!("SIGINT to ffmpeg failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to stop ffmpeg: {}", e);
    }
}
