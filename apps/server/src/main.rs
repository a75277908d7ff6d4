//! flvgrab server - FLV capture and live relay over HTTP
//!
//! Captures HTTP(S)-FLV streams to disk, relays live HTTP-FLV and RTMP
//! sources to browsers, and keeps a catalog of platforms and channels.

mod config;
mod error;
mod logging;
mod routes;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use config::Cli;
use flvgrab_core::GrabCore;
use state::AppState;
use std::future::Future;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Some(dir) = &cli.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
    }
    let _log_guard = logging::init(cli.log_dir.as_deref());

    let cwd = std::env::current_dir().context("resolving working directory")?;
    let core = GrabCore::new(cli.core_config(cwd))
        .await
        .context("initializing core")?;

    let minutes = core.scheduler.start().await?;
    info!("Channel refresh every {} minute(s)", minutes);

    let state = AppState::new(core);

    let addr = cli.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on http://{}", addr);

    run(listener, state.clone(), cli.public_dir.clone(), shutdown_signal()).await?;

    info!(
        "Shut down with {} capture(s) still active",
        state.core.engine.active_count().await
    );
    Ok(())
}

/// Serve until `signal` resolves, then close live relays so open streams let go
async fn run(
    listener: TcpListener,
    state: AppState,
    public_dir: Option<PathBuf>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = routes::router(state.clone(), public_dir);
    let core = state.core.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            core.shutdown().await;
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_with_open_proxy_stream() {
        let upstream = routes::test_support::serve(Router::new().route(
            "/live.flv",
            get(|| async {
                let stream = futures::stream::unfold((), |_| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, std::io::Error>(Bytes::from_static(b"FLV")), ()))
                });
                Body::from_stream(stream)
            }),
        ))
        .await;
        let (_dir, state, _app) = routes::test_support::app().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(run(listener, state, None, async move {
            let _ = stop_rx.await;
        }));

        let mut response = reqwest::get(format!(
            "http://{}/proxy?url={}/live.flv",
            addr, upstream
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.chunk().await.unwrap().is_some());

        stop_tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(finished.is_ok(), "server still running with a proxy stream open");
        finished.unwrap().unwrap().unwrap();

        // The client sees its body end instead of hanging
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Ok(Some(_)) = response.chunk().await {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
