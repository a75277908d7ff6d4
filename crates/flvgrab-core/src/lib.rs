//! flvgrab Core - capture engine and live relays
//!
//! This crate records HTTP(S)-FLV streams to disk, relays HTTP-FLV and RTMP
//! sources to browsers, and keeps a catalog of streaming platforms.

pub mod catalog;
pub mod engine;
mod error;
pub mod naming;
pub mod relay;
pub mod scheduler;
pub mod storage;

pub use catalog::*;
pub use engine::*;
pub use error::*;
pub use relay::{HttpRelay, RelaySession, RetryPolicy, RtmpRelay};
pub use scheduler::*;
pub use storage::*;

use flvgrab_types::{Channel, Platform, DEFAULT_EXPLORE_BASE_URL};
use naming::{ensure_base_url, ensure_interval_minutes};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// User-Agent sent to stream sources and the directory API
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Where the core keeps its data and which tools it calls
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of `<title>/<title><timestamp>.flv` captures
    pub base_dir: PathBuf,
    /// SQLite database file
    pub db_path: PathBuf,
    /// ffmpeg binary used by the RTMP relay
    pub ffmpeg_path: PathBuf,
    /// Directory API base used until one is saved in settings
    pub default_explore_base_url: String,
}

impl CoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            db_path: base_dir.join("tasks.sqlite3"),
            base_dir,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            default_explore_base_url: DEFAULT_EXPLORE_BASE_URL.to_string(),
        }
    }
}

/// The main flvgrab core instance
#[derive(Clone)]
pub struct GrabCore {
    /// Capture engine
    pub engine: DownloadEngine,
    /// HTTP(S)-FLV passthrough relay
    pub http_relay: HttpRelay,
    /// RTMP → FLV relay
    pub rtmp_relay: RtmpRelay,
    /// Settings and platform/channel catalog
    pub catalog: CatalogStore,
    /// Directory API client
    pub directory: DirectoryClient,
    /// Favorite channel refresh job
    pub scheduler: Arc<ChannelRefreshScheduler>,
    /// Cancelled once the server stops; ends every open relay
    shutdown: CancellationToken,
    default_explore_base_url: String,
}

impl GrabCore {
    /// Open the database, sweep abandoned captures, and wire every component
    pub async fn new(config: CoreConfig) -> Result<Self, GrabError> {
        tokio::fs::create_dir_all(&config.base_dir).await?;

        let db = TaskDatabase::new(&config.db_path).await?;
        let catalog = CatalogStore::new(db.pool().clone()).await?;

        let engine = DownloadEngine::new(config.base_dir.clone(), db, ActiveRegistry::new())?;
        engine.recover_abandoned().await?;

        let directory = DirectoryClient::new()?;
        let scheduler = Arc::new(ChannelRefreshScheduler::new(
            catalog.clone(),
            directory.clone(),
            config.default_explore_base_url.clone(),
        ));

        info!(
            "Core ready (captures in {}, database {})",
            config.base_dir.display(),
            config.db_path.display()
        );

        let shutdown = CancellationToken::new();

        Ok(Self {
            engine,
            http_relay: HttpRelay::new()?.with_shutdown(shutdown.clone()),
            rtmp_relay: RtmpRelay::new(config.ffmpeg_path).with_shutdown(shutdown.clone()),
            catalog,
            directory,
            scheduler,
            shutdown,
            default_explore_base_url: config.default_explore_base_url,
        })
    }

    /// End open relays and stop the refresh job. Captures keep running.
    pub async fn shutdown(&self) {
        info!("Closing live relays");
        self.shutdown.cancel();
        self.scheduler.stop().await;
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn explore_base_url(&self) -> Result<String, GrabError> {
        let stored = self.catalog.get_setting(EXPLORE_BASE_URL_KEY).await?;
        Ok(ensure_base_url(Some(
            stored.as_deref().unwrap_or(&self.default_explore_base_url),
        )))
    }

    /// Save a new directory base; returns the coerced value
    pub async fn set_explore_base_url(&self, raw: Option<&str>) -> Result<String, GrabError> {
        let base = ensure_base_url(raw);
        self.catalog.set_setting(EXPLORE_BASE_URL_KEY, &base).await?;
        Ok(base)
    }

    pub async fn poll_interval_minutes(&self) -> Result<u32, GrabError> {
        let stored = self.catalog.get_setting(POLL_INTERVAL_MINUTES_KEY).await?;
        Ok(ensure_interval_minutes(stored.as_deref()))
    }

    /// Save a new refresh interval and restart the refresh job with it
    pub async fn set_poll_interval_minutes(&self, raw: Option<&str>) -> Result<u32, GrabError> {
        let minutes = ensure_interval_minutes(raw);
        self.catalog
            .set_setting(POLL_INTERVAL_MINUTES_KEY, &minutes.to_string())
            .await?;
        self.scheduler.start().await?;
        Ok(minutes)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Stored platforms that are not blocked
    pub async fn visible_platforms(&self) -> Result<Vec<Platform>, GrabError> {
        Ok(self
            .catalog
            .list_platforms()
            .await?
            .into_iter()
            .filter(|p| !p.address.is_empty() && !p.blocked)
            .collect())
    }

    /// Replace the stored platform list with the directory's, keeping flags.
    /// Returns the number of visible platforms afterwards.
    pub async fn sync_platforms(&self) -> Result<usize, GrabError> {
        let base = self.explore_base_url().await?;
        let listed = self.directory.fetch_platforms(&base).await?;

        let favorites = self.catalog.list_platform_favorites().await?;
        let blocked = self.catalog.list_platform_blocked().await?;

        self.catalog.clear_platforms().await?;
        for p in &listed {
            if p.address.is_empty() {
                continue;
            }
            self.catalog
                .upsert_platform(&p.address, p.title.as_deref(), p.xinimg.as_deref(), p.number)
                .await?;
        }
        for p in &favorites {
            self.catalog.set_platform_favorite(&p.address, true).await?;
        }
        for p in &blocked {
            self.catalog.set_platform_blocked(&p.address, true).await?;
        }

        let count = self.visible_platforms().await?.len();
        info!("Synced {} platform(s) from directory", count);
        Ok(count)
    }

    /// Live platform listing merged with stored flags; blocked ones are hidden
    pub async fn explore_platforms(&self) -> Result<Vec<Platform>, GrabError> {
        let base = self.explore_base_url().await?;
        let listed = self.directory.fetch_platforms(&base).await?;

        let mut items = Vec::with_capacity(listed.len());
        for p in listed {
            if p.address.is_empty() {
                continue;
            }
            self.catalog
                .upsert_platform(&p.address, p.title.as_deref(), p.xinimg.as_deref(), p.number)
                .await?;
            let stored = self.catalog.get_platform(&p.address).await?;
            let (favorite, blocked) = stored.map(|s| (s.favorite, s.blocked)).unwrap_or_default();
            if blocked {
                continue;
            }
            items.push(Platform {
                address: p.address,
                title: p.title,
                xinimg: p.xinimg,
                number: p.number,
                favorite,
                blocked,
            });
        }
        Ok(items)
    }

    /// Live channel listing of one platform merged with stored flags
    pub async fn explore_channels(&self, platform_address: &str) -> Result<Vec<Channel>, GrabError> {
        if platform_address.is_empty() {
            return Err(GrabError::InvalidInput("address is required".to_string()));
        }
        let base = self.explore_base_url().await?;
        let listed = self.directory.fetch_channels(&base, platform_address).await?;

        let mut items = Vec::with_capacity(listed.len());
        for c in listed {
            if c.address.is_empty() {
                continue;
            }
            let (favorite, blocked) = match &c.title {
                Some(title) => self
                    .catalog
                    .get_channel(title)
                    .await?
                    .map(|s| (s.favorite, s.blocked))
                    .unwrap_or_default(),
                None => (false, false),
            };
            if blocked {
                continue;
            }
            items.push(Channel {
                title: c.title.unwrap_or_default(),
                platform_address: Some(platform_address.to_string()),
                address: Some(c.address),
                img: c.img,
                favorite,
                blocked,
            });
        }
        Ok(items)
    }

    /// Set a channel's favorite flag, creating the row and updating its
    /// address when one is given
    pub async fn favorite_channel(
        &self,
        title: &str,
        address: Option<&str>,
        favorite: bool,
    ) -> Result<Option<Channel>, GrabError> {
        self.catalog.ensure_channel(title, None, address).await?;
        if let Some(address) = address {
            self.catalog.update_channel_address(title, Some(address)).await?;
        }
        self.catalog.set_channel_favorite(title, favorite).await?;
        self.catalog.get_channel(title).await
    }

    pub async fn block_channel(&self, title: &str, blocked: bool) -> Result<Option<Channel>, GrabError> {
        self.catalog.ensure_channel(title, None, None).await?;
        self.catalog.set_channel_blocked(title, blocked).await?;
        self.catalog.get_channel(title).await
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
        format!("http://{}/", addr)
    }

    async fn core(base: String) -> (tempfile::TempDir, GrabCore) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CoreConfig::new(dir.path().to_path_buf());
        config.default_explore_base_url = base;
        let core = GrabCore::new(config).await.unwrap();
        (dir, core)
    }

    fn directory() -> Router {
        Router::new()
            .route(
                "/json.txt",
                get(|| async {
                    r#"{"pingtai":[{"address":"a.txt","title":"A","Number":3},{"address":"b.txt","title":"B","Number":7}]}"#
                }),
            )
            .route(
                "/a.txt",
                get(|| async {
                    r#"{"zhubo":[{"title":"One","address":"rtmp://a/1"},{"title":"Two","address":"rtmp://a/2"}]}"#
                }),
            )
    }

    #[tokio::test]
    async fn test_settings_are_coerced() {
        let (_dir, core) = core("http://dir.local/api".to_string()).await;
        assert_eq!(core.explore_base_url().await.unwrap(), "http://dir.local/api/");

        let saved = core.set_explore_base_url(Some("`https://x.io/m`")).await.unwrap();
        assert_eq!(saved, "https://x.io/m/");
        assert_eq!(core.explore_base_url().await.unwrap(), "https://x.io/m/");

        assert_eq!(core.poll_interval_minutes().await.unwrap(), 10);
        assert_eq!(core.set_poll_interval_minutes(Some("0")).await.unwrap(), 1);
        assert_eq!(core.poll_interval_minutes().await.unwrap(), 1);
        core.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_sync_keeps_flags() {
        let base = serve(directory()).await;
        let (_dir, core) = core(base).await;

        core.catalog.upsert_platform("a.txt", None, None, 0).await.unwrap();
        core.catalog.upsert_platform("b.txt", None, None, 0).await.unwrap();
        core.catalog.set_platform_favorite("a.txt", true).await.unwrap();
        core.catalog.set_platform_blocked("b.txt", true).await.unwrap();

        assert_eq!(core.sync_platforms().await.unwrap(), 1);
        let a = core.catalog.get_platform("a.txt").await.unwrap().unwrap();
        assert!(a.favorite);
        assert_eq!(a.title.as_deref(), Some("A"));

        let explored = core.explore_platforms().await.unwrap();
        assert_eq!(explored.len(), 1);
        assert_eq!(explored[0].address, "a.txt");
    }

    #[tokio::test]
    async fn test_explore_channels_hides_blocked() {
        let base = serve(directory()).await;
        let (_dir, core) = core(base).await;

        core.block_channel("Two", true).await.unwrap();
        let fav = core
            .favorite_channel("One", Some("rtmp://a/1"), true)
            .await
            .unwrap()
            .unwrap();
        assert!(fav.favorite);

        let channels = core.explore_channels("a.txt").await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "One");
        assert!(channels[0].favorite);

        assert!(matches!(
            core.explore_channels("").await.unwrap_err(),
            GrabError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_relays() {
        use futures::StreamExt;
        use std::time::Duration;

        let upstream = serve(Router::new().route(
            "/live.flv",
            get(|| async {
                let stream = futures::stream::unfold((), |_| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"FLV")), ()))
                });
                axum::body::Body::from_stream(stream)
            }),
        ))
        .await;
        let (_dir, core) = core("http://127.0.0.1:9/".to_string()).await;
        core.scheduler.start().await.unwrap();

        let session = core
            .http_relay
            .open(&format!("{}live.flv", upstream))
            .await
            .unwrap();
        let mut stream = Box::pin(session.into_stream());
        assert!(stream.next().await.unwrap().is_ok());

        core.shutdown().await;
        assert!(!core.scheduler.is_running().await);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while stream.next().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "relay kept streaming after shutdown");
    }
}
