//! Channel Refresh Scheduler - keeps favorite channels pointing at live addresses
//!
//! Runs a background task that periodically looks up every favorite channel
//! title on the directory and stores the first live address found.

use crate::catalog::DirectoryClient;
use crate::error::GrabError;
use crate::naming::{ensure_base_url, ensure_interval_minutes};
use crate::storage::{CatalogStore, EXPLORE_BASE_URL_KEY, POLL_INTERVAL_MINUTES_KEY};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Platforms consulted when the user has no favorite platforms
const FALLBACK_PLATFORM_COUNT: u32 = 5;

/// Everything one refresh pass needs
#[derive(Debug, Clone)]
struct RefreshJob {
    store: CatalogStore,
    directory: DirectoryClient,
    default_base_url: String,
}

/// Scheduler that refreshes favorite channel addresses on an interval
pub struct ChannelRefreshScheduler {
    job: RefreshJob,
    /// Stops the currently running loop, if any
    running: Mutex<Option<CancellationToken>>,
}

impl ChannelRefreshScheduler {
    pub fn new(store: CatalogStore, directory: DirectoryClient, default_base_url: String) -> Self {
        Self {
            job: RefreshJob {
                store,
                directory,
                default_base_url,
            },
            running: Mutex::new(None),
        }
    }

    /// Start (or restart) the background loop using the stored interval.
    ///
    /// The first pass runs immediately. Returns the interval in minutes.
    pub async fn start(&self) -> Result<u32, GrabError> {
        let stored = self.job.store.get_setting(POLL_INTERVAL_MINUTES_KEY).await?;
        let minutes = ensure_interval_minutes(stored.as_deref());

        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        *running = Some(token.clone());
        drop(running);

        info!("Starting channel refresh every {} minute(s)", minutes);

        let job = self.job.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(u64::from(minutes) * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Channel refresh loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match job.refresh().await {
                            Ok(resolved) => debug!("Channel refresh resolved {} favorite(s)", resolved),
                            Err(e) => warn!("Channel refresh failed: {}", e),
                        }
                    }
                }
            }
        });

        Ok(minutes)
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        if let Some(token) = self.running.lock().await.take() {
            token.cancel();
            info!("Stopping channel refresh");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run one refresh pass now. Returns how many favorites got an address.
    pub async fn refresh_now(&self) -> Result<usize, GrabError> {
        self.job.refresh().await
    }
}

impl RefreshJob {
    async fn refresh(&self) -> Result<usize, GrabError> {
        let favorites = self.store.list_channel_favorites().await?;
        if favorites.is_empty() {
            return Ok(0);
        }

        let mut platforms = self.store.list_platform_favorites().await?;
        if platforms.is_empty() {
            platforms = self
                .store
                .top_unblocked_platforms(FALLBACK_PLATFORM_COUNT)
                .await?;
        }

        let stored_base = self.store.get_setting(EXPLORE_BASE_URL_KEY).await?;
        let base = ensure_base_url(Some(
            stored_base.as_deref().unwrap_or(&self.default_base_url),
        ));

        let mut addresses: HashMap<String, String> = HashMap::new();
        for platform in &platforms {
            match self.directory.fetch_channels(&base, &platform.address).await {
                Ok(channels) => {
                    for channel in channels {
                        if let Some(title) = channel.title {
                            if !channel.address.is_empty() {
                                addresses.entry(title).or_insert(channel.address);
                            }
                        }
                    }
                }
                Err(e) => debug!("Skipping platform {}: {}", platform.address, e),
            }
        }

        let mut resolved = 0;
        for favorite in &favorites {
            let address = addresses.get(&favorite.title).map(String::as_str);
            if address.is_some() {
                resolved += 1;
            }
            self.store
                .update_channel_address(&favorite.title, address)
                .await?;
        }

        Ok(resolved)
    }
}
