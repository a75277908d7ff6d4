//! Download Engine - owns every running capture
//!
//! This is the top-level coordinator that:
//! - Validates and starts captures, deduplicating by title
//! - Cancels captures and cleans up their partial files
//! - Deletes completed recordings
//! - Converges every capture to exactly one terminal status

use crate::engine::fetch::{fetch_to_file, FetchOutcome, FetchTimeouts};
use crate::engine::registry::{remove_if_owned, ActiveDownload, ActiveRegistry};
use crate::engine::TaskDatabase;
use crate::error::GrabError;
use crate::naming::{classify_scheme, normalize_url, sanitize_name, timestamp_string, Scheme};
use crate::BROWSER_USER_AGENT;
use chrono::{Local, Utc};
use flvgrab_types::{StartedTask, Task, TaskStatus};
use futures::FutureExt;
use reqwest::Client;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a cancel waits for the fetch to let go of its file
const RELEASE_WAIT: Duration = Duration::from_secs(10);

/// Result of a start request
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(StartedTask),
    /// A capture with this title is already running; nothing new was started
    AlreadyActive {
        title: String,
        url: String,
        task_id: String,
    },
}

/// What a cancel request refers to
#[derive(Debug, Clone)]
pub enum CancelTarget {
    Id(String),
    Title(String),
}

/// Download engine that coordinates all captures
#[derive(Clone)]
pub struct DownloadEngine {
    /// Active captures, keyed by title
    registry: ActiveRegistry,
    /// Task store
    db: TaskDatabase,
    /// HTTP client shared by every capture
    client: Client,
    /// Root directory; each title gets its own subdirectory
    base_dir: PathBuf,
    timeouts: FetchTimeouts,
}

impl DownloadEngine {
    /// Create a new engine over an explicit registry
    pub fn new(
        base_dir: PathBuf,
        db: TaskDatabase,
        registry: ActiveRegistry,
    ) -> Result<Self, GrabError> {
        Self::with_timeouts(base_dir, db, registry, FetchTimeouts::default())
    }

    pub fn with_timeouts(
        base_dir: PathBuf,
        db: TaskDatabase,
        registry: ActiveRegistry,
        timeouts: FetchTimeouts,
    ) -> Result<Self, GrabError> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            registry,
            db,
            client,
            base_dir,
            timeouts,
        })
    }

    /// Get the database reference
    pub fn db(&self) -> &TaskDatabase {
        &self.db
    }

    pub async fn active_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_active(&self, title: &str) -> bool {
        self.registry.contains(&sanitize_name(title)).await
    }

    /// Mark rows left in `downloading` by a previous run as failed
    pub async fn recover_abandoned(&self) -> Result<u64, GrabError> {
        let count = self.db.recover_abandoned().await?;
        if count > 0 {
            warn!("Marked {} abandoned capture(s) as failed", count);
        }
        Ok(count)
    }

    /// Validate and start a capture. Returns as soon as the fetch is spawned.
    pub async fn start(&self, title: &str, url: &str) -> Result<StartOutcome, GrabError> {
        let title = sanitize_name(title);
        let url = normalize_url(url);

        if title.is_empty() {
            return Err(GrabError::InvalidInput("title is required".to_string()));
        }
        if url.is_empty() {
            return Err(GrabError::InvalidInput("url is required".to_string()));
        }
        match classify_scheme(&url) {
            Scheme::Http => {}
            Scheme::Rtmp => {
                return Err(GrabError::InvalidUrl(
                    "rtmp sources can only be relayed, not captured".to_string(),
                ))
            }
            Scheme::Other => {
                return Err(GrabError::InvalidUrl(format!("unsupported url: {}", url)))
            }
        }

        // Held until the fetch is spawned so cancel and dedup see a whole task or nothing.
        let mut active = self.registry.lock().await;

        if let Some(existing) = active.get(&title) {
            info!("Capture for '{}' already running as {}", title, existing.task_id);
            return Ok(StartOutcome::AlreadyActive {
                title,
                url: existing.url.clone(),
                task_id: existing.task_id.clone(),
            });
        }

        let save_dir = self.base_dir.join(&title);
        tokio::fs::create_dir_all(&save_dir).await?;

        let id = format!("{}{}", title, timestamp_string(Local::now()));
        let filename = format!("{}.flv", id);
        let file_path = save_dir.join(&filename);

        let now = Utc::now();
        let task = Task {
            id: id.clone(),
            title: title.clone(),
            url: url.clone(),
            save_dir: save_dir.clone(),
            file_path: Some(file_path.clone()),
            status: TaskStatus::Downloading,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_task(&task).await?;

        let file = match File::create(&file_path).await {
            Ok(f) => f,
            Err(e) => {
                let message = e.to_string();
                self.db
                    .transition(&id, TaskStatus::Downloading, TaskStatus::Error, Some(&message))
                    .await?;
                return Err(e.into());
            }
        };

        let entry = ActiveDownload {
            task_id: id.clone(),
            title: title.clone(),
            url: url.clone(),
            file_path: file_path.clone(),
            cancel: CancellationToken::new(),
            released: CancellationToken::new(),
            started_at: now,
        };
        active.insert(title.clone(), entry.clone());

        info!(task_id = %id, title = %title, url = %url, "Starting capture");

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_capture(entry, file).await;
        });

        drop(active);

        Ok(StartOutcome::Started(StartedTask {
            id,
            title,
            url,
            folder_path: save_dir,
            filename,
            file_path,
        }))
    }

    /// Body of the spawned capture task
    async fn run_capture(&self, entry: ActiveDownload, file: File) {
        let result = AssertUnwindSafe(fetch_to_file(
            &self.client,
            &entry.url,
            file,
            &entry.cancel,
            self.timeouts,
        ))
        .catch_unwind()
        .await;

        entry.released.cancel();

        let result = match result {
            Ok(r) => r,
            Err(panic) => Err(GrabError::Process(format!(
                "capture panicked: {}",
                panic_message(&*panic)
            ))),
        };

        if let Err(e) = self.finish_capture(&entry, result).await {
            error!(task_id = %entry.task_id, "Failed to record capture result: {}", e);
        }
    }

    async fn finish_capture(
        &self,
        entry: &ActiveDownload,
        result: Result<FetchOutcome, GrabError>,
    ) -> Result<(), GrabError> {
        let mut active = self.registry.lock().await;

        match result {
            Ok(FetchOutcome::Completed { bytes }) => {
                if remove_if_owned(&mut active, &entry.title, &entry.task_id).is_none() {
                    debug!(task_id = %entry.task_id, "Capture finished after being cancelled");
                    return Ok(());
                }
                self.db.mark_completed(&entry.task_id, &entry.file_path).await?;
                info!(
                    task_id = %entry.task_id,
                    title = %entry.title,
                    bytes,
                    elapsed_secs = entry.elapsed_secs(),
                    "Capture completed"
                );
            }
            Ok(FetchOutcome::Cancelled) => {
                debug!(task_id = %entry.task_id, "Capture stopped by cancel");
            }
            Err(e) => {
                if remove_if_owned(&mut active, &entry.title, &entry.task_id).is_none() {
                    debug!(task_id = %entry.task_id, "Capture failed after being cancelled: {}", e);
                    return Ok(());
                }
                remove_partial(&entry.file_path).await;
                let message = e.to_string();
                self.db
                    .transition(
                        &entry.task_id,
                        TaskStatus::Downloading,
                        TaskStatus::Error,
                        Some(&message),
                    )
                    .await?;
                error!(
                    task_id = %entry.task_id,
                    title = %entry.title,
                    url = %entry.url,
                    "Capture failed: {}",
                    message
                );
            }
        }

        Ok(())
    }

    /// Stop a running capture and discard its partial file. Returns the task id.
    pub async fn cancel(&self, target: CancelTarget) -> Result<String, GrabError> {
        let (title, expected_id) = match target {
            CancelTarget::Id(id) => {
                let task = self
                    .db
                    .get_task(&id)
                    .await?
                    .ok_or_else(|| GrabError::NotFound(id.clone()))?;
                if task.status != TaskStatus::Downloading {
                    return Err(GrabError::InvalidState {
                        id,
                        status: task.status,
                        expected: TaskStatus::Downloading,
                    });
                }
                (task.title, Some(id))
            }
            CancelTarget::Title(title) => (sanitize_name(&title), None),
        };

        let entry = {
            let mut active = self.registry.lock().await;
            match (active.get(&title), expected_id.as_deref()) {
                (Some(e), Some(id)) if e.task_id != id => None,
                (Some(_), _) => active.remove(&title),
                (None, _) => None,
            }
        };
        let entry = entry.ok_or_else(|| {
            GrabError::NotFound(expected_id.clone().unwrap_or_else(|| title.clone()))
        })?;

        info!(
            task_id = %entry.task_id,
            title = %entry.title,
            elapsed_secs = entry.elapsed_secs(),
            "Cancelling capture"
        );
        entry.cancel.cancel();

        if tokio::time::timeout(RELEASE_WAIT, entry.released.cancelled())
            .await
            .is_err()
        {
            warn!(task_id = %entry.task_id, "Capture did not release its file in time");
        }

        remove_partial(&entry.file_path).await;
        self.db
            .transition(&entry.task_id, TaskStatus::Downloading, TaskStatus::Cancelled, None)
            .await?;

        Ok(entry.task_id)
    }

    /// Remove the file of a completed capture and mark it deleted
    pub async fn delete_completed(&self, id: &str) -> Result<(), GrabError> {
        let task = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| GrabError::NotFound(id.to_string()))?;

        if task.status != TaskStatus::Completed {
            return Err(GrabError::InvalidState {
                id: id.to_string(),
                status: task.status,
                expected: TaskStatus::Completed,
            });
        }

        // The file goes before the row flips to deleted
        if let Some(path) = &task.file_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(task_id = %id, "Failed to remove {}: {}", path.display(), e);
                    return Err(e.into());
                }
            }
        }

        if !self
            .db
            .transition(id, TaskStatus::Completed, TaskStatus::Deleted, None)
            .await?
        {
            let status = self
                .db
                .get_task(id)
                .await?
                .map(|t| t.status)
                .unwrap_or(TaskStatus::Deleted);
            return Err(GrabError::InvalidState {
                id: id.to_string(),
                status,
                expected: TaskStatus::Completed,
            });
        }

        info!(task_id = %id, "Deleted recording");

        Ok(())
    }
}

/// Remove a file, treating "already gone" as success
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
