//! In-memory registry of running captures, keyed by sanitized title

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Handle to a running capture
#[derive(Debug, Clone)]
pub struct ActiveDownload {
    pub task_id: String,
    pub title: String,
    pub url: String,
    pub file_path: PathBuf,
    /// Triggered to ask the fetch to stop
    pub cancel: CancellationToken,
    /// Triggered by the fetch once it has dropped its file handle
    pub released: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl ActiveDownload {
    /// Whole seconds since the capture started
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

/// Shared map of active captures.
///
/// Callers that need check-then-act semantics take the lock once with
/// [`ActiveRegistry::lock`] and hold it for the whole sequence.
#[derive(Debug, Clone, Default)]
pub struct ActiveRegistry {
    inner: Arc<Mutex<HashMap<String, ActiveDownload>>>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveDownload>> {
        self.inner.lock().await
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn contains(&self, title: &str) -> bool {
        self.inner.lock().await.contains_key(title)
    }
}

/// Remove `title` only if it is still registered to `task_id`
pub fn remove_if_owned(
    map: &mut HashMap<String, ActiveDownload>,
    title: &str,
    task_id: &str,
) -> Option<ActiveDownload> {
    match map.get(title) {
        Some(entry) if entry.task_id == task_id => map.remove(title),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(task_id: &str) -> ActiveDownload {
        ActiveDownload {
            task_id: task_id.to_string(),
            title: "show".to_string(),
            url: "http://example.com/a.flv".to_string(),
            file_path: PathBuf::from("/tmp/show.flv"),
            cancel: CancellationToken::new(),
            released: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_remove_only_matching_owner() {
        let registry = ActiveRegistry::new();
        registry.lock().await.insert("show".to_string(), entry("show1"));

        {
            let mut map = registry.lock().await;
            assert!(remove_if_owned(&mut map, "show", "show0").is_none());
        }
        assert!(registry.contains("show").await);

        {
            let mut map = registry.lock().await;
            assert!(remove_if_owned(&mut map, "show", "show1").is_some());
        }
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_elapsed_counts_from_start() {
        let mut e = entry("show1");
        e.started_at = Utc::now() - chrono::Duration::seconds(90);
        assert!(e.elapsed_secs() >= 90);
        assert_eq!(entry("show2").elapsed_secs(), 0);
    }
}
