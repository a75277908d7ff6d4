//! SQLite-based persistence layer for capture tasks
//!
//! Rows are never deleted. Every status change goes through a conditional
//! update keyed on the expected current status, so two writers racing on the
//! same task cannot both observe success.

use crate::error::GrabError;
use chrono::{DateTime, Utc};
use flvgrab_types::{Task, TaskPage, TaskStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};

/// Message stored on tasks found in `downloading` at startup
pub const ABANDONED_MESSAGE: &str = "abandoned on restart";

/// Database connection pool for task persistence
#[derive(Clone, Debug)]
pub struct TaskDatabase {
    pool: SqlitePool,
}

impl TaskDatabase {
    /// Open (or create) the database file and make sure the schema exists
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GrabError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                save_dir TEXT NOT NULL,
                file_path TEXT,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Shared pool, reused by the catalog store
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new task. A duplicate id maps to `AlreadyExists`.
    pub async fn insert_task(&self, task: &Task) -> Result<(), GrabError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, url, save_dir, file_path, status, error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.url)
        .bind(task.save_dir.to_string_lossy().to_string())
        .bind(task.file_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(task.status.as_str())
        .bind(task.error.as_ref())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(GrabError::AlreadyExists(task.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load a task by id
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, GrabError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_task(&r)).transpose()
    }

    /// Move a task from `from` to `to`.
    ///
    /// Returns `false` when the task was not in `from` (or does not exist).
    pub async fn transition(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool, GrabError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, error = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `downloading` → `completed`, recording where the bytes ended up
    pub async fn mark_completed(&self, id: &str, file_path: &Path) -> Result<bool, GrabError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = ?, file_path = ?, error = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(file_path.to_string_lossy().to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(TaskStatus::Downloading.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Page through tasks with one status, newest first. `page` is 1-based.
    pub async fn list_by_status(
        &self,
        status: TaskStatus,
        page: u32,
        page_size: u32,
    ) -> Result<TaskPage, GrabError> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(status.as_str())
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskPage {
            items,
            total: total.max(0) as u64,
            page,
            page_size,
        })
    }

    /// Move every `downloading` row to `error`. Only safe before any capture starts.
    pub async fn recover_abandoned(&self) -> Result<u64, GrabError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, error = ?, updated_at = ? WHERE status = ?",
        )
        .bind(TaskStatus::Error.as_str())
        .bind(ABANDONED_MESSAGE)
        .bind(Utc::now().to_rfc3339())
        .bind(TaskStatus::Downloading.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task, GrabError> {
    let status: String = row.get("status");
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| GrabError::Serialization(e.to_string()))?;

    let save_dir: String = row.get("save_dir");
    let file_path: Option<String> = row.get("file_path");

    Ok(Task {
        id: row.get("id"),
        title: row.get("title"),
        url: row.get("url"),
        save_dir: PathBuf::from(save_dir),
        file_path: file_path.map(PathBuf::from),
        status,
        error: row.get("error"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, GrabError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| GrabError::Serialization(format!("bad timestamp {}: {}", value, e)))
}
