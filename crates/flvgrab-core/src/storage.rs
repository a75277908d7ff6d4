//! Storage layer for settings and the platform/channel catalog
//!
//! Shares the SQLite pool opened by the task database.

use crate::error::GrabError;
use chrono::Utc;
use flvgrab_types::{Channel, Platform};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

pub const EXPLORE_BASE_URL_KEY: &str = "explore_base_url";
pub const POLL_INTERVAL_MINUTES_KEY: &str = "poll_interval_minutes";

/// Persistent catalog of platforms, channels and key/value settings
#[derive(Clone, Debug)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Create the catalog tables on an existing pool
    pub async fn new(pool: SqlitePool) -> Result<Self, GrabError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS platform (
                address TEXT PRIMARY KEY,
                title TEXT,
                xinimg TEXT,
                number INTEGER NOT NULL DEFAULT 0,
                favorite INTEGER NOT NULL DEFAULT 0,
                blocked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel (
                title TEXT PRIMARY KEY,
                platform_address TEXT,
                address TEXT,
                img TEXT,
                favorite INTEGER NOT NULL DEFAULT 0,
                blocked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, GrabError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), GrabError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Platforms
    // ========================================================================

    /// Insert or refresh a platform's descriptive fields; flags are left alone
    pub async fn upsert_platform(
        &self,
        address: &str,
        title: Option<&str>,
        xinimg: Option<&str>,
        number: i64,
    ) -> Result<(), GrabError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO platform (address, title, xinimg, number, favorite, blocked, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                title = excluded.title,
                xinimg = excluded.xinimg,
                number = excluded.number,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(address)
        .bind(title)
        .bind(xinimg)
        .bind(number)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_platform(&self, address: &str) -> Result<Option<Platform>, GrabError> {
        let row = sqlx::query("SELECT * FROM platform WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_platform))
    }

    /// Every stored platform, busiest first
    pub async fn list_platforms(&self) -> Result<Vec<Platform>, GrabError> {
        self.platforms_where("1 = 1", "number DESC, address ASC", None)
            .await
    }

    pub async fn list_platform_favorites(&self) -> Result<Vec<Platform>, GrabError> {
        self.platforms_where("favorite = 1", "updated_at DESC", None)
            .await
    }

    pub async fn list_platform_blocked(&self) -> Result<Vec<Platform>, GrabError> {
        self.platforms_where("blocked = 1", "updated_at DESC", None)
            .await
    }

    /// The `limit` busiest platforms that are not blocked
    pub async fn top_unblocked_platforms(&self, limit: u32) -> Result<Vec<Platform>, GrabError> {
        self.platforms_where("blocked = 0 AND address <> ''", "number DESC", Some(limit))
            .await
    }

    async fn platforms_where(
        &self,
        filter: &str,
        order: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Platform>, GrabError> {
        let mut sql = format!("SELECT * FROM platform WHERE {} ORDER BY {}", filter, order);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_platform).collect())
    }

    pub async fn clear_platforms(&self) -> Result<(), GrabError> {
        sqlx::query("DELETE FROM platform").execute(&self.pool).await?;
        Ok(())
    }

    /// Set the favorite flag; returns `false` if the platform is unknown
    pub async fn set_platform_favorite(&self, address: &str, favorite: bool) -> Result<bool, GrabError> {
        let result = sqlx::query("UPDATE platform SET favorite = ?, updated_at = ? WHERE address = ?")
            .bind(i64::from(favorite))
            .bind(Utc::now().to_rfc3339())
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the blocked flag. Blocking also clears the favorite flag.
    pub async fn set_platform_blocked(&self, address: &str, blocked: bool) -> Result<bool, GrabError> {
        let result = sqlx::query(
            r#"
            UPDATE platform
            SET blocked = ?1,
                favorite = CASE WHEN ?1 = 1 THEN 0 ELSE favorite END,
                updated_at = ?2
            WHERE address = ?3
            "#,
        )
        .bind(i64::from(blocked))
        .bind(Utc::now().to_rfc3339())
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Channels (keyed by title)
    // ========================================================================

    /// Create a channel row if the title is new
    pub async fn ensure_channel(
        &self,
        title: &str,
        platform_address: Option<&str>,
        address: Option<&str>,
    ) -> Result<(), GrabError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO channel (title, platform_address, address, img, favorite, blocked, created_at, updated_at)
            VALUES (?, ?, ?, NULL, 0, 0, ?, ?)
            ON CONFLICT(title) DO NOTHING
            "#,
        )
        .bind(title)
        .bind(platform_address)
        .bind(address)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_channel(&self, title: &str) -> Result<Option<Channel>, GrabError> {
        let row = sqlx::query("SELECT * FROM channel WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_channel))
    }

    pub async fn update_channel_address(
        &self,
        title: &str,
        address: Option<&str>,
    ) -> Result<(), GrabError> {
        sqlx::query("UPDATE channel SET address = ?, updated_at = ? WHERE title = ?")
            .bind(address)
            .bind(Utc::now().to_rfc3339())
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_channel_favorite(&self, title: &str, favorite: bool) -> Result<(), GrabError> {
        sqlx::query("UPDATE channel SET favorite = ?, updated_at = ? WHERE title = ?")
            .bind(i64::from(favorite))
            .bind(Utc::now().to_rfc3339())
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the blocked flag. Blocking also clears the favorite flag.
    pub async fn set_channel_blocked(&self, title: &str, blocked: bool) -> Result<(), GrabError> {
        sqlx::query(
            r#"
            UPDATE channel
            SET blocked = ?1,
                favorite = CASE WHEN ?1 = 1 THEN 0 ELSE favorite END,
                updated_at = ?2
            WHERE title = ?3
            "#,
        )
        .bind(i64::from(blocked))
        .bind(Utc::now().to_rfc3339())
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_channel_favorites(&self) -> Result<Vec<Channel>, GrabError> {
        let rows = sqlx::query("SELECT * FROM channel WHERE favorite = 1 ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_channel).collect())
    }

    pub async fn list_channel_blocked(&self) -> Result<Vec<Channel>, GrabError> {
        let rows = sqlx::query("SELECT * FROM channel WHERE blocked = 1 ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_channel).collect())
    }
}

fn row_to_platform(row: &SqliteRow) -> Platform {
    Platform {
        address: row.get("address"),
        title: row.get("title"),
        xinimg: row.get("xinimg"),
        number: row.get::<Option<i64>, _>("number").unwrap_or(0),
        favorite: row.get::<i64, _>("favorite") == 1,
        blocked: row.get::<i64, _>("blocked") == 1,
    }
}

fn row_to_channel(row: &SqliteRow) -> Channel {
    Channel {
        title: row.get("title"),
        platform_address: row.get("platform_address"),
        address: row.get("address"),
        img: row.get("img"),
        favorite: row.get::<i64, _>("favorite") == 1,
        blocked: row.get::<i64, _>("blocked") == 1,
    }
}
