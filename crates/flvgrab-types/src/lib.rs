//! Shared types for flvgrab
//!
//! This crate contains the data structures shared between the core
//! engine and the HTTP server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Task Types
// ============================================================================

/// Durable record of one capture operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub url: String,
    pub save_dir: PathBuf,
    pub file_path: Option<PathBuf>,
    pub status: TaskStatus,
    /// Message of the failure that moved the task to `error`
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Downloading,
    Completed,
    Cancelled,
    Error,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Error => "error",
            TaskStatus::Deleted => "deleted",
        }
    }

    /// `downloading` is the only state the engine moves out of
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Downloading)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown task status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "downloading" => Ok(TaskStatus::Downloading),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "error" => Ok(TaskStatus::Error),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One page of tasks filtered by status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// What a freshly started capture looks like to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedTask {
    pub id: String,
    pub title: String,
    pub url: String,
    pub folder_path: PathBuf,
    pub filename: String,
    pub file_path: PathBuf,
}

// ============================================================================
// Catalog Types
// ============================================================================

/// A streaming platform listed by the directory API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub address: String,
    pub title: Option<String>,
    pub xinimg: Option<String>,
    pub number: i64,
    #[serde(default, with = "flag")]
    pub favorite: bool,
    #[serde(default, with = "flag")]
    pub blocked: bool,
}

/// A channel (streamer) on a platform; favorites are tracked by title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    pub platform_address: Option<String>,
    /// Live address, refreshed by the channel refresh job
    pub address: Option<String>,
    pub img: Option<String>,
    #[serde(default, with = "flag")]
    pub favorite: bool,
    #[serde(default, with = "flag")]
    pub blocked: bool,
}

/// Flags travel as 0/1 integers on the wire
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
            Str(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => b,
            Raw::Int(n) => n == 1,
            Raw::Str(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        })
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Default directory API base
pub const DEFAULT_EXPLORE_BASE_URL: &str = "http://api.hclyz.com:81/mf/";

/// Default channel refresh interval in minutes
pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 10;

/// Runtime settings persisted in the settings table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub explore_base_url: String,
    pub poll_interval_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            explore_base_url: DEFAULT_EXPLORE_BASE_URL.to_string(),
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
        }
    }
}
