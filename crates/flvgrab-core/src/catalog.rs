//! Client for the external streaming directory API
//!
//! `<base>json.txt` lists platforms under `pingtai`; `<base><platform address>`
//! lists that platform's channels under `zhubo`. Bodies that are not JSON
//! objects are treated as empty listings.

use crate::error::GrabError;
use crate::BROWSER_USER_AGENT;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Platform entry as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPlatform {
    pub address: String,
    pub title: Option<String>,
    pub xinimg: Option<String>,
    pub number: i64,
}

/// Channel entry as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryChannel {
    pub address: String,
    pub title: Option<String>,
    pub img: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
}

impl DirectoryClient {
    pub fn new() -> Result<Self, GrabError> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch_platforms(&self, base: &str) -> Result<Vec<DirectoryPlatform>, GrabError> {
        let body = self.get_json(&format!("{}json.txt", base)).await?;
        let list = array_field(&body, "pingtai");

        Ok(list
            .iter()
            .map(|p| DirectoryPlatform {
                address: string_field(p, "address").unwrap_or_default(),
                title: string_field(p, "title"),
                xinimg: string_field(p, "xinimg"),
                number: number_field(p, "Number"),
            })
            .collect())
    }

    pub async fn fetch_channels(
        &self,
        base: &str,
        platform_address: &str,
    ) -> Result<Vec<DirectoryChannel>, GrabError> {
        let body = self.get_json(&format!("{}{}", base, platform_address)).await?;
        let list = array_field(&body, "zhubo");

        Ok(list
            .iter()
            .map(|c| DirectoryChannel {
                address: string_field(c, "address").unwrap_or_default(),
                title: string_field(c, "title"),
                img: string_field(c, "img"),
            })
            .collect())
    }

    async fn get_json(&self, url: &str) -> Result<Value, GrabError> {
        debug!("Fetching directory listing {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(GrabError::ServerError {
                status: status.as_u16(),
                message: format!("directory request to {} failed", url),
            });
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!("Directory listing {} is not JSON: {}", url, e);
            Value::Null
        }))
    }
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Non-empty string, also accepting numbers
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer from a number or numeric string, 0 otherwise
fn number_field(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
