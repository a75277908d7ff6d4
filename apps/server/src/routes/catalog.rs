//! Catalog and settings endpoints
//!
//! Flags go out as `0`/`1` integers, the way the browser UI reads them.

use super::{Flag, JsonBody, Loose};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

type JsonResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FlagRequest {
    favorite: Flag,
    blocked: Flag,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChannelFlagRequest {
    title: Loose,
    address: Loose,
    favorite: Flag,
    blocked: Flag,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValueRequest {
    value: Loose,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    address: Option<String>,
}

fn bit(flag: bool) -> u8 {
    u8::from(flag)
}

// ============================================================================
// Platforms
// ============================================================================

/// GET /platforms
pub async fn list_platforms(State(state): State<AppState>) -> JsonResult {
    let core = &state.core;
    Ok(Json(json!({
        "ok": true,
        "items": core.visible_platforms().await?,
        "favorites": core.catalog.list_platform_favorites().await?,
        "blocks": core.catalog.list_platform_blocked().await?,
    })))
}

/// POST /platforms/sync
pub async fn sync_platforms(State(state): State<AppState>) -> JsonResult {
    let count = state.core.sync_platforms().await?;
    Ok(Json(json!({ "ok": true, "count": count })))
}

/// GET /explore/platforms
pub async fn explore_platforms(State(state): State<AppState>) -> JsonResult {
    let core = &state.core;
    let items = core.explore_platforms().await?;
    Ok(Json(json!({
        "ok": true,
        "items": items,
        "favorites": core.catalog.list_platform_favorites().await?,
        "blocks": core.catalog.list_platform_blocked().await?,
    })))
}

/// POST /platform/:address/favorite
pub async fn platform_favorite(
    State(state): State<AppState>,
    Path(address): Path<String>,
    JsonBody(body): JsonBody<FlagRequest>,
) -> JsonResult {
    let address = required(&address, "address")?;
    let catalog = &state.core.catalog;
    catalog.set_platform_favorite(address, body.favorite.0).await?;
    let favorite = catalog
        .get_platform(address)
        .await?
        .map(|p| p.favorite)
        .unwrap_or(false);
    Ok(Json(json!({ "ok": true, "address": address, "favorite": bit(favorite) })))
}

/// POST /platform/:address/blocked
pub async fn platform_blocked(
    State(state): State<AppState>,
    Path(address): Path<String>,
    JsonBody(body): JsonBody<FlagRequest>,
) -> JsonResult {
    let address = required(&address, "address")?;
    let catalog = &state.core.catalog;
    catalog.set_platform_blocked(address, body.blocked.0).await?;
    let blocked = catalog
        .get_platform(address)
        .await?
        .map(|p| p.blocked)
        .unwrap_or(false);
    Ok(Json(json!({ "ok": true, "address": address, "blocked": bit(blocked) })))
}

// ============================================================================
// Channels
// ============================================================================

/// GET /explore/channel?address=
pub async fn explore_channel(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> JsonResult {
    let address = required(query.address.as_deref().unwrap_or_default(), "address")?;
    let core = &state.core;

    let items = core.explore_channels(address).await?;
    let platform_title = core
        .catalog
        .get_platform(address)
        .await?
        .and_then(|p| p.title);

    Ok(Json(json!({
        "ok": true,
        "platform_address": address,
        "platform_title": platform_title,
        "items": items,
        "favorites": core.catalog.list_channel_favorites().await?,
        "blocks": core.catalog.list_channel_blocked().await?,
    })))
}

/// POST /channel/favorite
pub async fn channel_favorite(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ChannelFlagRequest>,
) -> JsonResult {
    let title = body
        .title
        .trimmed()
        .ok_or_else(|| ApiError::bad_request("title is required"))?;
    let channel = state
        .core
        .favorite_channel(title, body.address.trimmed(), body.favorite.0)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "title": title,
        "address": channel.as_ref().and_then(|c| c.address.clone()),
        "favorite": bit(channel.map(|c| c.favorite).unwrap_or(false)),
    })))
}

/// POST /channel/blocked
pub async fn channel_blocked(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ChannelFlagRequest>,
) -> JsonResult {
    let title = body
        .title
        .trimmed()
        .ok_or_else(|| ApiError::bad_request("title is required"))?;
    let channel = state.core.block_channel(title, body.blocked.0).await?;

    Ok(Json(json!({
        "ok": true,
        "title": title,
        "blocked": bit(channel.map(|c| c.blocked).unwrap_or(false)),
    })))
}

/// GET /channels/favorites
pub async fn channel_favorites(State(state): State<AppState>) -> JsonResult {
    let items = state.core.catalog.list_channel_favorites().await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// GET /channels/blocked
pub async fn channels_blocked(State(state): State<AppState>) -> JsonResult {
    let items = state.core.catalog.list_channel_blocked().await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

// ============================================================================
// Settings
// ============================================================================

pub async fn get_explore_base_url(State(state): State<AppState>) -> JsonResult {
    let value = state.core.explore_base_url().await?;
    Ok(Json(json!({ "ok": true, "value": value })))
}

pub async fn set_explore_base_url(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ValueRequest>,
) -> JsonResult {
    let value = state.core.set_explore_base_url(body.value.0.as_deref()).await?;
    Ok(Json(json!({ "ok": true, "value": value })))
}

pub async fn get_poll_interval(State(state): State<AppState>) -> JsonResult {
    let value = state.core.poll_interval_minutes().await?;
    Ok(Json(json!({ "ok": true, "value": value })))
}

/// Saving the interval restarts the channel refresh job
pub async fn set_poll_interval(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ValueRequest>,
) -> JsonResult {
    let value = state
        .core
        .set_poll_interval_minutes(body.value.0.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true, "value": value })))
}

fn required<'a>(value: &'a str, name: &str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{} is required", name)));
    }
    Ok(value)
}
