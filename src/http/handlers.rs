//! HTTP handlers for the `/api/v1` surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::feed;
use crate::utils::{clamp_limit, clamp_page};

use super::envelope::{created, success, success_message};
use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistMutation {
    pub wallet_address: String,
    #[serde(default)]
    pub token_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistQuery {
    pub wallet_address: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub token_address: String,
    pub wallet_address: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactRequest {
    pub token_address: String,
    pub emoji: String,
    pub increment: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

// ==================== WATCHLIST ====================

pub async fn watchlist_add(
    State(state): State<AppState>,
    Json(body): Json<WatchlistMutation>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let result = state
        .watchlist
        .add(&body.wallet_address, &body.token_addresses)
        .await?;
    Ok(created(result))
}

pub async fn watchlist_remove(
    State(state): State<AppState>,
    Json(body): Json<WatchlistMutation>,
) -> ApiResult<Json<Value>> {
    let result = state
        .watchlist
        .remove(&body.wallet_address, &body.token_addresses)
        .await?;
    Ok(success(result))
}

pub async fn watchlist_get(
    State(state): State<AppState>,
    Query(query): Query<WatchlistQuery>,
) -> ApiResult<Json<Value>> {
    let wallet = query
        .wallet_address
        .ok_or_else(|| ApiError::validation("walletAddress query parameter is required"))?;
    let page = state.watchlist.list(&wallet, query.page, query.limit).await?;
    Ok(success(page))
}

pub async fn watchlist_check(
    State(state): State<AppState>,
    Path((wallet, token)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let is_in_watchlist = state.watchlist.contains(&wallet, &token).await?;
    Ok(success(json!({ "isInWatchlist": is_in_watchlist })))
}

pub async fn watchlist_count(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<Value>> {
    let count = state.watchlist.count(&wallet).await?;
    Ok(success(json!({ "count": count })))
}

// ==================== COMMENTS ====================

pub async fn comments_create(
    State(state): State<AppState>,
    Json(body): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let stub = state
        .comments
        .create(&body.token_address, &body.wallet_address, &body.content)
        .await?;
    Ok(created(stub))
}

pub async fn comments_latest(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let comments = state.comments.latest(&token, query.limit).await?;
    Ok(success(comments))
}

// ==================== REACTIONS ====================

pub async fn emoji_react(
    State(state): State<AppState>,
    Json(body): Json<ReactRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let stub = state
        .reactions
        .react(&body.token_address, &body.emoji, body.increment)
        .await?;
    Ok(created(stub))
}

pub async fn emoji_counts(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let counts = state.reactions.counts(&token).await?;
    Ok(success(counts))
}

// ==================== LAUNCHPAD FEED ====================

pub async fn new_tokens_list(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let page = clamp_page(query.page);
    let limit = clamp_limit(query.limit, 20);
    // An explicit offset overrides page-derived positioning.
    let offset = query
        .offset
        .unwrap_or((page as u64 - 1) * limit as u64);

    let (tokens, total) = feed::list_tokens(&state.kv, offset, limit).await?;
    Ok(success(json!({
        "data": tokens,
        "pagination": {
            "total": total,
            "page": page,
            "limit": limit,
            "totalPages": total.div_ceil(limit as u64),
            "skip": offset,
        },
    })))
}

// ==================== TOKEN REPOSITORY ====================

pub async fn tokens_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let partitions = state.tokens.all().await?;
    if partitions.iter().all(|p| p.records.is_empty()) {
        return Err(ApiError::not_found("no tokens discovered yet"));
    }
    Ok(success(partitions))
}

pub async fn tokens_zora(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    tokens_partition(state, "zora").await
}

pub async fn tokens_tba(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    tokens_partition(state, "tba").await
}

async fn tokens_partition(state: AppState, name: &str) -> ApiResult<Json<Value>> {
    let partition = state
        .tokens
        .by_partition(name)
        .await?
        .filter(|p| !p.records.is_empty())
        .ok_or_else(|| ApiError::not_found(format!("no {name} tokens discovered yet")))?;
    Ok(success(partition))
}

pub async fn tokens_metadata(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let meta = state.tokens.meta().await?;
    if meta.iter().all(|(_, m)| m.total_tokens == 0) {
        return Err(ApiError::not_found("no tokens discovered yet"));
    }
    let body: Value = meta
        .into_iter()
        .map(|(name, m)| (name, serde_json::to_value(m).unwrap_or(Value::Null)))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Ok(success(body))
}

pub async fn tokens_scan(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.scanner.scan().await? {
        Some(result) => Ok(success(result)),
        None => Ok(success_message("scan already in progress", Value::Null)),
    }
}

// ==================== HEALTH ====================

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().timestamp(),
        "service": "tidepool",
    }))
}

pub async fn health_detailed(State(state): State<AppState>) -> Json<Value> {
    let postgres = match state.store.health_check().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    let kv = match state.kv.ping().await {
        Ok(()) => "up",
        Err(_) => "down",
    };

    let healthy = postgres == "up" && kv == "up";
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": Utc::now().timestamp(),
        "service": "tidepool",
        "dependencies": {
            "postgres": postgres,
            "kv": kv,
        },
    }))
}
