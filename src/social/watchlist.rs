//! Watchlist engine: per-user token sets with set-level idempotence.
//!
//! The relational store is the truth; the wallet-indexed KV set is an
//! advisory cache for fast membership checks. DB writes precede cache
//! updates so a DB failure never leaves phantom cache entries.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::db::models::WatchlistEntry;
use crate::db::SocialStore;
use crate::error::{ApiError, ApiResult};
use crate::events::{topics, EventBus};
use crate::kv::{KvGateway, KvOp};
use crate::utils::{clamp_limit, clamp_page, is_token_address, is_wallet_address, normalize_address};

use super::ensure_user;

/// Maximum tokens accepted per add/remove request.
const MAX_TOKENS_PER_REQUEST: usize = 50;

pub fn set_key(wallet_address: &str) -> String {
    format!("watchlist:{wallet_address}")
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResult {
    pub added_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    pub removed_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub skip: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchlistPage {
    pub data: Vec<WatchlistEntry>,
    pub pagination: Pagination,
}

pub struct WatchlistEngine {
    kv: KvGateway,
    store: Arc<dyn SocialStore>,
    bus: Arc<EventBus>,
}

impl WatchlistEngine {
    pub fn new(kv: KvGateway, store: Arc<dyn SocialStore>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { kv, store, bus })
    }

    fn validate_request(wallet_address: &str, tokens: &[String]) -> ApiResult<Vec<String>> {
        let mut problems = Vec::new();
        if !is_wallet_address(wallet_address) {
            problems.push("walletAddress must be a 0x-prefixed 40-hex-char address".to_string());
        }
        if tokens.is_empty() {
            problems.push("tokenAddresses must not be empty".to_string());
        }
        if tokens.len() > MAX_TOKENS_PER_REQUEST {
            problems.push(format!(
                "tokenAddresses must contain at most {MAX_TOKENS_PER_REQUEST} entries"
            ));
        }
        if tokens.iter().any(|t| !is_token_address(t)) {
            problems.push("every token address must be 0x-prefixed with 40 hex chars".to_string());
        }
        if !problems.is_empty() {
            return Err(ApiError::Validation(problems.join("; ")));
        }

        // Lower-case and dedupe, preserving input order.
        let mut seen = std::collections::HashSet::new();
        Ok(tokens
            .iter()
            .map(|t| normalize_address(t))
            .filter(|t| seen.insert(t.clone()))
            .collect())
    }

    pub async fn add(&self, wallet_address: &str, tokens: &[String]) -> ApiResult<AddResult> {
        let tokens = Self::validate_request(wallet_address, tokens)?;
        let wallet_address = normalize_address(wallet_address);

        let user = ensure_user(&self.store, &self.bus, &wallet_address).await?;

        let existing = self
            .store
            .existing_watchlist_tokens(user.id, &tokens)
            .await?;
        let new_tokens: Vec<String> = tokens
            .into_iter()
            .filter(|t| !existing.contains(t))
            .collect();
        if new_tokens.is_empty() {
            return Ok(AddResult { added_count: 0 });
        }

        let added = self
            .store
            .add_watchlist_entries(user.id, &new_tokens)
            .await?;

        // Cache after the DB write; one pipelined transaction.
        let key = set_key(&wallet_address);
        let ops: Vec<KvOp> = new_tokens
            .iter()
            .map(|token| KvOp::SAdd {
                key: key.clone(),
                member: token.clone(),
            })
            .collect();
        self.kv.pipeline(ops).await?;

        self.bus
            .emit(
                topics::WATCHLIST_TOKEN_ADDED,
                &wallet_address,
                json!({
                    "walletAddress": wallet_address,
                    "tokenAddresses": new_tokens,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        Ok(AddResult { added_count: added })
    }

    pub async fn remove(&self, wallet_address: &str, tokens: &[String]) -> ApiResult<RemoveResult> {
        let tokens = Self::validate_request(wallet_address, tokens)?;
        let wallet_address = normalize_address(wallet_address);

        let user = self
            .store
            .find_user(&wallet_address)
            .await?
            .ok_or_else(|| ApiError::not_found("user not found"))?;

        let removed = self
            .store
            .remove_watchlist_entries(user.id, &tokens)
            .await?;

        let key = set_key(&wallet_address);
        let ops: Vec<KvOp> = tokens
            .iter()
            .map(|token| KvOp::SRem {
                key: key.clone(),
                member: token.clone(),
            })
            .collect();
        self.kv.pipeline(ops).await?;

        self.bus
            .emit(
                topics::WATCHLIST_TOKEN_REMOVED,
                &wallet_address,
                json!({
                    "walletAddress": wallet_address,
                    "tokenAddresses": tokens,
                    "timestamp": Utc::now(),
                }),
            )
            .await;

        Ok(RemoveResult {
            removed_count: removed,
        })
    }

    pub async fn list(
        &self,
        wallet_address: &str,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> ApiResult<WatchlistPage> {
        if !is_wallet_address(wallet_address) {
            return Err(ApiError::validation(
                "walletAddress must be a 0x-prefixed 40-hex-char address",
            ));
        }

        let wallet_address = normalize_address(wallet_address);
        let page = clamp_page(page);
        let limit = clamp_limit(limit, 20);
        let skip = (page as u64 - 1) * limit as u64;

        let user = self
            .store
            .find_user(&wallet_address)
            .await?
            .ok_or_else(|| ApiError::not_found("user not found"))?;

        let (data, total) = self.store.watchlist_page(user.id, skip, limit).await?;
        let total_pages = total.div_ceil(limit as u64);

        Ok(WatchlistPage {
            data,
            pagination: Pagination {
                total,
                page,
                limit,
                total_pages,
                skip,
            },
        })
    }

    /// Membership check; absent user is simply `false`.
    pub async fn contains(&self, wallet_address: &str, token_address: &str) -> ApiResult<bool> {
        if !is_wallet_address(wallet_address) || !is_token_address(token_address) {
            return Err(ApiError::validation("malformed address"));
        }

        let wallet_address = normalize_address(wallet_address);
        let token_address = normalize_address(token_address);

        let Some(user) = self.store.find_user(&wallet_address).await? else {
            return Ok(false);
        };
        Ok(self.store.watchlist_contains(user.id, &token_address).await?)
    }

    /// Entry count; absent user is 0.
    pub async fn count(&self, wallet_address: &str) -> ApiResult<u64> {
        if !is_wallet_address(wallet_address) {
            return Err(ApiError::validation(
                "walletAddress must be a 0x-prefixed 40-hex-char address",
            ));
        }

        let wallet_address = normalize_address(wallet_address);
        let Some(user) = self.store.find_user(&wallet_address).await? else {
            return Ok(0);
        };
        Ok(self.store.watchlist_count(user.id).await?)
    }
}
