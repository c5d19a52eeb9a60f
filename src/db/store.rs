//! Storage port for the social engines.
//!
//! The relational store is the system of record for users, comments, and
//! watchlist entries; Redis caches are advisory and repaired from here on
//! read. Backed by PostgreSQL in production and an in-memory implementation
//! in tests.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{Comment, User, WatchlistEntry};

#[async_trait]
pub trait SocialStore: Send + Sync {
    /// Upsert a user by wallet; returns the row and whether it was created.
    async fn get_or_create_user(&self, wallet_address: &str) -> Result<(User, bool)>;

    async fn find_user(&self, wallet_address: &str) -> Result<Option<User>>;

    async fn insert_comment(&self, comment: &Comment) -> Result<()>;

    /// Newest-first comments for a token.
    async fn latest_comments(&self, token_address: &str, limit: u32) -> Result<Vec<Comment>>;

    /// Delete rows beyond the `keep` newest for a token; returns the number
    /// deleted. Runs as a non-transactional follow-up to the cache trim.
    async fn prune_comments(&self, token_address: &str, keep: u32) -> Result<u64>;

    /// Batch insert with skip-duplicates; returns the number actually added.
    async fn add_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64>;

    /// Of `tokens`, the ones already present for this user.
    async fn existing_watchlist_tokens(
        &self,
        user_id: i64,
        tokens: &[String],
    ) -> Result<Vec<String>>;

    async fn remove_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64>;

    /// Newest-first page plus the total entry count.
    async fn watchlist_page(
        &self,
        user_id: i64,
        skip: u64,
        limit: u32,
    ) -> Result<(Vec<WatchlistEntry>, u64)>;

    async fn watchlist_contains(&self, user_id: i64, token_address: &str) -> Result<bool>;

    async fn watchlist_count(&self, user_id: i64) -> Result<u64>;

    async fn health_check(&self) -> Result<()>;
}
