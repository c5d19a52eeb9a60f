use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::Row;

use crate::db::models::{Comment, CommentStatus, User, WatchlistEntry};
use crate::db::postgres::PostgresClient;
use crate::db::SocialStore;

fn row_to_user(row: &Row) -> User {
    User {
        id: row.get("id"),
        wallet_address: row.get("wallet_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_comment(row: &Row) -> Comment {
    Comment {
        id: row.get("id"),
        token_address: row.get("token_address"),
        user_id: row.get("user_id"),
        wallet_address: row.get("wallet_address"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        status: CommentStatus::Persisted,
    }
}

fn row_to_watchlist_entry(row: &Row) -> WatchlistEntry {
    WatchlistEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token_address: row.get("token_address"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl SocialStore for PostgresClient {
    async fn get_or_create_user(&self, wallet_address: &str) -> Result<(User, bool)> {
        let client = self.pool.get().await?;

        let existing = client
            .query_opt(
                "SELECT id, wallet_address, created_at, updated_at
                 FROM social.users WHERE wallet_address = $1",
                &[&wallet_address],
            )
            .await?;
        if let Some(row) = existing {
            return Ok((row_to_user(&row), false));
        }

        let inserted = client
            .query_opt(
                "INSERT INTO social.users (wallet_address) VALUES ($1)
                 ON CONFLICT (wallet_address) DO NOTHING
                 RETURNING id, wallet_address, created_at, updated_at",
                &[&wallet_address],
            )
            .await?;
        if let Some(row) = inserted {
            return Ok((row_to_user(&row), true));
        }

        // Lost a creation race; the row exists now.
        let row = client
            .query_one(
                "SELECT id, wallet_address, created_at, updated_at
                 FROM social.users WHERE wallet_address = $1",
                &[&wallet_address],
            )
            .await
            .context("user vanished after conflicting insert")?;
        Ok((row_to_user(&row), false))
    }

    async fn find_user(&self, wallet_address: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, wallet_address, created_at, updated_at
                 FROM social.users WHERE wallet_address = $1",
                &[&wallet_address],
            )
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO social.comments (id, token_address, user_id, wallet_address, content, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &comment.id,
                    &comment.token_address,
                    &comment.user_id,
                    &comment.wallet_address,
                    &comment.content,
                    &comment.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn latest_comments(&self, token_address: &str, limit: u32) -> Result<Vec<Comment>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, token_address, user_id, wallet_address, content, created_at
                 FROM social.comments
                 WHERE token_address = $1
                 ORDER BY created_at DESC
                 LIMIT $2",
                &[&token_address, &(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_comment).collect())
    }

    async fn prune_comments(&self, token_address: &str, keep: u32) -> Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM social.comments
                 WHERE token_address = $1
                   AND id NOT IN (
                       SELECT id FROM social.comments
                       WHERE token_address = $1
                       ORDER BY created_at DESC
                       LIMIT $2
                   )",
                &[&token_address, &(keep as i64)],
            )
            .await?;
        Ok(deleted)
    }

    async fn add_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let added = client
            .execute(
                "INSERT INTO social.watchlist_entries (user_id, token_address)
                 SELECT $1, t.token FROM UNNEST($2::text[]) AS t(token)
                 ON CONFLICT (user_id, token_address) DO NOTHING",
                &[&user_id, &tokens],
            )
            .await?;
        Ok(added)
    }

    async fn existing_watchlist_tokens(
        &self,
        user_id: i64,
        tokens: &[String],
    ) -> Result<Vec<String>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT token_address FROM social.watchlist_entries
                 WHERE user_id = $1 AND token_address = ANY($2)",
                &[&user_id, &tokens],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("token_address")).collect())
    }

    async fn remove_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM social.watchlist_entries
                 WHERE user_id = $1 AND token_address = ANY($2)",
                &[&user_id, &tokens],
            )
            .await?;
        Ok(removed)
    }

    async fn watchlist_page(
        &self,
        user_id: i64,
        skip: u64,
        limit: u32,
    ) -> Result<(Vec<WatchlistEntry>, u64)> {
        let client = self.pool.get().await?;

        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) AS total FROM social.watchlist_entries WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .get("total");

        let rows = client
            .query(
                "SELECT id, user_id, token_address, created_at, updated_at
                 FROM social.watchlist_entries
                 WHERE user_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2 OFFSET $3",
                &[&user_id, &(limit as i64), &(skip as i64)],
            )
            .await?;

        Ok((
            rows.iter().map(row_to_watchlist_entry).collect(),
            total as u64,
        ))
    }

    async fn watchlist_contains(&self, user_id: i64, token_address: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM social.watchlist_entries
                     WHERE user_id = $1 AND token_address = $2
                 ) AS present",
                &[&user_id, &token_address],
            )
            .await?;
        Ok(row.get("present"))
    }

    async fn watchlist_count(&self, user_id: i64) -> Result<u64> {
        let client = self.pool.get().await?;
        let total: i64 = client
            .query_one(
                "SELECT COUNT(*) AS total FROM social.watchlist_entries WHERE user_id = $1",
                &[&user_id],
            )
            .await?
            .get("total");
        Ok(total as u64)
    }

    async fn health_check(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }
}
