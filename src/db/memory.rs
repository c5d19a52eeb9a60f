//! In-memory [`SocialStore`] implementation.
//!
//! Mirrors the PostgreSQL semantics the engines rely on (unique wallet rows,
//! skip-duplicate watchlist inserts, newest-first ordering) so engine logic
//! is testable without a database.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::models::{Comment, User, WatchlistEntry};
use super::SocialStore;

#[derive(Default)]
struct State {
    users: Vec<User>,
    comments: Vec<Comment>,
    watchlist: Vec<WatchlistEntry>,
    next_user_id: i64,
    next_entry_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SocialStore for MemoryStore {
    async fn get_or_create_user(&self, wallet_address: &str) -> Result<(User, bool)> {
        let mut state = self.state.lock().unwrap();

        if let Some(user) = state
            .users
            .iter()
            .find(|u| u.wallet_address == wallet_address)
        {
            return Ok((user.clone(), false));
        }

        state.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: state.next_user_id,
            wallet_address: wallet_address.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok((user, true))
    }

    async fn find_user(&self, wallet_address: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.wallet_address == wallet_address)
            .cloned())
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.comments.iter().any(|c| c.id == comment.id) {
            state.comments.push(comment.clone());
        }
        Ok(())
    }

    async fn latest_comments(&self, token_address: &str, limit: u32) -> Result<Vec<Comment>> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<Comment> = state
            .comments
            .iter()
            .filter(|c| c.token_address == token_address)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn prune_comments(&self, token_address: &str, keep: u32) -> Result<u64> {
        let mut state = self.state.lock().unwrap();

        let mut matching: Vec<(usize, chrono::DateTime<Utc>)> = state
            .comments
            .iter()
            .enumerate()
            .filter(|(_, c)| c.token_address == token_address)
            .map(|(i, c)| (i, c.created_at))
            .collect();
        matching.sort_by(|a, b| b.1.cmp(&a.1));

        let doomed: Vec<usize> = matching
            .into_iter()
            .skip(keep as usize)
            .map(|(i, _)| i)
            .collect();
        let deleted = doomed.len() as u64;

        let mut index = 0usize;
        state.comments.retain(|_| {
            let keep_row = !doomed.contains(&index);
            index += 1;
            keep_row
        });

        Ok(deleted)
    }

    async fn add_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut added = 0u64;
        for token in tokens {
            let exists = state
                .watchlist
                .iter()
                .any(|e| e.user_id == user_id && &e.token_address == token);
            if exists {
                continue;
            }
            state.next_entry_id += 1;
            let now = Utc::now();
            let id = state.next_entry_id;
            state.watchlist.push(WatchlistEntry {
                id,
                user_id,
                token_address: token.clone(),
                created_at: now,
                updated_at: now,
            });
            added += 1;
        }
        Ok(added)
    }

    async fn existing_watchlist_tokens(
        &self,
        user_id: i64,
        tokens: &[String],
    ) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .watchlist
            .iter()
            .filter(|e| e.user_id == user_id && tokens.contains(&e.token_address))
            .map(|e| e.token_address.clone())
            .collect())
    }

    async fn remove_watchlist_entries(&self, user_id: i64, tokens: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.watchlist.len();
        state
            .watchlist
            .retain(|e| !(e.user_id == user_id && tokens.contains(&e.token_address)));
        Ok((before - state.watchlist.len()) as u64)
    }

    async fn watchlist_page(
        &self,
        user_id: i64,
        skip: u64,
        limit: u32,
    ) -> Result<(Vec<WatchlistEntry>, u64)> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<WatchlistEntry> = state
            .watchlist
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        // Newest first; equal timestamps fall back to insertion order.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn watchlist_contains(&self, user_id: i64, token_address: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .watchlist
            .iter()
            .any(|e| e.user_id == user_id && e.token_address == token_address))
    }

    async fn watchlist_count(&self, user_id: i64) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .watchlist
            .iter()
            .filter(|e| e.user_id == user_id)
            .count() as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
