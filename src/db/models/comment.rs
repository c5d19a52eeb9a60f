use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a comment: returned as `Processing` from the synchronous
/// path, flipped to `Persisted` by the background handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Processing,
    Persisted,
}

/// A token commentary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// `comment_<epoch_ms>_<random>`
    pub id: String,
    /// Stored lower-cased.
    pub token_address: String,
    pub user_id: i64,
    pub wallet_address: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: CommentStatus,
}
