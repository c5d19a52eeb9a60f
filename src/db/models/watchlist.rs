use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One watched token for one user. `(user_id, token_address)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistEntry {
    pub id: i64,
    pub user_id: i64,
    /// Stored lower-cased.
    pub token_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
