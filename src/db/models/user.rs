use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user keyed by wallet address.
///
/// Identity is the wallet address asserted by the caller; rows are created
/// lazily the first time a wallet comments or builds a watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    /// Stored lower-cased.
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
