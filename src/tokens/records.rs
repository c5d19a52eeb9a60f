//! Classified token records and their cached partitions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the configured base pairings a pool fell on.
///
/// `Primary` pools pair two non-base currencies ("ZORA" tokens);
/// `Paired` pools quote a token against a configured base currency ("TBA").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppType {
    Primary,
    Paired,
}

impl AppType {
    /// KV key holding this partition's JSON blob.
    pub fn kv_key(&self) -> &'static str {
        match self {
            Self::Primary => "zora:tokens",
            Self::Paired => "tba:tokens",
        }
    }

    /// Short partition name used in URLs and metadata.
    pub fn partition_name(&self) -> &'static str {
        match self {
            Self::Primary => "zora",
            Self::Paired => "tba",
        }
    }

    pub fn from_partition_name(name: &str) -> Option<Self> {
        match name {
            "zora" => Some(Self::Primary),
            "tba" => Some(Self::Paired),
            _ => None,
        }
    }
}

/// A classified, priced token discovered from a pool-initialization event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Hex-encoded 32-byte pool ID; stable across instances.
    pub pool_id: String,
    pub app_type: AppType,
    pub coin_type: String,
    /// Lower-cased; the zero address when the token side is native.
    pub token_address: String,
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub current_tick: i32,
    pub sqrt_price_x96: String,
    /// Display price of the token, 6 significant digits.
    pub human_price: String,
    pub discovery_block: u64,
    pub discovery_timestamp: u64,
}

/// Aggregate statistics for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMeta {
    pub last_updated_at: DateTime<Utc>,
    pub total_tokens: u64,
    pub by_coin_type: HashMap<String, u64>,
}

/// A named partition of token records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPartition {
    pub name: String,
    pub records: Vec<TokenRecord>,
    pub meta: PartitionMeta,
}

impl TokenPartition {
    pub fn empty(app_type: AppType) -> Self {
        Self {
            name: app_type.partition_name().to_string(),
            records: Vec::new(),
            meta: PartitionMeta {
                last_updated_at: Utc::now(),
                total_tokens: 0,
                by_coin_type: HashMap::new(),
            },
        }
    }

    /// Merge new records by token address with newest-wins semantics, then
    /// recompute metadata. Existing record order is preserved; unseen
    /// addresses append.
    pub fn merge(&mut self, new_records: Vec<TokenRecord>) {
        let mut index: HashMap<String, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.token_address.clone(), i))
            .collect();

        for record in new_records {
            match index.get(&record.token_address) {
                Some(&i) => self.records[i] = record,
                None => {
                    index.insert(record.token_address.clone(), self.records.len());
                    self.records.push(record);
                },
            }
        }

        self.recompute_meta();
    }

    fn recompute_meta(&mut self) {
        let mut by_coin_type: HashMap<String, u64> = HashMap::new();
        for record in &self.records {
            *by_coin_type.entry(record.coin_type.clone()).or_default() += 1;
        }

        self.meta = PartitionMeta {
            last_updated_at: Utc::now(),
            total_tokens: self.records.len() as u64,
            by_coin_type,
        };
    }
}

#[cfg(test)]
pub(crate) fn test_record(address: &str, app_type: AppType, price: &str) -> TokenRecord {
    TokenRecord {
        pool_id: format!("0x{:064x}", 1),
        app_type,
        coin_type: "ZoraCreator".to_string(),
        token_address: address.to_string(),
        token_name: "Test".to_string(),
        token_symbol: "TST".to_string(),
        token_decimals: 18,
        current_tick: 0,
        sqrt_price_x96: "79228162514264337593543950336".to_string(),
        human_price: price.to_string(),
        discovery_block: 100,
        discovery_timestamp: 1_700_000_000,
    }
}
