//! Write-through cache for classified tokens.
//!
//! Two partitions keyed by app type are persisted as TTL'd JSON blobs in
//! the KV store. Merges are address-keyed newest-wins; first-seen addresses
//! are announced on the event bus so they join the live discovery feed.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use log::info;

use crate::events::{topics, EventBus};
use crate::feed::LaunchpadToken;
use crate::kv::KvGateway;

use super::records::{AppType, PartitionMeta, TokenPartition, TokenRecord};

/// Counters reported back to the scanner after a store.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreOutcome {
    pub tokens_added: usize,
    pub zora_tokens: usize,
    pub tba_tokens: usize,
}

pub struct TokenRepository {
    kv: KvGateway,
    bus: Arc<EventBus>,
    ttl_secs: u64,
    network: String,
    chain_id: u64,
}

impl TokenRepository {
    pub fn new(
        kv: KvGateway,
        bus: Arc<EventBus>,
        ttl_secs: u64,
        network: String,
        chain_id: u64,
    ) -> Self {
        Self {
            kv,
            bus,
            ttl_secs,
            network,
            chain_id,
        }
    }

    /// Merge records into their partitions and persist both blobs.
    pub async fn store(&self, records: Vec<TokenRecord>) -> Result<StoreOutcome> {
        if records.is_empty() {
            return Ok(StoreOutcome::default());
        }

        let mut primary = self.load_partition(AppType::Primary).await?;
        let mut paired = self.load_partition(AppType::Paired).await?;

        let known: HashSet<String> = primary
            .records
            .iter()
            .chain(paired.records.iter())
            .map(|r| r.token_address.clone())
            .collect();
        let first_seen: Vec<TokenRecord> = records
            .iter()
            .filter(|r| !known.contains(&r.token_address))
            .cloned()
            .collect();

        let mut outcome = StoreOutcome {
            tokens_added: records.len(),
            ..Default::default()
        };

        let (primary_records, paired_records): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| r.app_type == AppType::Primary);
        outcome.zora_tokens = primary_records.len();
        outcome.tba_tokens = paired_records.len();

        if !primary_records.is_empty() {
            primary.merge(primary_records);
            self.kv
                .set_json(AppType::Primary.kv_key(), &primary, Some(self.ttl_secs))
                .await?;
        }
        if !paired_records.is_empty() {
            paired.merge(paired_records);
            self.kv
                .set_json(AppType::Paired.kv_key(), &paired, Some(self.ttl_secs))
                .await?;
        }

        for record in first_seen {
            let announcement = self.announce(&record);
            self.bus
                .emit(
                    topics::NEW_TOKEN_CREATED,
                    &record.token_address,
                    serde_json::to_value(&announcement)?,
                )
                .await;
        }

        info!(
            "Stored {} token record(s) ({} zora, {} tba)",
            outcome.tokens_added, outcome.zora_tokens, outcome.tba_tokens
        );

        Ok(outcome)
    }

    fn announce(&self, record: &TokenRecord) -> LaunchpadToken {
        let created_at: DateTime<Utc> = Utc
            .timestamp_opt(record.discovery_timestamp as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        LaunchpadToken {
            address: record.token_address.clone(),
            name: record.token_name.clone(),
            symbol: record.token_symbol.clone(),
            network: self.network.clone(),
            protocol: record.coin_type.clone(),
            network_id: self.chain_id,
            created_at,
            price_usd: record.human_price.parse().ok(),
            market_cap: None,
            volume24: None,
            holders: None,
            image_url: None,
            graduation_percent: None,
            launchpad_protocol: None,
            timestamp: Utc::now(),
        }
    }

    async fn load_partition(&self, app_type: AppType) -> Result<TokenPartition> {
        Ok(self
            .kv
            .get_json(app_type.kv_key())
            .await?
            .unwrap_or_else(|| TokenPartition::empty(app_type)))
    }

    /// Both partitions, primary first.
    pub async fn all(&self) -> Result<Vec<TokenPartition>> {
        Ok(vec![
            self.load_partition(AppType::Primary).await?,
            self.load_partition(AppType::Paired).await?,
        ])
    }

    pub async fn by_partition(&self, name: &str) -> Result<Option<TokenPartition>> {
        let Some(app_type) = AppType::from_partition_name(name) else {
            return Ok(None);
        };
        let partition = self.load_partition(app_type).await?;
        Ok(Some(partition))
    }

    pub async fn meta(&self) -> Result<Vec<(String, PartitionMeta)>> {
        let partitions = self.all().await?;
        Ok(partitions
            .into_iter()
            .map(|p| (p.name.clone(), p.meta))
            .collect())
    }

    /// Re-arm the partition TTLs so a quiet scanner does not let the cached
    /// blobs expire between scans.
    pub async fn refresh_ttl(&self) -> Result<()> {
        for key in [AppType::Primary.kv_key(), AppType::Paired.kv_key()] {
            if self.kv.exists(key).await? {
                self.kv.expire(key, self.ttl_secs).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::kv::MemoryKv;
    use crate::tokens::records::test_record;
    use std::sync::Mutex;

    fn repository() -> (TokenRepository, Arc<EventBus>) {
        let bus = EventBus::new();
        let kv = KvGateway::new(Arc::new(MemoryKv::new()));
        (
            TokenRepository::new(kv, bus.clone(), 3600, "base".to_string(), 8453),
            bus,
        )
    }

    #[tokio::test]
    async fn store_partitions_by_app_type() {
        let (repo, _bus) = repository();

        let outcome = repo
            .store(vec![
                test_record("0xaaa", AppType::Primary, "1.000000"),
                test_record("0xbbb", AppType::Paired, "2.000000"),
                test_record("0xccc", AppType::Paired, "3.000000"),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.tokens_added, 3);
        assert_eq!(outcome.zora_tokens, 1);
        assert_eq!(outcome.tba_tokens, 2);

        let zora = repo.by_partition("zora").await.unwrap().unwrap();
        assert_eq!(zora.records.len(), 1);
        let tba = repo.by_partition("tba").await.unwrap().unwrap();
        assert_eq!(tba.records.len(), 2);
        assert_eq!(tba.meta.total_tokens, 2);
    }

    #[tokio::test]
    async fn repeated_store_merges_newest_wins() {
        let (repo, _bus) = repository();

        repo.store(vec![test_record("0xaaa", AppType::Paired, "1.000000")])
            .await
            .unwrap();
        repo.store(vec![test_record("0xaaa", AppType::Paired, "9.000000")])
            .await
            .unwrap();

        let tba = repo.by_partition("tba").await.unwrap().unwrap();
        assert_eq!(tba.records.len(), 1);
        assert_eq!(tba.records[0].human_price, "9.000000");
    }

    #[tokio::test]
    async fn first_seen_addresses_are_announced_once() {
        let (repo, bus) = repository();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(
            topics::NEW_TOKEN_CREATED,
            Arc::new(move |event: Event| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push(event.aggregate_id);
                })
            }),
        )
        .unwrap();

        repo.store(vec![test_record("0xaaa", AppType::Paired, "1.000000")])
            .await
            .unwrap();
        // Same address again: merge, no announcement.
        repo.store(vec![test_record("0xaaa", AppType::Paired, "2.000000")])
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["0xaaa"]);
    }

    #[tokio::test]
    async fn unknown_partition_name_is_none() {
        let (repo, _bus) = repository();
        assert!(repo.by_partition("nope").await.unwrap().is_none());
    }
}
