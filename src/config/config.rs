use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Pool scanner configuration.
///
/// The scan window mode is deliberately mandatory: the service refuses to
/// start without an explicit choice between a fixed block window and a
/// sliding window anchored at the chain tip.
#[derive(Debug, Deserialize, Clone)]
pub struct ScannerSettings {
    pub start_block: u64,
    pub block_range: u64,
    #[serde(default = "default_scan_interval_seconds")]
    pub interval_seconds: u64,
    pub window: ScanWindow,
    #[serde(default = "default_partition_ttl_secs")]
    pub partition_ttl_secs: u64,
}

/// Block window strategy for each scan cycle.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanWindow {
    /// `[start_block, start_block + block_range]`
    Fixed,
    /// `[latest - block_range, latest]`
    Sliding,
}

fn default_scan_interval_seconds() -> u64 {
    2
}

fn default_partition_ttl_secs() -> u64 {
    3600
}

/// Chain RPC configuration for the single indexed L2.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub chain_id: u64,
    #[serde(default = "default_network")]
    pub network: String,
    pub rpc_url: String,
    pub pool_manager_address: String,
    pub state_view_address: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_network() -> String {
    "base".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

/// Token classification configuration.
///
/// `hooks` maps a V4 hook contract address to the coin type it mints;
/// pools whose hook matches neither entry are ignored by the scanner.
/// `base_pairings` is the set of quote currencies used to decide which
/// side of a pair is "the token".
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierSettings {
    pub hooks: HashMap<String, String>,
    pub base_pairings: Vec<String>,
}

impl ClassifierSettings {
    /// Parse the configured addresses into their typed form.
    ///
    /// Fails startup on a malformed address rather than silently skipping it.
    pub fn compile(&self) -> anyhow::Result<ClassifierConfig> {
        let mut hooks = HashMap::with_capacity(self.hooks.len());
        for (addr, coin_type) in &self.hooks {
            let parsed: Address = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid hook address {addr}: {e}"))?;
            hooks.insert(parsed, coin_type.clone());
        }

        let mut base_pairings = HashSet::with_capacity(self.base_pairings.len());
        for addr in &self.base_pairings {
            let parsed: Address = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid base pairing address {addr}: {e}"))?;
            base_pairings.insert(parsed);
        }

        Ok(ClassifierConfig {
            hooks,
            base_pairings,
        })
    }
}

/// Typed classifier lookup tables, compiled once at startup.
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    pub hooks: HashMap<Address, String>,
    pub base_pairings: HashSet<Address>,
}

impl ClassifierConfig {
    pub fn coin_type_for(&self, hook: &Address) -> Option<&str> {
        self.hooks.get(hook).map(String::as_str)
    }

    pub fn is_base_pairing(&self, address: &Address) -> bool {
        self.base_pairings.contains(address)
    }
}

/// Redis connection configuration.
///
/// One URL serves both the command pool and the dedicated subscribe
/// connection; the subscribe side never multiplexes commands.
#[derive(Debug, Deserialize, Clone)]
pub struct KvSettings {
    pub url: String,
    #[serde(default = "default_kv_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_kv_timeout_secs() -> u64 {
    5
}

/// PostgreSQL database connection configuration.
///
/// Used for storing users, comments, and watchlist entries. The relational
/// store is the system of record; Redis caches are advisory.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// HTTP server configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Allowed CORS origins; empty list means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_rate_limit_ttl_ms")]
    pub rate_limit_ttl_ms: u64,
    #[serde(default = "default_rate_limit_limit")]
    pub rate_limit_limit: u32,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_rate_limit_ttl_ms() -> u64 {
    60_000
}

fn default_rate_limit_limit() -> u32 {
    100
}

/// Upstream launchpad feed configuration.
///
/// When disabled the ingestor is not spawned; the rest of the new-tokens
/// surface still works from whatever the cache holds.
#[derive(Debug, Deserialize, Clone)]
pub struct ExternalFeedSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub network_ids: Vec<u64>,
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub scanner: ScannerSettings,
    pub chain: ChainSettings,
    pub classifier: ClassifierSettings,
    pub kv: KvSettings,
    pub postgres: PostgresSettings,
    #[serde(default = "default_http_settings")]
    pub http: HttpSettings,
    #[serde(default = "default_external_feed")]
    pub external_feed: ExternalFeedSettings,
}

fn default_http_settings() -> HttpSettings {
    HttpSettings {
        bind_address: default_bind_address(),
        cors_origins: Vec::new(),
        rate_limit_ttl_ms: default_rate_limit_ttl_ms(),
        rate_limit_limit: default_rate_limit_limit(),
    }
}

fn default_external_feed() -> ExternalFeedSettings {
    ExternalFeedSettings {
        enabled: false,
        url: String::new(),
        api_key: String::new(),
        protocols: Vec::new(),
        network_ids: Vec::new(),
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
