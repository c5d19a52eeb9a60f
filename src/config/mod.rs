mod config;

pub use config::{
    ChainSettings, ClassifierConfig, ClassifierSettings, ExternalFeedSettings, HttpSettings,
    KvSettings, PostgresSettings, ScanWindow, ScannerSettings, Settings,
};
