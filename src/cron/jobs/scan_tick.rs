//! Periodic scan trigger.
//!
//! Fires every `scanner.interval_seconds`; a tick arriving while a scan is
//! still running is dropped, not queued.

use anyhow::Result;
use log::debug;

use crate::scanner::TokenScanner;

pub async fn run(scanner: &TokenScanner) -> Result<()> {
    match scanner.scan().await? {
        Some(_result) => Ok(()),
        None => {
            debug!("Scan tick skipped; previous scan still running");
            Ok(())
        },
    }
}
