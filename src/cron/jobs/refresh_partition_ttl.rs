//! Re-arms the token partition TTLs.
//!
//! A quiet scanner writes nothing, so without this job the cached partitions
//! would expire between scans.

use anyhow::Result;

use crate::tokens::TokenRepository;

pub async fn run(repository: &TokenRepository) -> Result<()> {
    repository.refresh_ttl().await
}
