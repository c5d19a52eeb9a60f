use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

/// How many times to try reaching PostgreSQL before giving up at startup.
const CONNECT_ATTEMPTS: u32 = 3;

/// PostgreSQL client with connection pooling.
///
/// System of record for users, comments, and watchlist entries; the Redis
/// caches layered on top are advisory. Startup retries the first connection
/// a bounded number of times, then aborts the process.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        let pool = build_pool(&settings)?;

        for attempt in 1..=CONNECT_ATTEMPTS {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self { pool });
                },
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "PostgreSQL not reachable (attempt {attempt}/{CONNECT_ATTEMPTS}): {e}; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    return Err(anyhow::anyhow!(e)).with_context(|| {
                        format!("Failed to connect to PostgreSQL after {CONNECT_ATTEMPTS} attempts")
                    });
                },
            }
        }

        unreachable!("connect loop always returns");
    }

    /// Apply `schema/postgres.sql`. Statements are split on semicolons with
    /// awareness of `$$ ... $$` function bodies.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        let client = self.pool.get().await?;
        for stmt in split_sql_statements(&schema) {
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Migration statement failed: {stmt}"))?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

fn build_pool(settings: &PostgresSettings) -> anyhow::Result<Pool> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .password(&settings.password)
        .dbname(&settings.database);

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(settings.pool_size)
        .build()
        .context("Failed to create PostgreSQL connection pool")
}

/// Split SQL into statements, treating semicolons inside dollar-quoted
/// blocks as content rather than separators.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let mut prev_dollar = false;

    for (i, c) in sql.char_indices() {
        match c {
            '$' if prev_dollar => {
                in_dollar_quote = !in_dollar_quote;
                prev_dollar = false;
            },
            '$' => prev_dollar = true,
            ';' if !in_dollar_quote => {
                let stmt = sql[start..i].trim();
                if !stmt.is_empty() {
                    statements.push(stmt);
                }
                start = i + 1;
                prev_dollar = false;
            },
            _ => prev_dollar = false,
        }
    }

    let tail = sql[start..].trim();
    if !tail.is_empty() {
        statements.push(tail);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);
    }

    #[test]
    fn ignores_semicolons_inside_dollar_quotes() {
        let sql =
            "CREATE FUNCTION f() RETURNS void AS $$ BEGIN; END; $$ LANGUAGE plpgsql; SELECT 1;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("BEGIN; END;"));
        assert_eq!(stmts[1], "SELECT 1");
    }

    #[test]
    fn keeps_a_trailing_statement_without_semicolon() {
        let stmts = split_sql_statements("SELECT 1; SELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }
}
