use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

/// Connection attempts before giving up at boot.
const CONNECT_MAX_ATTEMPTS: u32 = 5;
/// Base backoff between attempts. Actual delay is base * 2^attempt.
const CONNECT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Connect with bounded exponential backoff. The pool is sized for the
/// worker concurrency plus ingress headroom.
pub async fn connect(database_url: &str, worker_concurrency: usize) -> Result<PgPool> {
    let max_connections = (worker_concurrency as u32).saturating_mul(2).max(10);

    let mut last_err = None;
    for attempt in 0..CONNECT_MAX_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!(max_connections, "Connected to durable store");
                return Ok(pool);
            }
            Err(e) => {
                let backoff = CONNECT_BACKOFF_BASE * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "Durable store connection failed, retrying after backoff"
                );
                last_err = Some(e);
                if attempt + 1 < CONNECT_MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_err.unwrap()).context("Durable store unreachable after retries")
}
