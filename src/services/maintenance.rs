//! Background maintenance.
//!
//! Periodically expires abandoned carts, deletes expired login sessions and
//! drops cache entries past their retention window.

use anyhow::Result;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::config::MaintenanceConfig;
use crate::db::now_timestamp;
use crate::DbPool;

use super::cache::QueryCache;
use super::cart::CartService;

pub struct Maintenance {
    db: DbPool,
    carts: CartService,
    cache: Arc<QueryCache>,
}

/// Statistics from a maintenance run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub carts_expired: u64,
    pub sessions_removed: u64,
    pub cache_entries_purged: usize,
}

impl Maintenance {
    pub fn new(db: DbPool, carts: CartService, cache: Arc<QueryCache>) -> Self {
        Self { db, carts, cache }
    }

    /// Run a single sweep
    pub async fn run_once(&self) -> Result<MaintenanceStats> {
        let carts_expired = self.carts.expire_stale_carts().await?;

        let sessions_removed = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_timestamp())
            .execute(&self.db)
            .await?
            .rows_affected();

        let stats = MaintenanceStats {
            carts_expired,
            sessions_removed,
            cache_entries_purged: self.cache.purge_expired(),
        };

        if stats != MaintenanceStats::default() {
            tracing::info!(
                carts_expired = stats.carts_expired,
                sessions_removed = stats.sessions_removed,
                cache_entries_purged = stats.cache_entries_purged,
                "Maintenance sweep completed"
            );
        } else {
            tracing::debug!("Maintenance sweep found nothing to do");
        }

        Ok(stats)
    }
}

/// Spawn the background maintenance task
pub fn spawn_maintenance_task(maintenance: Maintenance, config: &MaintenanceConfig) {
    if !config.enabled {
        tracing::info!("Maintenance sweeps are disabled");
        return;
    }

    let interval_secs = config.sweep_interval_secs.max(1);
    tracing::info!(interval_secs = interval_secs, "Starting maintenance task");

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = maintenance.run_once().await {
                tracing::error!(error = %e, "Maintenance sweep failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CartOwner;
    use crate::services::cart::tests::fixture;

    #[tokio::test]
    async fn test_sweep_expires_carts_and_sessions() {
        let f = fixture().await;
        let cache = Arc::new(QueryCache::new(
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(600),
        ));
        let maintenance = Maintenance::new(f.pool.clone(), f.carts.clone(), cache);

        let owner = CartOwner::Session("s".to_string());
        let cart = f.carts.get_or_create_cart(&f.restaurant, &owner).await.unwrap();
        assert_eq!(maintenance.run_once().await.unwrap(), MaintenanceStats::default());

        sqlx::query("UPDATE carts SET expires_at = '2000-01-01T00:00:00Z' WHERE id = ?")
            .bind(&cart.id)
            .execute(&f.pool)
            .await
            .unwrap();
        let user_id = crate::db::create_user(&f.pool, "a@example.com", "hash", "A", &[])
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES ('s1', ?, 'h', '2000-01-01T00:00:00Z', '2000-01-01T00:00:00Z')",
        )
        .bind(&user_id)
        .execute(&f.pool)
        .await
        .unwrap();

        let stats = maintenance.run_once().await.unwrap();
        assert_eq!(stats.carts_expired, 1);
        assert_eq!(stats.sessions_removed, 1);
    }
}
