//! Top-level runtime: owns the two cores as explicit dependencies
//!
//! Per the design note in spec.md §9 ("pass them as explicit dependencies
//! into request handlers rather than accessing via module globals"), every
//! global singleton the original implementation held at module scope
//! (allocator, health checker, registry) is instead a field on this struct,
//! constructed once in `main` and handed to collaborators by reference.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use credential::ManagerRegistry;
use store::{JsonFileStore, PersistentStore};

use allocator::{Allocator, HealthChecker};

use crate::config::Config;

pub struct Runtime {
    pub store: Arc<dyn PersistentStore>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<ManagerRegistry>,
    pub allocator: Arc<Allocator>,
    pub health_checker: Arc<HealthChecker>,
}

impl Runtime {
    pub async fn build(config: &Config, encryption_key: store::EncryptionKey) -> anyhow::Result<Self> {
        let store: Arc<dyn PersistentStore> = Arc::new(
            JsonFileStore::load(config.store.path.clone(), encryption_key).await?,
        );
        let clock: Arc<dyn Clock> = Arc::new(common::SystemClock);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.store.http_timeout_secs))
            .build()?;

        let registry = Arc::new(ManagerRegistry::with_refresh_threshold_secs(
            Arc::clone(&store),
            Arc::clone(&clock),
            http_client.clone(),
            config.identity.token_refresh_threshold,
        ));

        let allocator = Arc::new(Allocator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.allocation.token_allocation_strategy,
            config.allocation.token_min_success_rate,
            config.allocation.self_use_mode,
        ));

        let health_checker = Arc::new(HealthChecker::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            http_client,
            config.allocation.token_health_check_interval,
        ));

        Ok(Self {
            store,
            clock,
            registry,
            allocator,
            health_checker,
        })
    }
}
