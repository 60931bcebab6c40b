//! Lazily-constructed, cached credential managers
//!
//! One process-wide mutex guards only the id → manager map. Each manager
//! owns its own finer-grained lock, so contention on the map never blocks a
//! refresh in progress.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use common::Clock;
use store::PersistentStore;

use crate::error::{Error, Result};
use crate::manager::CredentialManager;

/// Maps identity id → `CredentialManager`, constructing on first use.
pub struct ManagerRegistry {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
    refresh_threshold_secs: u64,
    managers: Mutex<HashMap<u64, Arc<CredentialManager>>>,
}

impl ManagerRegistry {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, http_client: reqwest::Client) -> Self {
        Self::with_refresh_threshold_secs(
            store,
            clock,
            http_client,
            crate::manager::DEFAULT_REFRESH_THRESHOLD_SECS,
        )
    }

    pub fn with_refresh_threshold_secs(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        refresh_threshold_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            http_client,
            refresh_threshold_secs,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached manager for `identity_id`, constructing it from the
    /// store on first use. Fails with `CredentialsMissing` if the identity
    /// has no recoverable credentials.
    pub async fn get_or_create(&self, identity_id: u64) -> Result<Arc<CredentialManager>> {
        let mut managers = self.managers.lock().await;
        if let Some(existing) = managers.get(&identity_id) {
            return Ok(Arc::clone(existing));
        }

        let identity = self
            .store
            .get_identity(identity_id)
            .await?
            .ok_or(Error::CredentialsMissing(identity_id))?;
        let creds = self
            .store
            .get_token_credentials(identity_id)
            .await?
            .ok_or(Error::CredentialsMissing(identity_id))?;

        let manager = Arc::new(
            CredentialManager::new(
                identity_id,
                identity.region.clone(),
                creds.refresh_token,
                creds.client_id,
                creds.client_secret,
                None,
                Arc::clone(&self.store),
                Arc::clone(&self.clock),
                self.http_client.clone(),
            )
            .with_refresh_threshold_secs(self.refresh_threshold_secs),
        );

        managers.insert(identity_id, Arc::clone(&manager));
        Ok(manager)
    }

    /// Remove a cached manager, e.g. on identity deletion. A subsequent
    /// `get_or_create` reconstructs it from the store.
    pub async fn evict(&self, identity_id: u64) {
        self.managers.lock().await.remove(&identity_id);
    }

    pub async fn len(&self) -> usize {
        self.managers.lock().await.len()
    }
}
