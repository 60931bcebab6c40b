//! Background health probing loop
//!
//! Walks every active-or-invalid identity, probing each through a transient
//! `CredentialManager` (never the registry's cached one, so a probe failure
//! can never corrupt a request-serving manager's token), and transitions
//! status on recovery or failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::Clock;
use credential::CredentialManager;
use store::{IdentityRecord, PersistentStore, Status};

struct Running {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct HealthChecker {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
    interval_secs: u64,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            http_client,
            interval_secs,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Begin the background loop. Idempotent: a second call while already
    /// running logs a warning and is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("health checker already running, ignoring start()");
            return;
        }

        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { this.run_loop(loop_cancel).await });
        *running = Some(Running { handle, cancel });
    }

    /// Cancel the task and await its completion. Safe to call when not
    /// running.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(Running { handle, cancel }) = running {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    /// Run a single full sweep on demand, outside the periodic loop.
    pub async fn check_all(&self) -> store::Result<()> {
        let cancel = CancellationToken::new();
        self.check_cycle(&cancel).await
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(self.interval_secs)) => {}
            }
            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = self.check_cycle(&cancel).await {
                warn!(error = %e, "health check cycle failed, retrying in 60s");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            }
        }
    }

    async fn check_cycle(&self, cancel: &CancellationToken) -> store::Result<()> {
        let mut identities = self.store.get_tokens_by_status(Status::Active).await?;
        identities.extend(self.store.get_tokens_by_status(Status::Invalid).await?);

        let mut first = true;
        for identity in identities {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if !first {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
            first = false;

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.probe_and_transition(&identity) => {}
            }
        }
        Ok(())
    }

    async fn probe_and_transition(&self, identity: &IdentityRecord) {
        let ok = self.probe(identity).await;
        let now = self.clock.now_millis();

        if let Err(e) = self
            .store
            .record_health_check(identity.id, ok, None, now)
            .await
        {
            warn!(identity_id = identity.id, error = %e, "failed to record health check");
            return;
        }

        match (identity.status, ok) {
            (Status::Active, false) => {
                warn!(identity_id = identity.id, "health probe failed, quarantining identity");
                if let Err(e) = self.store.set_token_status(identity.id, Status::Invalid).await {
                    warn!(identity_id = identity.id, error = %e, "failed to quarantine identity");
                } else {
                    metrics::counter!("health_checker_transitions_total", "transition" => "quarantine")
                        .increment(1);
                }
            }
            (Status::Invalid, true) => {
                info!(identity_id = identity.id, "health probe recovered, reactivating identity");
                if let Err(e) = self.store.set_token_status(identity.id, Status::Active).await {
                    warn!(identity_id = identity.id, error = %e, "failed to reactivate identity");
                } else {
                    metrics::counter!("health_checker_transitions_total", "transition" => "recover")
                        .increment(1);
                }
            }
            _ => {}
        }
    }

    async fn probe(&self, identity: &IdentityRecord) -> bool {
        let creds = match self.store.get_token_credentials(identity.id).await {
            Ok(Some(c)) => c,
            Ok(None) => return false,
            Err(e) => {
                warn!(identity_id = identity.id, error = %e, "failed to load credentials for probe");
                return false;
            }
        };

        let manager = CredentialManager::new(
            identity.id,
            identity.region.clone(),
            creds.refresh_token,
            creds.client_id,
            creds.client_secret,
            identity.profile_arn.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.http_client.clone(),
        );

        manager.force_refresh().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{EncryptionKey, JsonFileStore, Visibility};

    fn record(id: u64, status: Status) -> IdentityRecord {
        IdentityRecord {
            id,
            owner_id: None,
            visibility: Visibility::Public,
            status,
            region: "us-east-1".into(),
            profile_arn: None,
            success_count: 0,
            fail_count: 0,
            last_used: None,
            last_check_ok: None,
            last_check_error: None,
        }
    }

    async fn test_store(dir: &tempfile::TempDir) -> Arc<JsonFileStore> {
        let path = dir.path().join("identities.json");
        let key = EncryptionKey::new([7u8; 32]);
        Arc::new(JsonFileStore::load(path, key).await.unwrap())
    }

    #[tokio::test]
    async fn start_stop_is_idempotent_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn PersistentStore> = test_store(&dir).await;
        let clock: Arc<dyn Clock> = Arc::new(common::ManualClock::new());
        let checker = Arc::new(HealthChecker::new(store, clock, reqwest::Client::new(), 3600));

        checker.start().await;
        checker.start().await; // second call is a no-op, not a panic
        checker.stop().await;
        checker.stop().await; // safe when not running
    }

    #[tokio::test]
    async fn check_all_quarantines_failing_active_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store
            .put(record(1, Status::Active), "rt_1", None, None)
            .await
            .unwrap();
        let dyn_store: Arc<dyn PersistentStore> = store.clone();
        let clock: Arc<dyn Clock> = Arc::new(common::ManualClock::new());
        let checker = HealthChecker::new(dyn_store, clock, reqwest::Client::new(), 3600);

        // No stub server is reachable, so the probe fails and the identity
        // should be quarantined.
        checker.check_all().await.unwrap();

        let updated = store.get_identity(1).await.unwrap().unwrap();
        assert_eq!(updated.status, Status::Invalid);
    }
}
