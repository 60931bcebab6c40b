//! File-backed `PersistentStore` implementation
//!
//! Mirrors the write discipline of a simple JSON credential file: all
//! mutations go through one in-memory `Mutex<HashMap<..>>`, writes land on
//! disk via temp-file + rename, and 0600 permissions are set on Unix. The
//! refresh token of each identity is encrypted at rest; everything else is
//! stored as plaintext metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crypto::{self, EncryptionKey};
use crate::error::{Error, Result};
use crate::model::{IdentityRecord, Status, StoredIdentity, TokenCredentials, Visibility};

/// The operations the credential and allocation cores require from durable
/// storage. Implementations provide their own internal concurrency control;
/// callers never hold a lock across a `PersistentStore` call.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch a single identity's metadata record, used by the registry to
    /// learn an identity's region before constructing its manager.
    async fn get_identity(&self, id: u64) -> Result<Option<IdentityRecord>>;
    async fn get_user_tokens(&self, user_id: u64) -> Result<Vec<IdentityRecord>>;
    async fn get_public_tokens(&self) -> Result<Vec<IdentityRecord>>;
    async fn get_tokens_by_status(&self, status: Status) -> Result<Vec<IdentityRecord>>;
    async fn get_all_active_tokens(&self) -> Result<Vec<IdentityRecord>>;
    async fn get_token_credentials(&self, id: u64) -> Result<Option<TokenCredentials>>;
    async fn get_decrypted_token(&self, id: u64) -> Result<Option<String>>;
    async fn set_token_status(&self, id: u64, status: Status) -> Result<()>;
    async fn record_token_usage(&self, id: u64, success: bool, now_millis: u64) -> Result<()>;
    async fn record_health_check(
        &self,
        id: u64,
        ok: bool,
        error: Option<String>,
        now_millis: u64,
    ) -> Result<()>;
    /// Persist a rotated refresh token (and optionally a new profile ARN)
    /// for an identity. Called by the credential manager before its
    /// in-memory state is mutated.
    async fn rotate_refresh_token(
        &self,
        id: u64,
        new_refresh_token: &str,
        new_profile_arn: Option<String>,
    ) -> Result<()>;
}

/// JSON-file-backed store. One file holds every identity, keyed by id.
pub struct JsonFileStore {
    path: PathBuf,
    key: EncryptionKey,
    state: Mutex<HashMap<u64, StoredIdentity>>,
}

impl JsonFileStore {
    /// Load identities from `path`, creating an empty file if absent.
    pub async fn load(path: PathBuf, key: EncryptionKey) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading identity store: {e}")))?;
            let identities: Vec<StoredIdentity> = serde_json::from_str(&contents)
                .map_err(|e| Error::Serde(format!("parsing identity store: {e}")))?;
            info!(path = %path.display(), count = identities.len(), "loaded identity store");
            identities.into_iter().map(|i| (i.id, i)).collect()
        } else {
            info!(path = %path.display(), "identity store not found, starting empty");
            let empty = HashMap::new();
            write_atomic(&path, &empty).await?;
            empty
        };

        Ok(Self {
            path,
            key,
            state: Mutex::new(state),
        })
    }

    /// Insert or replace an identity along with its plaintext refresh token,
    /// encrypting the token before it ever touches disk.
    pub async fn put(
        &self,
        record: IdentityRecord,
        refresh_token: &str,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<()> {
        let (ciphertext, nonce) = crypto::encrypt(&self.key, refresh_token)?;
        let mut state = self.state.lock().await;
        state.insert(
            record.id,
            StoredIdentity {
                id: record.id,
                owner_id: record.owner_id,
                visibility: record.visibility,
                status: record.status,
                region: record.region,
                profile_arn: record.profile_arn,
                client_id,
                client_secret,
                refresh_token_ciphertext: ciphertext,
                refresh_token_nonce: nonce,
                success_count: record.success_count,
                fail_count: record.fail_count,
                last_used: record.last_used,
                last_check_ok: record.last_check_ok,
                last_check_error: record.last_check_error,
            },
        );
        write_atomic(&self.path, &state).await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn get_identity(&self, id: u64) -> Result<Option<IdentityRecord>> {
        let state = self.state.lock().await;
        Ok(state.get(&id).map(StoredIdentity::to_record))
    }

    async fn get_user_tokens(&self, user_id: u64) -> Result<Vec<IdentityRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .values()
            .filter(|i| i.owner_id == Some(user_id))
            .map(StoredIdentity::to_record)
            .collect())
    }

    async fn get_public_tokens(&self) -> Result<Vec<IdentityRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .values()
            .filter(|i| i.visibility == Visibility::Public && i.status == Status::Active)
            .map(StoredIdentity::to_record)
            .collect())
    }

    async fn get_tokens_by_status(&self, status: Status) -> Result<Vec<IdentityRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .values()
            .filter(|i| i.status == status)
            .map(StoredIdentity::to_record)
            .collect())
    }

    async fn get_all_active_tokens(&self) -> Result<Vec<IdentityRecord>> {
        self.get_tokens_by_status(Status::Active).await
    }

    async fn get_token_credentials(&self, id: u64) -> Result<Option<TokenCredentials>> {
        let state = self.state.lock().await;
        let Some(stored) = state.get(&id) else {
            return Ok(None);
        };
        let refresh_token = match crypto::decrypt(
            &self.key,
            &stored.refresh_token_ciphertext,
            &stored.refresh_token_nonce,
        ) {
            Ok(t) => t,
            Err(e) => {
                warn!(identity_id = id, error = %e, "failed to decrypt refresh token");
                return Ok(None);
            }
        };
        Ok(Some(TokenCredentials {
            refresh_token,
            client_id: stored.client_id.clone(),
            client_secret: stored.client_secret.clone(),
        }))
    }

    async fn get_decrypted_token(&self, id: u64) -> Result<Option<String>> {
        Ok(self
            .get_token_credentials(id)
            .await?
            .map(|c| c.refresh_token))
    }

    async fn set_token_status(&self, id: u64, status: Status) -> Result<()> {
        let mut state = self.state.lock().await;
        let identity = state.get_mut(&id).ok_or(Error::NotFound(id))?;
        identity.status = status;
        debug!(identity_id = id, ?status, "identity status updated");
        write_atomic(&self.path, &state).await
    }

    async fn record_token_usage(&self, id: u64, success: bool, now_millis: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let identity = state.get_mut(&id).ok_or(Error::NotFound(id))?;
        if success {
            identity.success_count += 1;
        } else {
            identity.fail_count += 1;
        }
        identity.last_used = Some(now_millis);
        write_atomic(&self.path, &state).await
    }

    async fn record_health_check(
        &self,
        id: u64,
        ok: bool,
        error: Option<String>,
        _now_millis: u64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let identity = state.get_mut(&id).ok_or(Error::NotFound(id))?;
        identity.last_check_ok = Some(ok);
        identity.last_check_error = error;
        write_atomic(&self.path, &state).await
    }

    async fn rotate_refresh_token(
        &self,
        id: u64,
        new_refresh_token: &str,
        new_profile_arn: Option<String>,
    ) -> Result<()> {
        let (ciphertext, nonce) = crypto::encrypt(&self.key, new_refresh_token)?;
        let mut state = self.state.lock().await;
        let identity = state.get_mut(&id).ok_or(Error::NotFound(id))?;
        identity.refresh_token_ciphertext = ciphertext;
        identity.refresh_token_nonce = nonce;
        if let Some(arn) = new_profile_arn {
            identity.profile_arn = Some(arn);
        }
        debug!(identity_id = id, "refresh token rotated");
        write_atomic(&self.path, &state).await
    }
}

async fn write_atomic(path: &Path, state: &HashMap<u64, StoredIdentity>) -> Result<()> {
    let values: Vec<&StoredIdentity> = state.values().collect();
    let json = serde_json::to_string_pretty(&values)
        .map_err(|e| Error::Serde(format!("serializing identity store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("identity store path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".identities.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp identity store: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting identity store permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp identity store: {e}")))?;

    Ok(())
}
