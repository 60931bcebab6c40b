//! Identity record and related value types

use serde::{Deserialize, Serialize};

/// Eligibility status of a stored identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Invalid,
}

/// Who may be allocated a given identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

/// One upstream refresh-token-backed identity and its lifecycle state.
///
/// `refresh_token` is never present in this type — it is kept encrypted on
/// disk and only surfaced via [`crate::PersistentStore::get_token_credentials`]
/// or [`crate::PersistentStore::get_decrypted_token`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: u64,
    pub owner_id: Option<u64>,
    pub visibility: Visibility,
    pub status: Status,
    pub region: String,
    pub profile_arn: Option<String>,
    pub success_count: u64,
    pub fail_count: u64,
    /// Epoch millis of last allocation, or `None` if never used.
    pub last_used: Option<u64>,
    pub last_check_ok: Option<bool>,
    pub last_check_error: Option<String>,
}

impl IdentityRecord {
    /// `success_count / (success_count + fail_count)`, or 1.0 with no history.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.fail_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    pub fn total(&self) -> u64 {
        self.success_count + self.fail_count
    }
}

/// Decrypted upstream client credentials for a single identity.
///
/// Returned by [`crate::PersistentStore::get_token_credentials`]; the
/// refresh token is plaintext only for the lifetime of this value.
#[derive(Debug, Clone)]
pub struct TokenCredentials {
    pub refresh_token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// The on-disk encoding of an identity: metadata plus the encrypted
/// refresh-token envelope. Not exposed outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredIdentity {
    pub id: u64,
    pub owner_id: Option<u64>,
    pub visibility: Visibility,
    pub status: Status,
    pub region: String,
    pub profile_arn: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Base64-encoded AES-256-GCM ciphertext of the refresh token.
    pub refresh_token_ciphertext: String,
    /// Base64-encoded 96-bit nonce used for this record's ciphertext.
    pub refresh_token_nonce: String,
    pub success_count: u64,
    pub fail_count: u64,
    pub last_used: Option<u64>,
    pub last_check_ok: Option<bool>,
    pub last_check_error: Option<String>,
}

impl StoredIdentity {
    pub(crate) fn to_record(&self) -> IdentityRecord {
        IdentityRecord {
            id: self.id,
            owner_id: self.owner_id,
            visibility: self.visibility,
            status: self.status,
            region: self.region.clone(),
            profile_arn: self.profile_arn.clone(),
            success_count: self.success_count,
            fail_count: self.fail_count,
            last_used: self.last_used,
            last_check_ok: self.last_check_ok,
            last_check_error: self.last_check_error.clone(),
        }
    }
}
