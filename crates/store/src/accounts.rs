//! Linked accounts, one sealed credential per (identity, platform).
//!
//! The storage key is derived from the caller's own identity, so a
//! lookup can only ever reach the credential that identity linked.

use chrono::{DateTime, Utc};
use clawdvc_core::account::{LinkedAccount, SessionCredential};
use clawdvc_core::error::StorageError;
use clawdvc_core::message::Identity;
use clawdvc_core::storage::{Storage, collections};
use clawdvc_security::SecretsManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// On-disk form: the credential is sealed.
#[derive(Serialize, Deserialize)]
struct SealedAccount {
    owner: Identity,
    platform: String,
    sealed_credential: String,
    linked_at: DateTime<Utc>,
}

pub struct AccountStore {
    storage: Arc<dyn Storage>,
    secrets: SecretsManager,
}

impl AccountStore {
    pub fn new(storage: Arc<dyn Storage>, secrets: SecretsManager) -> Self {
        Self { storage, secrets }
    }

    /// Link (or re-link, overwriting) `owner`'s credential for `platform`.
    pub async fn link(
        &self,
        owner: &Identity,
        platform: &str,
        credential: SessionCredential,
    ) -> Result<LinkedAccount, StorageError> {
        let account = LinkedAccount::new(owner.clone(), platform, credential);
        let sealed = SealedAccount {
            owner: account.owner.clone(),
            platform: account.platform.clone(),
            sealed_credential: self
                .secrets
                .seal(account.credential.expose())
                .map_err(|e| StorageError::Crypto(e.to_string()))?,
            linked_at: account.linked_at,
        };
        let value = serde_json::to_value(&sealed).map_err(|e| StorageError::Io(e.to_string()))?;
        self.storage
            .put(collections::LINKED_ACCOUNTS, &account_key(owner, platform), value)
            .await?;
        info!(identity = %owner, platform, "Account linked");
        Ok(account)
    }

    pub async fn get(&self, owner: &Identity, platform: &str) -> Result<Option<LinkedAccount>, StorageError> {
        let key = account_key(owner, platform);
        let Some(value) = self.storage.get(collections::LINKED_ACCOUNTS, &key).await? else {
            return Ok(None);
        };
        let sealed: SealedAccount = serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
            key: format!("{}/{key}", collections::LINKED_ACCOUNTS),
            reason: e.to_string(),
        })?;
        let plaintext = self
            .secrets
            .open(&sealed.sealed_credential)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(Some(LinkedAccount {
            owner: sealed.owner,
            platform: sealed.platform,
            credential: SessionCredential::new(plaintext),
            linked_at: sealed.linked_at,
        }))
    }

    /// The credential `owner` linked for `platform`.
    pub async fn credential_for(
        &self,
        owner: &Identity,
        platform: &str,
    ) -> Result<Option<SessionCredential>, StorageError> {
        Ok(self.get(owner, platform).await?.map(|a| a.credential))
    }

    pub async fn unlink(&self, owner: &Identity, platform: &str) -> Result<bool, StorageError> {
        let removed = self
            .storage
            .delete(collections::LINKED_ACCOUNTS, &account_key(owner, platform))
            .await?;
        if removed {
            info!(identity = %owner, platform, "Account unlinked");
        }
        Ok(removed)
    }

    pub async fn is_linked(&self, owner: &Identity, platform: &str) -> Result<bool, StorageError> {
        Ok(self
            .storage
            .get(collections::LINKED_ACCOUNTS, &account_key(owner, platform))
            .await?
            .is_some())
    }
}

fn account_key(owner: &Identity, platform: &str) -> String {
    format!("{owner}:{platform}")
}
