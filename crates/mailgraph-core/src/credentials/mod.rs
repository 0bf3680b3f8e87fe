/// Credential store - per-(user, provider) OAuth material
///
/// Refresh tokens and access tokens are AES-256-GCM encrypted with a key
/// supplied from outside the process. Refreshes are single-flight per
/// (user, provider): concurrent callers wait on the same refresh and share
/// its result.
mod cipher;
mod refresher;

pub use cipher::TokenCipher;
pub use refresher::{HttpTokenRefresher, RefreshedToken, TokenRefresher};

use crate::constants::TOKEN_REFRESH_MARGIN_SECONDS;
use crate::error::MailgraphError;
use crate::providers::ProviderKind;
use crate::store::GraphStore;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A decrypted, non-expired access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct CredentialStore {
    store: GraphStore,
    cipher: TokenCipher,
    refresher: Arc<dyn TokenRefresher>,
    refresh_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

struct CredentialRow {
    refresh_token: String,
    access_token: Option<String>,
    access_expires_at: Option<DateTime<Utc>>,
    revoked: bool,
}

impl CredentialStore {
    pub fn new(
        store: GraphStore,
        cipher: TokenCipher,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            store,
            cipher,
            refresher,
            refresh_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent; replaces any prior credential for the (user, provider)
    pub async fn store_initial_credential(
        &self,
        user_id: &str,
        provider: ProviderKind,
        refresh_token: &str,
        access_token: Option<&str>,
        access_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), MailgraphError> {
        let (refresh_enc, refresh_nonce) = self.cipher.encrypt(refresh_token)?;
        let (access_enc, access_nonce) = match access_token {
            Some(token) => {
                let (ct, nonce) = self.cipher.encrypt(token)?;
                (Some(ct), Some(nonce))
            }
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO credentials (user_id, provider, refresh_token_enc, refresh_nonce,
                                      access_token_enc, access_nonce, access_expires_at,
                                      revoked, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT (user_id, provider) DO UPDATE SET
                refresh_token_enc = excluded.refresh_token_enc,
                refresh_nonce = excluded.refresh_nonce,
                access_token_enc = excluded.access_token_enc,
                access_nonce = excluded.access_nonce,
                access_expires_at = excluded.access_expires_at,
                revoked = 0,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(refresh_enc)
        .bind(refresh_nonce)
        .bind(access_enc)
        .bind(access_nonce)
        .bind(access_expires_at)
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;

        info!(user_id = %user_id, provider = %provider.as_str(), "Stored credential");
        Ok(())
    }

    /// Returns a non-expired access token, refreshing transparently when the
    /// remaining lifetime is under the safety margin
    pub async fn get_access_token(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<AccessToken, MailgraphError> {
        if let Some(token) = self.fresh_token_from_store(user_id, provider).await? {
            return Ok(token);
        }

        // Single-flight: concurrent callers for the same (user, provider)
        // wait on the same refresh
        let key = format!("{}/{}", user_id, provider.as_str());
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };

        let outcome = async {
            let _guard = lock.lock().await;

            // A concurrent caller may have refreshed while we waited
            if let Some(token) = self.fresh_token_from_store(user_id, provider).await? {
                return Ok(token);
            }

            self.refresh(user_id, provider).await
        }
        .await;

        // Reap the map entry once no other waiter holds it. Clones are only
        // handed out under the outer lock, so the count cannot move here.
        drop(lock);
        let mut locks = self.refresh_locks.lock().await;
        if let Some(entry) = locks.get(&key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&key);
            }
        }
        drop(locks);

        outcome
    }

    /// Tombstones the credential; no further refreshes until re-authorization
    pub async fn invalidate(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<(), MailgraphError> {
        sqlx::query(
            "UPDATE credentials SET revoked = 1, updated_at = ? WHERE user_id = ? AND provider = ?",
        )
        .bind(Utc::now())
        .bind(user_id)
        .bind(provider.as_str())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    async fn load_row(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<CredentialRow, MailgraphError> {
        let row = sqlx::query(
            "SELECT refresh_token_enc, refresh_nonce, access_token_enc, access_nonce,
                    access_expires_at, revoked
             FROM credentials WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(self.store.pool())
        .await?
        .ok_or_else(|| {
            MailgraphError::CredentialRevoked(format!(
                "no credential for {} on {}",
                user_id,
                provider.as_str()
            ))
        })?;

        let refresh_enc: Vec<u8> = row.try_get("refresh_token_enc")?;
        let refresh_nonce: Vec<u8> = row.try_get("refresh_nonce")?;
        let access_enc: Option<Vec<u8>> = row.try_get("access_token_enc")?;
        let access_nonce: Option<Vec<u8>> = row.try_get("access_nonce")?;

        let access_token = match (access_enc, access_nonce) {
            (Some(ct), Some(nonce)) => Some(self.cipher.decrypt(&ct, &nonce)?),
            _ => None,
        };

        Ok(CredentialRow {
            refresh_token: self.cipher.decrypt(&refresh_enc, &refresh_nonce)?,
            access_token,
            access_expires_at: row.try_get("access_expires_at")?,
            revoked: row.try_get("revoked")?,
        })
    }

    async fn fresh_token_from_store(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<Option<AccessToken>, MailgraphError> {
        let row = self.load_row(user_id, provider).await?;
        if row.revoked {
            return Err(MailgraphError::CredentialRevoked(format!(
                "credential for {} on {} is revoked",
                user_id,
                provider.as_str()
            )));
        }

        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECONDS);
        match (row.access_token, row.access_expires_at) {
            (Some(token), Some(expires_at)) if expires_at - margin > Utc::now() => {
                Ok(Some(AccessToken { token, expires_at }))
            }
            _ => Ok(None),
        }
    }

    async fn refresh(
        &self,
        user_id: &str,
        provider: ProviderKind,
    ) -> Result<AccessToken, MailgraphError> {
        let row = self.load_row(user_id, provider).await?;

        let refreshed = match self.refresher.refresh(provider, &row.refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(err @ MailgraphError::CredentialRevoked(_)) => {
                // The provider rejected the refresh token; tombstone so we
                // never hammer the endpoint until the user re-authorizes
                warn!(
                    user_id = %user_id,
                    provider = %provider.as_str(),
                    "Refresh rejected, marking credential revoked"
                );
                self.invalidate(user_id, provider).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let expires_at = Utc::now() + Duration::seconds(refreshed.expires_in_seconds);
        let (access_enc, access_nonce) = self.cipher.encrypt(&refreshed.access_token)?;

        sqlx::query(
            "UPDATE credentials SET access_token_enc = ?, access_nonce = ?,
                    access_expires_at = ?, updated_at = ?
             WHERE user_id = ? AND provider = ?",
        )
        .bind(access_enc)
        .bind(access_nonce)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(user_id)
        .bind(provider.as_str())
        .execute(self.store.pool())
        .await?;

        info!(
            user_id = %user_id,
            provider = %provider.as_str(),
            expires_at = %expires_at,
            "Refreshed access token"
        );

        Ok(AccessToken {
            token: refreshed.access_token,
            expires_at,
        })
    }
}
