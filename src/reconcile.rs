//! Authentication cache reconciliation
//!
//! Resolves a bearer token to a verified client identity while keeping the
//! identity cache in agreement with the verification endpoint:
//!
//! - unknown token: verify, cache, [`CacheOutcome::Fresh`]
//! - cached token inside the revalidation window: no external call,
//!   [`CacheOutcome::Cached`]
//! - cached token past the window: verify again; identical fields refresh the
//!   freshness marker ([`CacheOutcome::Cached`]), changed fields overwrite the
//!   entry ([`CacheOutcome::Updated`])

use crate::config::CacheConfig;
use crate::error::Result;
use crate::identity::{
    mapping_key, resolve_mapping, store_mapping, token_key, ClientIdentity, IdentityCache,
    FIELD_CLIENT_ID, FIELD_PASSWORD_HASH, FIELD_USERNAME, FIELD_VERIFIED_AT,
};
use crate::verify::IdentityVerifier;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a credential relates to what the cache already knew
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// First sighting; the identity was verified and cached now
    Fresh,
    /// Already cached with identical fields
    Cached,
    /// Cached fields were stale and have been overwritten. The caller must
    /// not act on this request; a retry will see `Cached`.
    Updated,
}

/// Verified identity plus the cache outcome that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub identity: ClientIdentity,
    pub outcome: CacheOutcome,
}

struct CachedIdentity {
    identity: ClientIdentity,
    verified_at: i64,
}

/// Authentication reconciler
pub struct AuthReconciler {
    cache: Arc<dyn IdentityCache>,
    verifier: Arc<dyn IdentityVerifier>,
    revalidate_after_secs: i64,
}

impl AuthReconciler {
    pub fn new(
        cache: Arc<dyn IdentityCache>,
        verifier: Arc<dyn IdentityVerifier>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            cache,
            verifier,
            revalidate_after_secs: i64::try_from(config.revalidate_after_secs).unwrap_or(i64::MAX),
        }
    }

    /// Resolve a format-checked credential
    pub async fn reconcile(&self, credential: &str) -> Result<Reconciled> {
        let key = token_key(credential);

        let Some(cached) = self.load(&key).await? else {
            let identity = self.verify(credential).await?;
            self.write_entry(&key, &identity).await?;

            info!(
                client_id = %identity.client_id,
                verifier = %self.verifier.name(),
                "Credential verified and cached"
            );
            return Ok(Reconciled {
                identity,
                outcome: CacheOutcome::Fresh,
            });
        };

        let now = now_secs();
        if now.saturating_sub(cached.verified_at) < self.revalidate_after_secs {
            debug!(client_id = %cached.identity.client_id, "Credential served from cache");
            return Ok(Reconciled {
                identity: cached.identity,
                outcome: CacheOutcome::Cached,
            });
        }

        let current = self.verify(credential).await?;

        if current == cached.identity {
            self.cache
                .set(&key, &[(FIELD_VERIFIED_AT, now.to_string())])
                .await?;

            debug!(client_id = %current.client_id, "Cached credential revalidated");
            return Ok(Reconciled {
                identity: current,
                outcome: CacheOutcome::Cached,
            });
        }

        self.write_entry(&key, &current).await?;
        if current.username != cached.identity.username {
            self.drop_mapping(&cached.identity).await?;
        }

        info!(
            client_id = %current.client_id,
            previous_client_id = %cached.identity.client_id,
            password_changed = current.password_hash != cached.identity.password_hash,
            "Cached identity changed"
        );
        Ok(Reconciled {
            identity: current,
            outcome: CacheOutcome::Updated,
        })
    }

    /// Drop the cached entry for a credential so the next request is `Fresh`
    pub async fn forget(&self, credential: &str) -> Result<()> {
        self.cache.remove(&token_key(credential)).await?;
        debug!("Cached credential forgotten");
        Ok(())
    }

    /// Remove a username mapping that still points at the given client
    async fn drop_mapping(&self, previous: &ClientIdentity) -> Result<()> {
        let mapped = resolve_mapping(self.cache.as_ref(), &previous.username).await?;
        if mapped.as_deref() == Some(previous.client_id.as_str()) {
            self.cache.remove(&mapping_key(&previous.username)).await?;
            debug!(username = %previous.username, "Stale username mapping removed");
        }
        Ok(())
    }

    async fn verify(&self, credential: &str) -> Result<ClientIdentity> {
        self.verifier.verify(credential).await.map_err(|e| {
            warn!(verifier = %self.verifier.name(), error = %e, "Credential rejected");
            e
        })
    }

    /// Read a cached identity. Entries missing any identity field count as a miss.
    async fn load(&self, key: &str) -> Result<Option<CachedIdentity>> {
        if !self.cache.exists(key).await? {
            return Ok(None);
        }

        let client_id = self.cache.get(key, FIELD_CLIENT_ID).await?;
        let username = self.cache.get(key, FIELD_USERNAME).await?;
        let password_hash = self.cache.get(key, FIELD_PASSWORD_HASH).await?;
        let verified_at = self
            .cache
            .get(key, FIELD_VERIFIED_AT)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        match (client_id, username, password_hash) {
            (Some(client_id), Some(username), Some(password_hash)) if !client_id.is_empty() => {
                Ok(Some(CachedIdentity {
                    identity: ClientIdentity {
                        client_id,
                        username,
                        password_hash,
                    },
                    verified_at,
                }))
            }
            _ => {
                debug!(key = %key, "Incomplete cache entry treated as a miss");
                Ok(None)
            }
        }
    }

    async fn write_entry(&self, key: &str, identity: &ClientIdentity) -> Result<()> {
        self.cache
            .set(
                key,
                &[
                    (FIELD_CLIENT_ID, identity.client_id.clone()),
                    (FIELD_USERNAME, identity.username.clone()),
                    (FIELD_PASSWORD_HASH, identity.password_hash.clone()),
                    (FIELD_VERIFIED_AT, now_secs().to_string()),
                ],
            )
            .await?;

        store_mapping(self.cache.as_ref(), &identity.username, &identity.client_id).await
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
