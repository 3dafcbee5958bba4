//! Provisioning agent
//!
//! Orchestrates credential checks, reconciliation, ACL seeding and group
//! synchronization for each request, and speaks a newline-delimited JSON
//! request/response protocol.

use crate::acl::{AclRecord, AclStore, GroupConversation};
use crate::config::ProvisionerConfig;
use crate::credential::CredentialChecker;
use crate::error::{Error, Result};
use crate::group::GroupSynchronizer;
use crate::identity::{resolve_mapping, ClientIdentity, IdentityCache, Mapping};
use crate::reconcile::{AuthReconciler, CacheOutcome};
use crate::verify::IdentityVerifier;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// A request that passed authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: ClientIdentity,
    pub outcome: CacheOutcome,
    /// Whether this request created the client's ACL record
    pub seeded: bool,
}

/// Result of provisioning a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// ACL record created by this request
    Created { client_id: String },
    /// Client already had an ACL record
    AlreadyProvisioned { client_id: String },
    /// Cached identity was stale and has been refreshed; retry the request
    RetryLater,
}

/// Result of an operation that must not run on an `Updated` identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T> {
    Done(T),
    RetryLater,
}

/// MQTT ACL provisioning agent
pub struct Provisioner {
    config: ProvisionerConfig,
    checker: CredentialChecker,
    reconciler: AuthReconciler,
    groups: GroupSynchronizer,
    cache: Arc<dyn IdentityCache>,
    store: Arc<dyn AclStore>,
}

impl Provisioner {
    /// Create a provisioner over explicit collaborators
    pub fn new(
        config: ProvisionerConfig,
        cache: Arc<dyn IdentityCache>,
        store: Arc<dyn AclStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let checker = CredentialChecker::new(&config.credential)?;
        let reconciler = AuthReconciler::new(cache.clone(), verifier.clone(), &config.cache);
        let groups = GroupSynchronizer::new(cache.clone(), store.clone(), &config.topics);

        info!(
            verifier = %verifier.name(),
            store = %store.name(),
            group_prefix = %config.topics.group_prefix,
            "Provisioner initialized"
        );

        Ok(Self {
            config,
            checker,
            reconciler,
            groups,
            cache,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn AclStore> {
        &self.store
    }

    /// Check format, reconcile, and apply the side effects every outcome
    /// requires: `Fresh` seeds the ACL record, `Updated` pushes the new
    /// password hash to the store (or seeds a client the store has never
    /// seen). When a side effect fails the credential is dropped from the
    /// cache so the next request reconciles as `Fresh` again.
    pub async fn authenticate(&self, credential: &str) -> Result<Authenticated> {
        self.checker.check(credential)?;
        let reconciled = self.reconciler.reconcile(credential).await?;

        let seeded = match self.apply_outcome(&reconciled.identity, reconciled.outcome).await {
            Ok(seeded) => seeded,
            Err(e) => {
                if let Err(forget_err) = self.reconciler.forget(credential).await {
                    warn!(
                        client_id = %reconciled.identity.client_id,
                        error = %forget_err,
                        "Failed to drop cached credential"
                    );
                }
                return Err(e);
            }
        };

        Ok(Authenticated {
            identity: reconciled.identity,
            outcome: reconciled.outcome,
            seeded,
        })
    }

    async fn apply_outcome(&self, identity: &ClientIdentity, outcome: CacheOutcome) -> Result<bool> {
        match outcome {
            CacheOutcome::Fresh => self.seed_acl(identity).await,
            CacheOutcome::Cached => Ok(false),
            CacheOutcome::Updated => {
                if self.store.acl(&identity.client_id).await?.is_none() {
                    debug!(client_id = %identity.client_id, "Updated identity has no ACL record");
                    return self.seed_acl(identity).await;
                }

                self.store
                    .update_password_hash(&identity.client_id, &identity.password_hash)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Seed the default ACL record. Returns false when another request
    /// already created it.
    async fn seed_acl(&self, identity: &ClientIdentity) -> Result<bool> {
        let record = AclRecord::with_defaults(identity, &self.config.topics)?;

        match self.store.create_acl(record).await {
            Ok(()) => {
                info!(client_id = %identity.client_id, "ACL record seeded");
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                debug!(client_id = %identity.client_id, "ACL record already provisioned");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Provision the broker ACL for the credential's client
    pub async fn provision_client(&self, credential: &str) -> Result<Provisioned> {
        let auth = self.authenticate(credential).await?;
        let client_id = auth.identity.client_id;

        Ok(match auth.outcome {
            CacheOutcome::Fresh if auth.seeded => Provisioned::Created { client_id },
            CacheOutcome::Fresh | CacheOutcome::Cached => Provisioned::AlreadyProvisioned { client_id },
            CacheOutcome::Updated => Provisioned::RetryLater,
        })
    }

    /// Create a group conversation on behalf of the credential's client
    pub async fn create_group(
        &self,
        credential: &str,
        name: &str,
        members: &[String],
    ) -> Result<Settled<GroupConversation>> {
        let auth = self.authenticate(credential).await?;
        if auth.outcome == CacheOutcome::Updated {
            return Ok(Settled::RetryLater);
        }

        let group = self
            .groups
            .create_group(&auth.identity.client_id, name, members)
            .await?;
        Ok(Settled::Done(group))
    }

    /// Resolve external user IDs to internal client IDs; unmapped IDs are omitted
    pub async fn resolve_mappings(
        &self,
        credential: &str,
        user_ids: &[String],
    ) -> Result<Settled<Vec<Mapping>>> {
        let auth = self.authenticate(credential).await?;
        if auth.outcome == CacheOutcome::Updated {
            return Ok(Settled::RetryLater);
        }

        let mut mappings = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(internal_client_id) = resolve_mapping(self.cache.as_ref(), user_id).await? {
                mappings.push(Mapping {
                    external_user_id: user_id.clone(),
                    internal_client_id,
                });
            }
        }
        Ok(Settled::Done(mappings))
    }

    /// Dispatch one request
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Provision { token } => {
                self.provision_client(&token).await.map(|p| match p {
                    Provisioned::Created { client_id } => {
                        Response::with_data(ResponseCode::Success, client_id)
                    }
                    Provisioned::AlreadyProvisioned { client_id } => {
                        Response::with_data(ResponseCode::AlreadyExists, client_id)
                    }
                    Provisioned::RetryLater => Response::new(ResponseCode::Updated),
                })
            }
            Request::CreateGroup {
                token,
                name,
                members,
            } => self
                .create_group(&token, &name, &members)
                .await
                .map(Response::settled),
            Request::Mappings { token, user_ids } => self
                .resolve_mappings(&token, &user_ids)
                .await
                .map(Response::settled),
        };

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Request rejected");
            Response::from_error(&e)
        })
    }

    /// Parse and dispatch one line of the request protocol
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!(error = %e, "Malformed request");
                Response::new(ResponseCode::InvalidJson)
            }
        }
    }

    /// Serve newline-delimited JSON requests until the reader is exhausted
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = self.handle_line(line).await;
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}

// ============================================================================
// Request protocol
// ============================================================================

/// Inbound request
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    /// Provision the broker ACL of the token's client
    Provision { token: String },

    /// Create a group conversation
    CreateGroup {
        token: String,
        name: String,
        #[serde(default)]
        members: Vec<String>,
    },

    /// Look up internal client IDs
    Mappings {
        token: String,
        #[serde(default, rename = "userIDs")]
        user_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseCode {
    Success,
    InvalidToken,
    InvalidJson,
    InvalidRequest,
    AlreadyExists,
    Updated,
    StoreUnavailable,
    InternalError,
}

/// Outbound response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub code: ResponseCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Self { code, data: None }
    }

    pub fn with_data<T: Serialize>(code: ResponseCode, data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                code,
                data: Some(value),
            },
            Err(e) => {
                warn!(error = %e, "Failed to encode response data");
                Self::new(ResponseCode::InternalError)
            }
        }
    }

    fn settled<T: Serialize>(settled: Settled<T>) -> Self {
        match settled {
            Settled::Done(data) => Self::with_data(ResponseCode::Success, data),
            Settled::RetryLater => Self::new(ResponseCode::Updated),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        let code = match error {
            Error::InvalidCredential(_) => ResponseCode::InvalidToken,
            Error::Conflict { .. } => ResponseCode::AlreadyExists,
            Error::StoreUnavailable(_) => ResponseCode::StoreUnavailable,
            Error::InvalidRequest(_) => ResponseCode::InvalidRequest,
            Error::Config(_) => ResponseCode::InternalError,
        };
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Direction, MemoryAclStore, TopicPattern};
    use crate::config::CacheConfig;
    use crate::identity::{store_mapping, MemoryIdentityCache};
    use crate::verify::FileVerifier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn identity(client_id: &str, username: &str, password_hash: &str) -> ClientIdentity {
        ClientIdentity {
            client_id: client_id.to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        }
    }

    struct Fixture {
        provisioner: Provisioner,
        cache: Arc<MemoryIdentityCache>,
        store: Arc<MemoryAclStore>,
        verifier: Arc<FileVerifier>,
    }

    fn fixture(revalidate_after_secs: u64) -> Fixture {
        let config = ProvisionerConfig {
            cache: CacheConfig {
                revalidate_after_secs,
                entry_ttl_secs: None,
            },
            ..Default::default()
        };
        let cache = Arc::new(MemoryIdentityCache::new(None));
        let store = Arc::new(MemoryAclStore::new());
        let verifier = Arc::new(FileVerifier::in_memory());

        let provisioner =
            Provisioner::new(config, cache.clone(), store.clone(), verifier.clone()).unwrap();
        Fixture {
            provisioner,
            cache,
            store,
            verifier,
        }
    }

    #[tokio::test]
    async fn test_provision_fresh_client() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));

        let result = f.provisioner.provision_client("token-alice").await.unwrap();
        assert_eq!(result, Provisioned::Created { client_id: "c1".to_string() });

        let acl = f.store.acl("c1").await.unwrap().unwrap();
        assert_eq!(acl.passhash, "hash-1");
        assert_eq!(acl.subscribe_acl[0].as_str(), "private/c1/+");
    }

    #[tokio::test]
    async fn test_provision_cached_client_writes_nothing() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));
        f.provisioner.provision_client("token-alice").await.unwrap();
        let writes = f.store.write_count();

        let result = f.provisioner.provision_client("token-alice").await.unwrap();
        assert_eq!(result, Provisioned::AlreadyProvisioned { client_id: "c1".to_string() });
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_second_token_for_same_client_hits_conflict() {
        let f = fixture(300);
        f.verifier.set_token("token-phone", identity("c1", "alice", "hash-1"));
        f.verifier.set_token("token-laptop", identity("c1", "alice", "hash-1"));

        assert!(matches!(
            f.provisioner.provision_client("token-phone").await.unwrap(),
            Provisioned::Created { .. }
        ));
        // Fresh for the cache, but the store already has the record
        assert!(matches!(
            f.provisioner.provision_client("token-laptop").await.unwrap(),
            Provisioned::AlreadyProvisioned { .. }
        ));
        assert_eq!(f.store.acl_count(), 1);
    }

    #[tokio::test]
    async fn test_rotated_password_requires_retry() {
        let f = fixture(0);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));
        f.provisioner.provision_client("token-alice").await.unwrap();

        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-2"));
        let result = f.provisioner.provision_client("token-alice").await.unwrap();
        assert_eq!(result, Provisioned::RetryLater);

        let acl = f.store.acl("c1").await.unwrap().unwrap();
        assert_eq!(acl.passhash, "hash-2");

        let result = f.provisioner.provision_client("token-alice").await.unwrap();
        assert!(matches!(result, Provisioned::AlreadyProvisioned { .. }));
    }

    #[tokio::test]
    async fn test_malformed_token_never_reaches_verifier() {
        let f = fixture(300);
        let err = f.provisioner.provision_client("bad token").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
        assert_eq!(f.verifier.verification_count(), 0);
    }

    #[tokio::test]
    async fn test_create_group_seeds_requester() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("u1", "alice", "hash-1"));
        f.verifier.set_token("token-bob", identity("u2", "bob", "hash-2"));
        f.provisioner.provision_client("token-bob").await.unwrap();

        let members = vec!["bob".to_string(), "alice".to_string(), "ghost".to_string()];
        let group = match f
            .provisioner
            .create_group("token-alice", "friends", &members)
            .await
            .unwrap()
        {
            Settled::Done(group) => group,
            Settled::RetryLater => panic!("Expected group to be created"),
        };

        assert_eq!(group.members, vec!["u2".to_string(), "u1".to_string()]);

        let alice = f.store.acl("u1").await.unwrap().unwrap();
        assert!(alice
            .publish_acl
            .iter()
            .any(|p| p.as_str() == format!("groups/{}/u1", group.group_id)));
    }

    #[tokio::test]
    async fn test_resolve_mappings() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("u1", "alice", "hash-1"));
        store_mapping(f.cache.as_ref(), "bob", "u2").await.unwrap();

        let ids = vec!["bob".to_string(), "nobody".to_string()];
        let result = f.provisioner.resolve_mappings("token-alice", &ids).await.unwrap();
        assert_eq!(
            result,
            Settled::Done(vec![Mapping {
                external_user_id: "bob".to_string(),
                internal_client_id: "u2".to_string(),
            }])
        );
    }

    #[tokio::test]
    async fn test_handle_line_codes() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));

        let response = f
            .provisioner
            .handle_line(r#"{"op": "provision", "token": "token-alice"}"#)
            .await;
        assert_eq!(response.code, ResponseCode::Success);
        assert_eq!(response.data, Some(serde_json::json!("c1")));

        let response = f
            .provisioner
            .handle_line(r#"{"op": "provision", "token": "token-alice"}"#)
            .await;
        assert_eq!(response.code, ResponseCode::AlreadyExists);

        let response = f
            .provisioner
            .handle_line(r#"{"op": "provision", "token": "token-mallory"}"#)
            .await;
        assert_eq!(response.code, ResponseCode::InvalidToken);

        let response = f.provisioner.handle_line("{not json").await;
        assert_eq!(response.code, ResponseCode::InvalidJson);
    }

    #[tokio::test]
    async fn test_serve_lines() {
        let f = fixture(300);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));

        let input = b"{\"op\":\"provision\",\"token\":\"token-alice\"}\n\n{\"op\":\"mappings\",\"token\":\"token-alice\",\"userIDs\":[\"alice\"]}\n";
        let mut output = Vec::new();
        f.provisioner.serve(&input[..], &mut output).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["code"], "success");
        assert_eq!(lines[1]["code"], "success");
        assert_eq!(lines[1]["data"][0]["internalClientID"], "c1");
    }

    #[tokio::test]
    async fn test_identity_moved_to_new_client_is_seeded() {
        let f = fixture(0);
        f.verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));
        assert_eq!(
            f.provisioner.provision_client("token-alice").await.unwrap(),
            Provisioned::Created { client_id: "c1".to_string() }
        );

        f.verifier.set_token("token-alice", identity("c9", "alice", "hash-9"));
        assert_eq!(
            f.provisioner.provision_client("token-alice").await.unwrap(),
            Provisioned::RetryLater
        );

        let acl = f.store.acl("c9").await.unwrap().unwrap();
        assert_eq!(acl.passhash, "hash-9");
        assert_eq!(acl.subscribe_acl[0].as_str(), "private/c9/+");

        assert_eq!(
            f.provisioner.provision_client("token-alice").await.unwrap(),
            Provisioned::AlreadyProvisioned { client_id: "c9".to_string() }
        );
    }

    /// Store whose first `create_acl` call fails
    struct FailFirstSeed {
        inner: MemoryAclStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl AclStore for FailFirstSeed {
        async fn create_acl(&self, record: AclRecord) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(Error::store("connection reset"));
            }
            self.inner.create_acl(record).await
        }

        async fn grant_topic_access(
            &self,
            client_id: &str,
            direction: Direction,
            pattern: &TopicPattern,
        ) -> Result<()> {
            self.inner.grant_topic_access(client_id, direction, pattern).await
        }

        async fn update_password_hash(&self, client_id: &str, passhash: &str) -> Result<()> {
            self.inner.update_password_hash(client_id, passhash).await
        }

        async fn create_group_conversation(&self, group: &GroupConversation) -> Result<()> {
            self.inner.create_group_conversation(group).await
        }

        async fn acl(&self, client_id: &str) -> Result<Option<AclRecord>> {
            self.inner.acl(client_id).await
        }

        async fn group_conversation(&self, group_id: &str) -> Result<Option<GroupConversation>> {
            self.inner.group_conversation(group_id).await
        }

        fn name(&self) -> &str {
            "fail-first-seed"
        }
    }

    #[tokio::test]
    async fn test_failed_seed_is_retried_on_next_request() {
        let cache = Arc::new(MemoryIdentityCache::new(None));
        let store = Arc::new(FailFirstSeed {
            inner: MemoryAclStore::new(),
            failed: AtomicBool::new(false),
        });
        let verifier = Arc::new(FileVerifier::in_memory());
        verifier.set_token("token-alice", identity("c1", "alice", "hash-1"));

        let provisioner = Provisioner::new(
            ProvisionerConfig::default(),
            cache.clone(),
            store.clone(),
            verifier.clone(),
        )
        .unwrap();

        let err = provisioner.provision_client("token-alice").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(!cache.exists("token:token-alice").await.unwrap());

        assert_eq!(
            provisioner.provision_client("token-alice").await.unwrap(),
            Provisioned::Created { client_id: "c1".to_string() }
        );
        assert!(store.acl("c1").await.unwrap().is_some());
        assert_eq!(verifier.verification_count(), 2);
    }

    #[tokio::test]
    async fn test_wildcard_client_id_is_not_provisioned() {
        let f = fixture(300);
        f.verifier.set_token("token-mallory", identity("+", "mallory", "hash-1"));

        let response = f
            .provisioner
            .handle_line(r#"{"op": "provision", "token": "token-mallory"}"#)
            .await;
        assert_eq!(response.code, ResponseCode::InvalidToken);
        assert_eq!(f.store.acl_count(), 0);
        assert!(!f.cache.exists("token:token-mallory").await.unwrap());
    }
}
