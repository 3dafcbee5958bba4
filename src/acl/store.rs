//! Access-control document store

use super::record::{AclRecord, Direction, GroupConversation};
use super::topic::TopicPattern;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Document store holding broker ACLs and group conversations.
///
/// No transactional guarantees are assumed: every method is a single write.
#[async_trait]
pub trait AclStore: Send + Sync {
    /// Insert a new ACL record. Fails with [`Error::Conflict`] when one
    /// already exists for the client.
    async fn create_acl(&self, record: AclRecord) -> Result<()>;

    /// Grant a topic pattern. Granting a pattern that is already present is
    /// a no-op, as is granting on an unknown client.
    async fn grant_topic_access(
        &self,
        client_id: &str,
        direction: Direction,
        pattern: &TopicPattern,
    ) -> Result<()>;

    /// Replace the stored password hash. No-op for an unknown client.
    async fn update_password_hash(&self, client_id: &str, passhash: &str) -> Result<()>;

    /// Insert a group conversation document
    async fn create_group_conversation(&self, group: &GroupConversation) -> Result<()>;

    async fn acl(&self, client_id: &str) -> Result<Option<AclRecord>>;

    async fn group_conversation(&self, group_id: &str) -> Result<Option<GroupConversation>>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// In-memory store used by the standalone binary and tests
#[derive(Default)]
pub struct MemoryAclStore {
    acls: DashMap<String, AclRecord>,
    groups: DashMap<String, GroupConversation>,
    writes: AtomicU64,
}

impl MemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations applied so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn acl_count(&self) -> usize {
        self.acls.len()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl AclStore for MemoryAclStore {
    async fn create_acl(&self, record: AclRecord) -> Result<()> {
        match self.acls.entry(record.client_id.clone()) {
            Entry::Occupied(_) => Err(Error::Conflict {
                client_id: record.client_id,
            }),
            Entry::Vacant(slot) => {
                debug!(client_id = %record.client_id, "ACL record created");
                slot.insert(record);
                self.record_write();
                Ok(())
            }
        }
    }

    async fn grant_topic_access(
        &self,
        client_id: &str,
        direction: Direction,
        pattern: &TopicPattern,
    ) -> Result<()> {
        let Some(mut record) = self.acls.get_mut(client_id) else {
            warn!(client_id = %client_id, pattern = %pattern, "Grant for unknown client ignored");
            return Ok(());
        };

        if record.grant(direction, pattern.clone()) {
            self.record_write();
            debug!(client_id = %client_id, direction = ?direction, pattern = %pattern, "Topic access granted");
        }
        Ok(())
    }

    async fn update_password_hash(&self, client_id: &str, passhash: &str) -> Result<()> {
        if let Some(mut record) = self.acls.get_mut(client_id) {
            record.passhash = passhash.to_string();
            self.record_write();
        }
        Ok(())
    }

    async fn create_group_conversation(&self, group: &GroupConversation) -> Result<()> {
        self.groups.insert(group.group_id.clone(), group.clone());
        self.record_write();
        Ok(())
    }

    async fn acl(&self, client_id: &str) -> Result<Option<AclRecord>> {
        Ok(self.acls.get(client_id).map(|r| r.clone()))
    }

    async fn group_conversation(&self, group_id: &str) -> Result<Option<GroupConversation>> {
        Ok(self.groups.get(group_id).map(|g| g.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
