//! Group conversation ACL synchronization
//!
//! A group conversation lives under `<group-prefix>/<group-id>/`. Every member
//! may publish on its own slot `<group-prefix>/<group-id>/<member-id>` and
//! subscribe to all slots `<group-prefix>/<group-id>/+`.

use crate::acl::{is_valid_level, AclStore, Direction, GroupConversation, TopicGrant, TopicPattern};
use crate::config::TopicConfig;
use crate::error::{Error, Result};
use crate::identity::{resolve_mapping, IdentityCache};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Group ACL synchronizer
pub struct GroupSynchronizer {
    cache: Arc<dyn IdentityCache>,
    store: Arc<dyn AclStore>,
    group_prefix: String,
}

impl GroupSynchronizer {
    pub fn new(cache: Arc<dyn IdentityCache>, store: Arc<dyn AclStore>, topics: &TopicConfig) -> Self {
        Self {
            cache,
            store,
            group_prefix: topics.group_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Create a group conversation with a generated ID
    pub async fn create_group(
        &self,
        requester: &str,
        name: &str,
        candidate_handles: &[String],
    ) -> Result<GroupConversation> {
        let group_id = Uuid::new_v4().to_string();
        self.create_group_with_id(&group_id, requester, name, candidate_handles)
            .await
    }

    /// Create a group conversation under a caller-chosen ID
    pub async fn create_group_with_id(
        &self,
        group_id: &str,
        requester: &str,
        name: &str,
        candidate_handles: &[String],
    ) -> Result<GroupConversation> {
        if !is_valid_level(group_id) {
            return Err(Error::InvalidRequest(format!("invalid group ID: {:?}", group_id)));
        }
        if !is_valid_level(requester) {
            return Err(Error::InvalidRequest(format!("invalid requester ID: {:?}", requester)));
        }

        let members = self.resolve_members(requester, candidate_handles).await?;

        let group = GroupConversation {
            group_id: group_id.to_string(),
            name: name.to_string(),
            members,
        };

        self.store.create_group_conversation(&group).await?;
        self.grant_group_access(&group).await?;

        info!(
            group_id = %group.group_id,
            requester = %requester,
            members = group.members.len(),
            "Group conversation created"
        );
        Ok(group)
    }

    /// Resolve member handles to client IDs: unknown handles are dropped,
    /// duplicates removed, and the requester always ends up last
    pub async fn resolve_members(
        &self,
        requester: &str,
        candidate_handles: &[String],
    ) -> Result<Vec<String>> {
        let mut members: Vec<String> = Vec::with_capacity(candidate_handles.len() + 1);

        for handle in candidate_handles {
            let Some(client_id) = resolve_mapping(self.cache.as_ref(), handle).await? else {
                debug!(handle = %handle, "Dropping member without mapping");
                continue;
            };

            if !is_valid_level(&client_id) {
                warn!(handle = %handle, client_id = %client_id, "Dropping member with unusable client ID");
                continue;
            }

            if client_id == requester || members.contains(&client_id) {
                continue;
            }
            members.push(client_id);
        }

        members.push(requester.to_string());
        Ok(members)
    }

    /// Every ACL entry a group needs, one publish/subscribe pair per member
    pub fn group_grants(&self, group: &GroupConversation) -> Result<Vec<TopicGrant>> {
        let namespace = format!("{}/{}", self.group_prefix, group.group_id);
        let subscribe = TopicPattern::new(format!("{}/+", namespace))?;

        let mut grants = Vec::with_capacity(group.members.len() * 2);
        for member in &group.members {
            grants.push(TopicGrant {
                client_id: member.clone(),
                direction: Direction::Publish,
                pattern: TopicPattern::new(format!("{}/{}", namespace, member))?,
            });
            grants.push(TopicGrant {
                client_id: member.clone(),
                direction: Direction::Subscribe,
                pattern: subscribe.clone(),
            });
        }
        Ok(grants)
    }

    /// Apply the group's grants. Grants are idempotent, so re-running this
    /// after a partial failure converges without duplicate entries.
    pub async fn grant_group_access(&self, group: &GroupConversation) -> Result<()> {
        let grants = self.group_grants(group)?;

        for (applied, grant) in grants.iter().enumerate() {
            if let Err(e) = self
                .store
                .grant_topic_access(&grant.client_id, grant.direction, &grant.pattern)
                .await
            {
                warn!(
                    group_id = %group.group_id,
                    client_id = %grant.client_id,
                    applied,
                    total = grants.len(),
                    store = %self.store.name(),
                    error = %e,
                    "Group ACL fan-out interrupted"
                );
                return Err(e);
            }
        }

        debug!(group_id = %group.group_id, grants = grants.len(), "Group ACL fan-out complete");
        Ok(())
    }
}
