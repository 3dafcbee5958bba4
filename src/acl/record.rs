//! ACL and group conversation documents

use super::topic::{is_valid_level, TopicPattern};
use crate::config::{expand_template, TopicConfig};
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use serde::{Deserialize, Serialize};

/// Direction of a topic grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Publish,
    Subscribe,
}

/// Per-client broker ACL document (VerneMQ `vmq_acl_auth` layout)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    pub mountpoint: String,
    pub client_id: String,
    pub username: String,
    pub passhash: String,
    pub publish_acl: Vec<TopicPattern>,
    pub subscribe_acl: Vec<TopicPattern>,
}

impl AclRecord {
    /// Build the record seeded for a client seen for the first time.
    ///
    /// Substituted identifiers must be single topic levels, otherwise a
    /// client ID such as `+` would widen the default patterns to every inbox.
    pub fn with_defaults(identity: &ClientIdentity, topics: &TopicConfig) -> Result<Self> {
        if !is_valid_level(&identity.client_id) {
            return Err(Error::invalid_credential(format!(
                "client ID {:?} is not a usable topic level",
                identity.client_id
            )));
        }

        let uses_username = topics
            .default_publish
            .iter()
            .chain(&topics.default_subscribe)
            .any(|t| t.contains("{username}"));
        if uses_username && !is_valid_level(&identity.username) {
            return Err(Error::invalid_credential(format!(
                "username {:?} is not a usable topic level",
                identity.username
            )));
        }

        let expand = |templates: &[String]| -> Result<Vec<TopicPattern>> {
            templates
                .iter()
                .map(|t| TopicPattern::new(expand_template(t, &identity.client_id, &identity.username)))
                .collect()
        };

        Ok(Self {
            mountpoint: topics.mountpoint.clone(),
            client_id: identity.client_id.clone(),
            username: identity.username.clone(),
            passhash: identity.password_hash.clone(),
            publish_acl: expand(&topics.default_publish)?,
            subscribe_acl: expand(&topics.default_subscribe)?,
        })
    }

    /// Add a pattern unless it is already granted. Returns whether it was added.
    pub fn grant(&mut self, direction: Direction, pattern: TopicPattern) -> bool {
        let acl = match direction {
            Direction::Publish => &mut self.publish_acl,
            Direction::Subscribe => &mut self.subscribe_acl,
        };
        if acl.contains(&pattern) {
            return false;
        }
        acl.push(pattern);
        true
    }
}

/// A single ACL entry to be applied to one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicGrant {
    pub client_id: String,
    pub direction: Direction,
    pub pattern: TopicPattern,
}

/// Group conversation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConversation {
    #[serde(rename = "groupConversationID")]
    pub group_id: String,
    pub name: String,
    /// Internal client IDs, creator included, no duplicates
    pub members: Vec<String>,
}
