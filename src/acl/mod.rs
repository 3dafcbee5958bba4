//! Access Control List (ACL) module
//!
//! Broker ACL documents, topic patterns and the store that owns them.

mod record;
mod store;
mod topic;

pub use record::{AclRecord, Direction, GroupConversation, TopicGrant};
pub use store::{AclStore, MemoryAclStore};
pub use topic::{is_valid_filter, is_valid_level, TopicPattern};
