//! MQTT ACL Provisioner
//!
//! Issues and maintains broker ACL records for clients of an MQTT broker,
//! keeping three collaborators in agreement:
//!
//! - **Identity verification**: an external endpoint (or local JWT/token
//!   table) that turns a bearer token into a broker identity
//! - **Identity cache**: remembers verified tokens and user-to-client mappings
//!   so the verifier is not asked on every request
//! - **ACL store**: one ACL document per client plus group conversation
//!   documents
//!
//! # Architecture
//!
//! [`reconcile::AuthReconciler`] classifies every credential as
//! [`reconcile::CacheOutcome::Fresh`], `Cached` or `Updated`.
//! [`group::GroupSynchronizer`] resolves group members and fans out
//! publish/subscribe grants on the group's topic namespace.
//! [`agent::Provisioner`] ties both to the store and serves requests.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "credential": { "token-pattern": "^[A-Za-z0-9._-]{16,}$" },
//!   "verifier": {
//!     "type": "http",
//!     "url": "https://auth.example.com/mqtt",
//!     "token_header": "token"
//!   },
//!   "cache": { "revalidate-after-secs": 300 },
//!   "topics": {
//!     "group-prefix": "groups",
//!     "default-subscribe": ["private/{client_id}/+"]
//!   }
//! }
//! ```

pub mod acl;
pub mod agent;
pub mod config;
pub mod credential;
pub mod error;
pub mod group;
pub mod identity;
pub mod reconcile;
pub mod verify;

// Re-export main types
pub use agent::Provisioner;
pub use config::ProvisionerConfig;
pub use error::{Error, Result};
