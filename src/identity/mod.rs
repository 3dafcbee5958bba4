//! Verified client identities and the cache that remembers them
//!
//! The cache holds two kinds of entries:
//!
//! - `token:<credential>`: the identity last resolved for a bearer token,
//!   plus the unix time it was last verified
//! - `mapping:<external user id>`: the internal client ID of a user, used to
//!   resolve group member handles

mod cache;

pub use cache::{IdentityCache, MemoryIdentityCache};

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub const FIELD_CLIENT_ID: &str = "client-id";
pub const FIELD_USERNAME: &str = "username";
pub const FIELD_PASSWORD_HASH: &str = "password-hash";
pub const FIELD_VERIFIED_AT: &str = "verified-at";
pub const FIELD_INTERNAL_CLIENT_ID: &str = "internal-client-id";

/// Broker-facing identity produced by a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_id: String,
    pub username: String,
    pub password_hash: String,
}

/// Link from an external user handle to an internal client ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(rename = "externalUserID")]
    pub external_user_id: String,
    #[serde(rename = "internalClientID")]
    pub internal_client_id: String,
}

pub fn token_key(credential: &str) -> String {
    format!("token:{}", credential)
}

pub fn mapping_key(external_user_id: &str) -> String {
    format!("mapping:{}", external_user_id)
}

/// Look up the internal client ID for an external user handle
pub async fn resolve_mapping(
    cache: &dyn IdentityCache,
    external_user_id: &str,
) -> Result<Option<String>> {
    let key = mapping_key(external_user_id);
    if !cache.exists(&key).await? {
        return Ok(None);
    }

    Ok(cache
        .get(&key, FIELD_INTERNAL_CLIENT_ID)
        .await?
        .filter(|id| !id.is_empty()))
}

/// Record the internal client ID for an external user handle
pub async fn store_mapping(
    cache: &dyn IdentityCache,
    external_user_id: &str,
    internal_client_id: &str,
) -> Result<()> {
    cache
        .set(
            &mapping_key(external_user_id),
            &[(FIELD_INTERNAL_CLIENT_ID, internal_client_id.to_string())],
        )
        .await
}
