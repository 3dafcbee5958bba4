//! Configuration types for the MQTT ACL provisioner
//!
//! Provides JSON-serializable configuration for credential format checks,
//! identity verification, identity caching and topic layout.

use crate::acl::TopicPattern;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// MQTT ACL Provisioner Configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProvisionerConfig {
    /// Credential format checks
    pub credential: CredentialConfig,

    /// External identity verification
    pub verifier: VerifierConfig,

    /// Identity cache behaviour
    pub cache: CacheConfig,

    /// Topic namespace and default ACL layout
    pub topics: TopicConfig,
}

impl ProvisionerConfig {
    /// Check everything that can be checked before any request is served
    pub fn validate(&self) -> Result<()> {
        regex::Regex::new(&self.credential.token_pattern)
            .map_err(|e| Error::Config(format!("invalid token pattern: {}", e)))?;

        if self.cache.entry_ttl_secs == Some(0) {
            return Err(Error::Config("entry-ttl-secs must be greater than zero".to_string()));
        }

        self.topics.validate()?;

        if let VerifierConfig::Http { url, .. } = &self.verifier {
            if url.is_empty() {
                return Err(Error::Config("verifier url must not be empty".to_string()));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Credential Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CredentialConfig {
    /// Regex every bearer token must match before it is verified
    pub token_pattern: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_pattern: default_token_pattern(),
        }
    }
}

// ============================================================================
// Verifier Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum VerifierConfig {
    /// Remote verification endpoint
    Http {
        url: String,
        /// Header carrying the bearer token
        #[serde(default = "default_token_header")]
        token_header: String,
        #[serde(default = "default_http_timeout")]
        timeout_ms: u64,
        /// Extra headers to include in the verification request
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Static token table (JSON file)
    File {
        path: PathBuf,
        /// Reload file on every verification (for development)
        #[serde(default)]
        hot_reload: bool,
    },

    /// Local HS256 validation of signed tokens
    Jwt {
        /// Static secret for HMAC validation
        secret: String,
        /// Expected issuer claim
        issuer: Option<String>,
        /// Expected audience claim
        audience: Option<String>,
        /// Claim carrying the broker client ID
        #[serde(default = "default_client_id_claim")]
        client_id_claim: String,
        /// Claim carrying the username
        #[serde(default = "default_username_claim")]
        username_claim: String,
        /// Claim carrying the broker password hash
        #[serde(default = "default_password_hash_claim")]
        password_hash_claim: String,
    },
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::Http {
            url: "http://127.0.0.1:8080/auth/mqtt".to_string(),
            token_header: default_token_header(),
            timeout_ms: default_http_timeout(),
            headers: HashMap::new(),
        }
    }
}

// ============================================================================
// Cache Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    /// Seconds a cached identity is trusted before it is verified again.
    ///
    /// Inside this window a hit makes no verifier call, so a rotated
    /// password hash or a revoked token is only noticed (as `Updated` or
    /// `InvalidCredential`) once the window has elapsed. Set to 0 to
    /// re-verify on every request.
    pub revalidate_after_secs: u64,

    /// TTL handed to the in-memory cache (None = entries never expire)
    pub entry_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            revalidate_after_secs: default_revalidate_after(),
            entry_ttl_secs: Some(default_entry_ttl()),
        }
    }
}

// ============================================================================
// Topic Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TopicConfig {
    /// Prefix of every group conversation namespace
    pub group_prefix: String,

    /// Broker mountpoint written into ACL records
    pub mountpoint: String,

    /// Publish patterns seeded for every new client
    /// (`{client_id}` and `{username}` are substituted)
    pub default_publish: Vec<String>,

    /// Subscribe patterns seeded for every new client
    pub default_subscribe: Vec<String>,
}

impl TopicConfig {
    fn validate(&self) -> Result<()> {
        let prefix = self.group_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.contains('+') || prefix.contains('#') {
            return Err(Error::Config(format!(
                "group prefix must be a non-empty topic without wildcards: {:?}",
                self.group_prefix
            )));
        }
        TopicPattern::new(format!("{}/x/+", prefix))?;

        for template in self.default_publish.iter().chain(&self.default_subscribe) {
            let expanded = expand_template(template, "client", "user");
            TopicPattern::new(expanded).map_err(|e| {
                Error::Config(format!("invalid default topic {:?}: {}", template, e))
            })?;
        }

        Ok(())
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            group_prefix: default_group_prefix(),
            mountpoint: String::new(),
            default_publish: vec!["private/+/{client_id}".to_string()],
            default_subscribe: vec!["private/{client_id}/+".to_string()],
        }
    }
}

/// Substitute identity placeholders in a topic template
pub fn expand_template(template: &str, client_id: &str, username: &str) -> String {
    template
        .replace("{client_id}", client_id)
        .replace("{username}", username)
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_token_pattern() -> String {
    "^[A-Za-z0-9._~+/=-]{8,1024}$".to_string()
}

fn default_token_header() -> String {
    "token".to_string()
}

fn default_http_timeout() -> u64 {
    5000
}

fn default_client_id_claim() -> String {
    "client_id".to_string()
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_password_hash_claim() -> String {
    "passhash".to_string()
}

fn default_revalidate_after() -> u64 {
    300
}

fn default_entry_ttl() -> u64 {
    24 * 60 * 60
}

fn default_group_prefix() -> String {
    "groups".to_string()
}
