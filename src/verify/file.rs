//! File-based token table
//!
//! Maps bearer tokens to broker identities from a JSON file. Intended for
//! development and tests where no verification endpoint is available.

use super::IdentityVerifier;
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Token entry in the token file
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub client_id: String,
    pub username: String,
    pub password_hash: String,
    /// Whether the token is accepted
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Token file format
#[derive(Debug, Clone, Deserialize)]
pub struct TokenFile {
    /// Map of token to identity
    pub tokens: HashMap<String, TokenEntry>,
}

/// Token table verifier
pub struct FileVerifier {
    /// Path to the token file (None for programmatic tables)
    path: Option<PathBuf>,
    tokens: RwLock<HashMap<String, TokenEntry>>,
    /// Reload the file on every verification
    hot_reload: bool,
    verifications: AtomicU64,
}

impl FileVerifier {
    /// Create from a token file
    pub fn from_file(path: &Path, hot_reload: bool) -> anyhow::Result<Self> {
        let tokens = load_token_file(path)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            tokens: RwLock::new(tokens),
            hot_reload,
            verifications: AtomicU64::new(0),
        })
    }

    /// Create an empty table filled through [`FileVerifier::set_token`]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tokens: RwLock::new(HashMap::new()),
            hot_reload: false,
            verifications: AtomicU64::new(0),
        }
    }

    /// Reload tokens from file
    pub fn reload(&self) -> anyhow::Result<()> {
        if let Some(ref path) = self.path {
            let tokens = load_token_file(path)?;
            *self.tokens.write() = tokens;
        }
        Ok(())
    }

    /// Add or replace a token
    pub fn set_token(&self, token: &str, identity: ClientIdentity) {
        self.tokens.write().insert(
            token.to_string(),
            TokenEntry {
                client_id: identity.client_id,
                username: identity.username,
                password_hash: identity.password_hash,
                enabled: true,
            },
        );
    }

    pub fn remove_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Number of verifications performed so far
    pub fn verification_count(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl IdentityVerifier for FileVerifier {
    async fn verify(&self, credential: &str) -> Result<ClientIdentity> {
        self.verifications.fetch_add(1, Ordering::Relaxed);

        if self.hot_reload {
            if let Err(e) = self.reload() {
                tracing::warn!(error = %e, "Failed to hot reload token file");
            }
        }

        let tokens = self.tokens.read();
        let entry = tokens
            .get(credential)
            .ok_or_else(|| Error::invalid_credential("unknown token"))?;

        if !entry.enabled {
            return Err(Error::invalid_credential("token is disabled"));
        }

        Ok(ClientIdentity {
            client_id: entry.client_id.clone(),
            username: entry.username.clone(),
            password_hash: entry.password_hash.clone(),
        })
    }

    fn name(&self) -> &str {
        "token-file"
    }
}

fn load_token_file(path: &Path) -> anyhow::Result<HashMap<String, TokenEntry>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?;

    let file: TokenFile =
        serde_json::from_str(&contents).with_context(|| "Failed to parse token file")?;

    Ok(file.tokens)
}
