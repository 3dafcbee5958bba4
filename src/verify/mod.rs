//! Identity verification
//!
//! Providers turn a bearer token into a verified [`ClientIdentity`].

mod file;
mod http;
mod jwt;

pub use file::{FileVerifier, TokenEntry, TokenFile};
pub use http::HttpVerifier;
pub use jwt::{Claims, JwtVerifier};

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::identity::ClientIdentity;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Identity verification provider
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential. Any rejection is [`crate::Error::InvalidCredential`].
    async fn verify(&self, credential: &str) -> Result<ClientIdentity>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Build the verifier described by the configuration
pub fn from_config(config: &VerifierConfig) -> anyhow::Result<Arc<dyn IdentityVerifier>> {
    let verifier: Arc<dyn IdentityVerifier> = match config {
        VerifierConfig::Http {
            url,
            token_header,
            timeout_ms,
            headers,
        } => Arc::new(HttpVerifier::new(
            url.clone(),
            token_header.clone(),
            Duration::from_millis(*timeout_ms),
            headers.clone(),
        )?),
        VerifierConfig::File { path, hot_reload } => {
            Arc::new(FileVerifier::from_file(path, *hot_reload)?)
        }
        VerifierConfig::Jwt {
            secret,
            issuer,
            audience,
            client_id_claim,
            username_claim,
            password_hash_claim,
        } => Arc::new(JwtVerifier::new(
            secret.clone(),
            issuer.clone(),
            audience.clone(),
            client_id_claim.clone(),
            username_claim.clone(),
            password_hash_claim.clone(),
        )),
    };

    Ok(verifier)
}
