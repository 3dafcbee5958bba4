//! JWT-based verification
//!
//! Validates HS256-signed tokens locally and reads the broker identity from
//! configurable claims.

use super::IdentityVerifier;
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (usually the username)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<StringOrVec>,
    /// Expiration time (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Identity claims (names are configurable)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// String or array of strings (for audience claim)
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

/// JWT verifier
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    client_id_claim: String,
    username_claim: String,
    password_hash_claim: String,
}

impl JwtVerifier {
    pub fn new(
        secret: String,
        issuer: Option<String>,
        audience: Option<String>,
        client_id_claim: String,
        username_claim: String,
        password_hash_claim: String,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);

        if let Some(ref iss) = issuer {
            validation.set_issuer(&[iss]);
        }

        match audience {
            Some(ref aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            client_id_claim,
            username_claim,
            password_hash_claim,
        }
    }

    fn claim(&self, claims: &Claims, name: &str) -> Option<String> {
        if name == "sub" {
            return claims.sub.clone();
        }

        match claims.extra.get(name) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<ClientIdentity> {
        let claims = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Token validation failed");
                Error::invalid_credential(format!("token validation failed: {}", e))
            })?
            .claims;

        let required = |name: &str| {
            self.claim(&claims, name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::invalid_credential(format!("token has no {:?} claim", name)))
        };

        Ok(ClientIdentity {
            client_id: required(&self.client_id_claim)?,
            username: required(&self.username_claim)?,
            password_hash: required(&self.password_hash_claim)?,
        })
    }

    fn name(&self) -> &str {
        "jwt"
    }
}
