//! Remote verification endpoint

use super::IdentityVerifier;
use crate::error::{Error, Result};
use crate::identity::ClientIdentity;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Response body of the verification endpoint
#[derive(Debug, Deserialize)]
struct AuthInfos {
    #[serde(rename = "clientID")]
    client_id: String,
    username: String,
    /// Broker password hash
    password: String,
}

/// Verifies tokens by asking a remote endpoint for the broker identity
pub struct HttpVerifier {
    client: reqwest::Client,
    url: String,
    token_header: String,
    headers: HashMap<String, String>,
}

impl HttpVerifier {
    pub fn new(
        url: String,
        token_header: String,
        timeout: Duration,
        headers: HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build verification HTTP client")?;

        Ok(Self {
            client,
            url,
            token_header,
            headers,
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpVerifier {
    async fn verify(&self, credential: &str) -> Result<ClientIdentity> {
        let mut request = self
            .client
            .get(&self.url)
            .header(self.token_header.as_str(), credential);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "Verification request failed");
            Error::invalid_credential("verification endpoint unreachable")
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = %status, "Credential rejected by verification endpoint");
            return Err(Error::invalid_credential(format!(
                "rejected by verification endpoint ({})",
                status
            )));
        }

        let infos: AuthInfos = response.json().await.map_err(|e| {
            warn!(error = %e, "Malformed verification response");
            Error::invalid_credential("malformed verification response")
        })?;

        if infos.client_id.is_empty() {
            return Err(Error::invalid_credential("verification response has no client ID"));
        }

        Ok(ClientIdentity {
            client_id: infos.client_id,
            username: infos.username,
            password_hash: infos.password,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier(server: &MockServer) -> HttpVerifier {
        let mut headers = HashMap::new();
        headers.insert("x-service".to_string(), "provisioner".to_string());

        HttpVerifier::new(
            format!("{}/auth/mqtt", server.uri()),
            "token".to_string(),
            Duration::from_secs(2),
            headers,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/mqtt"))
            .and(header("token", "tok-A"))
            .and(header("x-service", "provisioner"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clientID": "c1",
                "username": "alice",
                "password": "hash-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let identity = verifier(&server).verify("tok-A").await.unwrap();
        assert_eq!(
            identity,
            ClientIdentity {
                client_id: "c1".to_string(),
                username: "alice".to_string(),
                password_hash: "hash-1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = verifier(&server).verify("tok-bad").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = verifier(&server).verify("tok-A").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn test_empty_client_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clientID": "",
                "username": "alice",
                "password": "hash-1"
            })))
            .mount(&server)
            .await;

        let err = verifier(&server).verify("tok-A").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }
}
