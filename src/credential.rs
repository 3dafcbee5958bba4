//! Credential format checks
//!
//! A token that does not match the configured pattern is rejected before any
//! verification call is made. Matching the pattern proves nothing about
//! validity.

use crate::config::CredentialConfig;
use crate::error::{Error, Result};
use regex::Regex;

/// Compiled token format checker
#[derive(Debug, Clone)]
pub struct CredentialChecker {
    pattern: Regex,
}

impl CredentialChecker {
    pub fn new(config: &CredentialConfig) -> Result<Self> {
        let pattern = Regex::new(&config.token_pattern)
            .map_err(|e| Error::Config(format!("invalid token pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    pub fn is_valid(&self, credential: &str) -> bool {
        !credential.is_empty() && self.pattern.is_match(credential)
    }

    /// Fail with [`Error::InvalidCredential`] unless the credential matches
    pub fn check(&self, credential: &str) -> Result<()> {
        if self.is_valid(credential) {
            Ok(())
        } else {
            Err(Error::invalid_credential("invalid token format"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(pattern: &str) -> CredentialChecker {
        CredentialChecker::new(&CredentialConfig {
            token_pattern: pattern.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_default_pattern() {
        let checker = CredentialChecker::new(&CredentialConfig::default()).unwrap();
        assert!(checker.is_valid("eyJhbGciOiJIUzI1NiJ9.e30.sig"));
        assert!(!checker.is_valid(""));
        assert!(!checker.is_valid("short"));
        assert!(!checker.is_valid("has spaces in it"));
    }

    #[test]
    fn test_custom_pattern() {
        let checker = checker("^tok-[A-Z]$");
        assert!(checker.check("tok-A").is_ok());
        assert!(matches!(checker.check("tok-a"), Err(Error::InvalidCredential(_))));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = CredentialChecker::new(&CredentialConfig {
            token_pattern: "(".to_string(),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
