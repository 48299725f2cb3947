//! Admin session gate.
//!
//! Mutations take an [`AdminCapability`], which only [`AdminAuthorizer`] can
//! mint. The capability is passed explicitly; nothing here is ambient state.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing admin token")]
    Missing,
    #[error("invalid admin token")]
    Invalid,
    #[error("admin access is not configured")]
    NotConfigured,
    #[error("admin token hash must be 64 hex characters")]
    MalformedHash,
}

/// Proof that the holder passed the admin check.
#[derive(Debug, Clone)]
pub struct AdminCapability {
    actor: String,
}

impl AdminCapability {
    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[derive(Clone)]
pub struct AdminAuthorizer {
    token_hash: Option<Vec<u8>>,
}

impl AdminAuthorizer {
    /// An authorizer that rejects every session.
    pub fn disabled() -> Self {
        Self { token_hash: None }
    }

    /// Build from a hex-encoded SHA-256 digest of the admin token.
    pub fn from_token_sha256(hex_digest: &str) -> Result<Self, AuthError> {
        let bytes = hex::decode(hex_digest.trim()).map_err(|_| AuthError::MalformedHash)?;
        if bytes.len() != 32 {
            return Err(AuthError::MalformedHash);
        }
        Ok(Self {
            token_hash: Some(bytes),
        })
    }

    /// Build from a plain token, hashing it immediately.
    pub fn from_token(token: &str) -> Self {
        Self {
            token_hash: Some(Self::hash_secret(token)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token_hash.is_some()
    }

    pub fn authorize(
        &self,
        actor: &str,
        token: Option<&str>,
    ) -> Result<AdminCapability, AuthError> {
        let expected = self.token_hash.as_ref().ok_or(AuthError::NotConfigured)?;
        let token = token
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::Missing)?;

        let hashed_input = Self::hash_secret(token);
        if expected.ct_eq(&hashed_input).unwrap_u8() == 0 {
            warn!(actor, "Admin authorization rejected");
            return Err(AuthError::Invalid);
        }

        info!(actor, "Admin session authorized");
        Ok(AdminCapability {
            actor: actor.to_string(),
        })
    }

    /// Hex digest suitable for the `admin.token_sha256` setting.
    pub fn token_digest(token: &str) -> String {
        hex::encode(Self::hash_secret(token))
    }

    fn hash_secret(secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }
}
