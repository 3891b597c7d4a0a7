use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{AuthError, Identity, TokenVerifier};

/// Access token lifetime used by [`issue_access_token`] callers that have no
/// policy of their own (72 hours).
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 72 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Display name shown to other users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an HS256 access token for `user_id`, optionally carrying its
/// display name. Token issuance belongs to the identity service; this exists
/// so it can share the secret, and for tests.
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    name: Option<&str>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_secs,
        name: name.map(str::to_string),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

/// [`TokenVerifier`] over HS256 tokens signed with a shared secret.
pub struct JwtVerifier {
    secret: Vec<u8>,
}

impl JwtVerifier {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let claims = validate_access_token(&self.secret, token)?;
        Ok(Identity {
            user_id: claims.sub,
            display_name: claims.name.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_verifies_to_user() {
        let verifier = JwtVerifier::new(vec![7u8; 32]);
        let token = issue_access_token(&[7u8; 32], "alice", None, DEFAULT_TOKEN_TTL_SECS).unwrap();
        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.display_name, None);
    }

    #[test]
    fn test_name_claim_becomes_display_name() {
        let verifier = JwtVerifier::new(vec![7u8; 32]);
        let token =
            issue_access_token(&[7u8; 32], "alice", Some("Alice"), DEFAULT_TOKEN_TTL_SECS).unwrap();
        assert_eq!(
            verifier.verify(&token).unwrap(),
            Identity {
                user_id: "alice".to_string(),
                display_name: Some("Alice".to_string()),
            }
        );

        let blank = issue_access_token(&[7u8; 32], "bob", Some("  "), DEFAULT_TOKEN_TTL_SECS).unwrap();
        assert_eq!(verifier.verify(&blank).unwrap().display_name, None);
    }

    #[test]
    fn test_wrong_secret_and_expired_tokens_are_rejected() {
        let verifier = JwtVerifier::new(vec![7u8; 32]);

        let foreign = issue_access_token(&[9u8; 32], "alice", None, DEFAULT_TOKEN_TTL_SECS).unwrap();
        assert!(matches!(verifier.verify(&foreign), Err(AuthError::Invalid(_))));

        // Past the default 60s leeway.
        let expired = issue_access_token(&[7u8; 32], "alice", None, -3600).unwrap();
        assert!(matches!(verifier.verify(&expired), Err(AuthError::Invalid(_))));

        assert!(matches!(verifier.verify(""), Err(AuthError::Missing)));
    }

    #[test]
    fn test_secret_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let first = load_or_generate_jwt_secret(data_dir).unwrap();
        let second = load_or_generate_jwt_secret(data_dir).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }
}
