use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use careline_domain::identity::AuthedUser;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid credential: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

/// The identity-verification primitive: bearer credential to verified user.
/// Stateless; each call is independent and side-effect free.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: String,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, credential: &str) -> Result<AuthedUser, VerifyError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let data = decode::<Claims>(
            credential,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| VerifyError::Invalid(err.to_string()))?;

        let email = data
            .claims
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| data.claims.sub.clone());
        Ok(AuthedUser {
            user_id: data.claims.sub,
            email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: String,
        exp: usize,
    }

    fn mint(secret: &str, sub: &str, offset_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_secs() as i64;
        let claims = TestClaims {
            sub: sub.to_string(),
            email: format!("{sub}@example.com"),
            exp: (now + offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("token")
    }

    #[test]
    fn verifies_a_valid_token() {
        let verifier = JwtVerifier::new("secret");
        let user = verifier.verify(&mint("secret", "user-1", 3600)).expect("verify");
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.email, "user-1@example.com");
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let verifier = JwtVerifier::new("secret");
        assert!(verifier.verify(&mint("other", "user-1", 3600)).is_err());
        assert!(verifier.verify(&mint("secret", "user-1", -3600)).is_err());
        assert!(verifier.verify("not-a-token").is_err());
    }
}
