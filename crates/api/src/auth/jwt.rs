//! JWT verification.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by tokens from the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id (UUID as string).
    pub sub: String,
    /// Role: "user" or "admin".
    #[serde(default = "default_role")]
    pub role: String,
    /// Expiry (unix seconds).
    pub exp: i64,
}

fn default_role() -> String {
    "user".to_string()
}

/// Verifies HS256 tokens issued by the auth service.
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and validate a bearer token.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(role: &str, exp_offset: i64) -> Claims {
        Claims {
            sub: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset,
        }
    }

    #[test]
    fn valid_token_verifies() {
        let manager = JwtManager::new("secret");
        let claims = claims("user", 3600);
        let decoded = manager.verify(&token("secret", &claims)).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.role, "user");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let manager = JwtManager::new("secret");
        assert!(manager.verify(&token("other", &claims("user", 3600))).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = JwtManager::new("secret");
        assert!(manager.verify(&token("secret", &claims("user", -3600))).is_err());
    }
}
