use std::time::Duration;

use eyre::{Result, WrapErr};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::{
    config::models::JwtConfig,
    ports::identity::{Claims, IdentityError, IdentityResult, User},
};

/// `iss` claim on every token this gateway issues.
pub const TOKEN_ISSUER: &str = "waypoint";

/// Issues and verifies HS256 identity tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
}

impl TokenService {
    pub fn new(secret: &str, expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        let expiry = config
            .expiry_duration()
            .wrap_err_with(|| format!("invalid jwt.expiry '{}'", config.expiry))?;
        Ok(Self::new(&config.secret, expiry))
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Issue a token for `user`.
    pub fn issue(&self, user: &User) -> IdentityResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role.clone(),
            iat: now,
            exp: now + self.expiry.as_secs() as i64,
            iss: TOKEN_ISSUER.to_string(),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> IdentityResult<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| IdentityError::Internal(format!("failed to encode token: {e}")))
    }

    /// Verify signature, expiry and issuer.
    pub fn verify(&self, token: &str) -> IdentityResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.validate_aud = false;

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| IdentityError::Token(e.to_string()))
    }
}
