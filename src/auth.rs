use crate::{
    error::{MarketError, Result},
    model::Role,
    UserId,
};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Verifies bearer tokens. Issuance belongs to the platform's auth service;
/// `issue` exists for development tooling and tests.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user_id: UserId, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: (now + self.ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| MarketError::Unauthorized(format!("Failed to generate JWT: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Caller> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| MarketError::Unauthorized(format!("Invalid JWT: {}", e)))?;

        let user_id = UserId::parse_str(&claims.sub)
            .map_err(|_| MarketError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(Caller {
            user_id,
            role: claims.role,
        })
    }
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins pass every role check.
    pub fn require_role(&self, role: Role) -> Result<()> {
        if self.role == role || self.is_admin() {
            Ok(())
        } else {
            Err(MarketError::forbidden(format!("requires the {} role", role)))
        }
    }

    pub fn require_self_or_admin(&self, owner: UserId, action: &str) -> Result<()> {
        if self.user_id == owner || self.is_admin() {
            Ok(())
        } else {
            Err(MarketError::forbidden(format!("only the owner may {}", action)))
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(MarketError::forbidden(format!("only administrators may {}", action)))
        }
    }

    /// The user an operation acts for: the caller, or `requested` when an
    /// admin acts on someone's behalf.
    pub fn acting_for(&self, requested: Option<UserId>) -> Result<UserId> {
        match requested {
            Some(id) if id != self.user_id => {
                self.require_admin("act on behalf of another user")?;
                Ok(id)
            }
            _ => Ok(self.user_id),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = MarketError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| MarketError::Unauthorized("Missing Authorization header".to_string()))?
            .to_str()
            .map_err(|_| MarketError::Unauthorized("Malformed Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| MarketError::Unauthorized("Expected a Bearer token".to_string()))?;

        let tokens = Arc::<TokenService>::from_ref(state);
        tokens.verify(token.trim())
    }
}
