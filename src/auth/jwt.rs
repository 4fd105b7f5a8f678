use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access token claims issued by the host application's auth service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub tid: Uuid,
    pub role: String,
    pub sys: bool,
    pub exp: i64,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        tenant_id: Uuid,
        role: impl Into<String>,
        is_system_admin: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: user_id,
            tid: tenant_id,
            role: role.into(),
            sys: is_system_admin,
            exp: (Utc::now() + ttl).timestamp(),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.sys || self.role == "owner" || self.role == "admin"
    }
}

pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| format!("JWT encode failed: {e}"))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, String> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| format!("JWT decode failed: {e}"))
}
