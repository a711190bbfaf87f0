use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{config::TokenConfig, state::AppState};

/// What a signed token may be used for.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    PasswordReset,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,       // user ID
    pub exp: i64,        // expiration time
    pub iat: i64,        // issued at
    pub iss: String,     // issuer
    pub aud: String,     // audience
    pub purpose: TokenPurpose,
}

/// Signing and verification keys for password reset links.
#[derive(Clone)]
pub struct TokenKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub reset_ttl: Duration,
}

impl TokenKeys {
    pub fn new(cfg: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            reset_ttl: Duration::from_secs((cfg.reset_ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn sign_reset(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_reset_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn sign_reset_at(&self, user_id: Uuid, issued_at: OffsetDateTime) -> anyhow::Result<String> {
        let exp = issued_at + TimeDuration::seconds(self.reset_ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: issued_at.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            purpose: TokenPurpose::PasswordReset,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "reset token signed");
        Ok(token)
    }

    /// Checks signature, issuer, audience and expiry (no leeway) and returns
    /// the user the token was issued for.
    pub fn verify_reset(&self, token: &str) -> anyhow::Result<Uuid> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        if data.claims.purpose != TokenPurpose::PasswordReset {
            anyhow::bail!("not a password reset token");
        }
        debug!(user_id = %data.claims.sub, "reset token verified");
        Ok(data.claims.sub)
    }
}

impl FromRef<AppState> for TokenKeys {
    fn from_ref(state: &AppState) -> Self {
        TokenKeys::new(&state.config.tokens)
    }
}
