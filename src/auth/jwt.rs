use std::str::FromStr;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::dto::TokenResponse;
use crate::config::JwtConfig;
use crate::state::AppState;

pub const TOKEN_TYPE: &str = "Bearer";
pub const TOKEN_SCOPE: &str = "read write";

/// JWT payload: subject identity plus issue/expiry times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,          // user ID
    pub email: String,      // user email
    pub iat: usize,         // issued at (unix timestamp)
    pub exp: usize,         // expires at (unix timestamp)
    pub token_type: String, // fixed "Bearer" marker
}

/// Verification failures the caller must tell apart: an expired token
/// means "re-authenticate", an invalid one means "malformed or forged".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

/// Signing and verification keys derived from process-wide config.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    validity_hours: i64,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        let algorithm = Algorithm::from_str(&config.algorithm).unwrap_or_else(|_| {
            warn!(algorithm = %config.algorithm, "unknown JWT algorithm, falling back to HS256");
            Algorithm::HS256
        });
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            algorithm,
            validity_hours: config.expiration_hours,
        }
    }

    /// Issue a signed access token for the given subject.
    pub fn issue(&self, user_id: Uuid, email: &str) -> anyhow::Result<String> {
        self.issue_at(OffsetDateTime::now_utc(), user_id, email)
    }

    /// Issue with an explicit clock, so expiry behavior is testable.
    pub(crate) fn issue_at(
        &self,
        now: OffsetDateTime,
        user_id: Uuid,
        email: &str,
    ) -> anyhow::Result<String> {
        let exp = now + Duration::hours(self.validity_hours);
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            token_type: TOKEN_TYPE.to_string(),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    /// Check signature and expiry. Only a correctly signed token whose
    /// `exp` has passed reports `Expired`; every other failure (bad
    /// signature, corruption, unsupported algorithm) is `Invalid`.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => {
                debug!(user_id = %data.claims.sub, "jwt verified");
                Ok(data.claims)
            }
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                _ => Err(TokenError::Invalid),
            },
        }
    }

    /// Wrap a token in an OAuth 2.0 token response. Pure formatting.
    pub fn oauth_response(&self, access_token: String) -> TokenResponse {
        TokenResponse {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.validity_hours * 3600,
            scope: TOKEN_SCOPE.to_string(),
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}
