//! Signed claims (HS256 JWT)
//! 登录后签发，承载 subject、角色与邮箱；cookie 与 Bearer 头两种方式携带

use crate::{config::AppConfig, error::AppError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer written into every token and required on validation.
pub const ISSUER: &str = "lab-system";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Issuer
    pub iss: String,

    /// Subject (user id)
    pub sub: String,

    /// Role name at issue time
    pub role: String,

    pub email: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

/// Token returned by login and refresh
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64, // seconds until the token expires
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_exp_secs: u64,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let secret = config.auth_key.expose_secret();

        // HS256 至少 32 字节
        if secret.len() < 32 {
            return Err(AppError::Config(
                "auth key too short (min 32 chars)".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_exp_secs: config.security.token_exp_secs,
        })
    }

    pub fn token_exp_secs(&self) -> u64 {
        self.token_exp_secs
    }

    /// Claims for `sub` valid from now for the configured lifetime.
    pub fn claims_for(&self, sub: &str, role: &str, email: &str) -> Claims {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.token_exp_secs as i64);

        Claims {
            iss: ISSUER.to_string(),
            sub: sub.to_string(),
            role: role.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    pub fn issue(&self, sub: &str, role: &str, email: &str) -> Result<IssuedToken, AppError> {
        let claims = self.claims_for(sub, role, email);
        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode token: {:?}", e);
            AppError::Internal(format!("Failed to encode token: {}", e))
        })?;

        Ok(IssuedToken {
            token,
            expires_in: self.token_exp_secs,
        })
    }

    /// Re-mints a token for the same subject with a fresh expiry.
    pub fn refresh(&self, claims: &Claims) -> Result<IssuedToken, AppError> {
        self.issue(&claims.sub, &claims.role, &claims.email)
    }

    /// Validate and decode token
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                AppError::Unauthorized
            })?
            .claims)
    }
}
