use crate::auth::JwtSettings;
use crate::config::TokenIssuerConfig;
use crate::error::IssueError;
use crate::runtime::{SystemTimeProvider, TimeProvider};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest lifetime the test issuer may be configured with: one week
pub const MAX_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;

/// Role and scope requested for a test token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub role: String,
    pub scope: String,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            role: "User".to_string(),
            scope: "api.read".to_string(),
        }
    }
}

/// A freshly signed token and what it was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub role: String,
    pub scope: String,
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    sub: &'a str,
    name: &'a str,
    role: &'a str,
    scope: &'a str,
    permissions: &'a str,
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    nbf: i64,
}

/// Signs tokens with the gateway's own key so the pipeline can be exercised
/// without an external identity provider
pub struct TestTokenIssuer<T: TimeProvider = SystemTimeProvider> {
    settings: Arc<JwtSettings>,
    encoding_key: EncodingKey,
    lifetime_secs: u64,
    subject: String,
    name: String,
    permissions: String,
    time: T,
}

impl TestTokenIssuer<SystemTimeProvider> {
    pub fn new(settings: Arc<JwtSettings>, config: &TokenIssuerConfig) -> Self {
        Self::with_time_provider(settings, config, SystemTimeProvider)
    }
}

impl<T: TimeProvider> TestTokenIssuer<T> {
    pub fn with_time_provider(settings: Arc<JwtSettings>, config: &TokenIssuerConfig, time: T) -> Self {
        Self {
            encoding_key: settings.key().encoding_key(),
            settings,
            lifetime_secs: config.lifetime_secs,
            subject: config.subject.clone(),
            name: config.name.clone(),
            permissions: config.permissions.clone(),
            time,
        }
    }

    pub fn settings(&self) -> &Arc<JwtSettings> {
        &self.settings
    }

    pub fn issue(&self, request: &TokenRequest) -> Result<IssuedToken, IssueError> {
        let now = self.time.now();
        let expires = i64::try_from(self.lifetime_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(IssueError::LifetimeOutOfRange(self.lifetime_secs))?;

        let claims = IssuedClaims {
            sub: &self.subject,
            name: &self.name,
            role: &request.role,
            scope: &request.scope,
            permissions: &self.permissions,
            iss: &self.settings.issuer,
            aud: &self.settings.audience,
            exp: expires.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
        };

        let token = encode(&Header::new(self.settings.algorithm()), &claims, &self.encoding_key)?;

        tracing::debug!(role = %request.role, scope = %request.scope, expires = %expires, "Issued test token");

        Ok(IssuedToken {
            token,
            expires,
            role: request.role.clone(),
            scope: request.scope.clone(),
        })
    }
}
