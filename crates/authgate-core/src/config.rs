//! Configuration schema for the gateway
//!
//! The schema only describes data; reading it from disk or the environment
//! is the binary's job. All sections use `#[serde(default)]` where a sensible
//! default exists, so a minimal file only needs a signing key, policies,
//! routes and clusters.

use crate::auth::Requirement;
use crate::gateway::Gateway;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub jwt: JwtConfig,

    #[serde(default)]
    pub token_issuer: TokenIssuerConfig,

    /// Named policies, referenced by routes
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyDefinition>,

    /// Routes in evaluation order: first match wins
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteDefinition>,

    /// Backend clusters: id → destinations
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub clusters: BTreeMap<String, ClusterDefinition>,
}

impl GatewayConfig {
    /// Validate the configuration by building a gateway from it
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        match Gateway::from_config(self) {
            Ok(_) => Ok(()),
            Err(crate::ConfigError::Invalid(errors)) => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub listen: String,

    /// Upper bound for a single upstream exchange, in seconds
    pub upstream_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            upstream_timeout_secs: 30,
        }
    }
}

/// Bearer token validation settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Shared HMAC secret, at least 32 bytes of UTF-8
    pub signing_key: String,

    /// Expected signing algorithm (HS256, HS384 or HS512)
    pub algorithm: String,

    pub issuer: String,
    pub audience: String,

    pub validate_issuer: bool,
    pub validate_audience: bool,
    pub validate_lifetime: bool,

    /// Only meaningful for keys fetched from a metadata endpoint
    pub require_https_metadata: bool,

    /// Tolerance applied to `exp` and `nbf`
    pub clock_skew_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            algorithm: "HS256".to_string(),
            issuer: String::new(),
            audience: String::new(),
            validate_issuer: true,
            validate_audience: true,
            validate_lifetime: true,
            require_https_metadata: true,
            clock_skew_secs: 300,
        }
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("signing_key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("validate_issuer", &self.validate_issuer)
            .field("validate_audience", &self.validate_audience)
            .field("validate_lifetime", &self.validate_lifetime)
            .field("require_https_metadata", &self.require_https_metadata)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .finish()
    }
}

/// Settings for the local test-token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenIssuerConfig {
    pub enabled: bool,
    pub lifetime_secs: u64,
    pub subject: String,
    pub name: String,
    pub permissions: String,
}

impl Default for TokenIssuerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_secs: 3600,
            subject: "test-user-123".to_string(),
            name: "Test User".to_string(),
            permissions: "read".to_string(),
        }
    }
}

/// A named policy: every requirement must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,

    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub id: String,

    /// Path template, e.g. `/api/{**rest}` or `/admin/*`
    pub path: String,

    /// HTTP methods; empty matches any method
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    /// Policy name; absent or `anonymous` means no authentication
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationDefinition {
    /// Base URL, e.g. `http://127.0.0.1:5001`
    pub address: String,
}
