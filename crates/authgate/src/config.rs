//! Configuration file I/O
//!
//! The gateway reads one TOML file, then lets a handful of environment
//! variables replace the values that differ between deployments.

use anyhow::{Context, Result};
use authgate_core::GatewayConfig;
use std::fs;
use std::path::Path;

pub const ENV_SIGNING_KEY: &str = "AUTHGATE_SIGNING_KEY";
pub const ENV_ISSUER: &str = "AUTHGATE_ISSUER";
pub const ENV_AUDIENCE: &str = "AUTHGATE_AUDIENCE";
pub const ENV_LISTEN: &str = "AUTHGATE_LISTEN";

/// Default configuration file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "authgate.toml";

/// Load configuration from disk and apply environment overrides
///
/// Validation is left to [`authgate_core::Gateway::from_config`], which
/// reports every problem at once.
pub fn load(path: &Path) -> Result<GatewayConfig> {
    let content = fs::read_to_string(path).context(format!("Failed to read config: {}", path.display()))?;

    let config = parse(&content).context(format!("Failed to parse config: {}", path.display()))?;

    Ok(apply_overrides(config, |name| std::env::var(name).ok()))
}

pub fn parse(content: &str) -> Result<GatewayConfig> {
    Ok(toml::from_str(content)?)
}

/// Replace file values with any override `lookup` returns
///
/// Empty values are ignored so an exported-but-blank variable never wipes a
/// key from the file.
pub fn apply_overrides<F>(mut config: GatewayConfig, lookup: F) -> GatewayConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(key) = get(ENV_SIGNING_KEY) {
        tracing::debug!("Signing key taken from {ENV_SIGNING_KEY}");
        config.jwt.signing_key = key;
    }
    if let Some(issuer) = get(ENV_ISSUER) {
        config.jwt.issuer = issuer;
    }
    if let Some(audience) = get(ENV_AUDIENCE) {
        config.jwt.audience = audience;
    }
    if let Some(listen) = get(ENV_LISTEN) {
        config.server.listen = listen;
    }

    config
}
