use crate::config::JwtConfig;
use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use std::fmt;

/// Minimum accepted length of the shared HMAC secret
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Largest accepted clock skew: one day
pub const MAX_CLOCK_SKEW_SECS: u64 = 24 * 60 * 60;

/// Shared HMAC secret
///
/// Never printed: `Debug` renders a placeholder.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn from_secret(secret: &str) -> Result<Self, String> {
        let bytes = secret.as_bytes();
        if bytes.len() < MIN_SIGNING_KEY_BYTES {
            return Err(format!(
                "jwt.signing_key must be at least {MIN_SIGNING_KEY_BYTES} bytes (got {})",
                bytes.len()
            ));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.0)
    }

    pub(crate) fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.0)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Validated token settings shared by the validator and the test issuer
#[derive(Debug, Clone)]
pub struct JwtSettings {
    key: SigningKey,
    algorithm: Algorithm,
    pub issuer: String,
    pub audience: String,
    pub validate_issuer: bool,
    pub validate_audience: bool,
    pub validate_lifetime: bool,
    pub require_https_metadata: bool,
    pub clock_skew: Duration,
}

impl JwtSettings {
    /// Build settings from raw configuration, collecting every error
    pub fn from_config(config: &JwtConfig) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        let key = SigningKey::from_secret(&config.signing_key)
            .map_err(|e| errors.push(e))
            .ok();

        let algorithm = parse_algorithm(&config.algorithm)
            .map_err(|e| errors.push(e))
            .ok();

        if config.validate_issuer && config.issuer.is_empty() {
            errors.push("jwt.issuer is required when jwt.validate_issuer is enabled".to_string());
        }
        if config.validate_audience && config.audience.is_empty() {
            errors.push(
                "jwt.audience is required when jwt.validate_audience is enabled".to_string(),
            );
        }

        let clock_skew = parse_clock_skew(config.clock_skew_secs)
            .map_err(|e| errors.push(e))
            .ok();

        match (key, algorithm, clock_skew) {
            (Some(key), Some(algorithm), Some(clock_skew)) if errors.is_empty() => Ok(Self {
                key,
                algorithm,
                issuer: config.issuer.clone(),
                audience: config.audience.clone(),
                validate_issuer: config.validate_issuer,
                validate_audience: config.validate_audience,
                validate_lifetime: config.validate_lifetime,
                require_https_metadata: config.require_https_metadata,
                clock_skew,
            }),
            _ => Err(errors),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }
}

fn parse_clock_skew(secs: u64) -> Result<Duration, String> {
    if secs > MAX_CLOCK_SKEW_SECS {
        return Err(format!(
            "jwt.clock_skew_secs must be at most {MAX_CLOCK_SKEW_SECS} (got {secs})"
        ));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| format!("jwt.clock_skew_secs {secs} is out of range"))
}

/// Only symmetric algorithms are trusted with a shared secret
fn parse_algorithm(name: &str) -> Result<Algorithm, String> {
    match name {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        alg => Err(format!(
            "jwt.algorithm '{alg}' is not supported (expected HS256, HS384 or HS512)"
        )),
    }
}
