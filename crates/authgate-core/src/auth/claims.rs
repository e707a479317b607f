use crate::auth::ValidationFailure;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Claims extracted from a verified token
///
/// Holds the payload exactly as signed plus a multi-valued string view used
/// by policy evaluation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimSet {
    subject: Option<String>,
    issuer: Option<String>,
    audiences: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    #[serde(skip)]
    values: HashMap<String, Vec<String>>,
    #[serde(rename = "claims")]
    raw: Map<String, Value>,
}

impl ClaimSet {
    /// Build a claim set from a decoded token payload
    ///
    /// Registered claims with the wrong JSON type make the token malformed.
    pub fn from_payload(raw: Map<String, Value>) -> Result<Self, ValidationFailure> {
        let subject = optional_string(&raw, "sub")?;
        let issuer = optional_string(&raw, "iss")?;
        let audiences = match raw.get("aud") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .ok_or(ValidationFailure::TokenMalformed)?,
            Some(_) => return Err(ValidationFailure::TokenMalformed),
        };
        let expires_at = optional_timestamp(&raw, "exp")?;
        let not_before = optional_timestamp(&raw, "nbf")?;

        let values = raw
            .iter()
            .map(|(name, value)| (name.clone(), string_values(value)))
            .filter(|(_, values)| !values.is_empty())
            .collect();

        Ok(Self {
            subject,
            issuer,
            audiences,
            expires_at,
            not_before,
            values,
            raw,
        })
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    /// Display name from the `name` claim
    pub fn name(&self) -> Option<&str> {
        self.values("name").first().map(String::as_str)
    }

    /// All string values of a claim; empty if the claim is absent
    pub fn values(&self, claim: &str) -> &[String] {
        self.values.get(claim).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, claim: &str) -> bool {
        self.values.contains_key(claim)
    }

    pub fn roles(&self) -> &[String] {
        self.values("role")
    }

    /// The payload exactly as it was signed
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn optional_string(raw: &Map<String, Value>, claim: &str) -> Result<Option<String>, ValidationFailure> {
    match raw.get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationFailure::TokenMalformed),
    }
}

fn optional_timestamp(
    raw: &Map<String, Value>,
    claim: &str,
) -> Result<Option<DateTime<Utc>>, ValidationFailure> {
    let secs = match raw.get(claim) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or(ValidationFailure::TokenMalformed)?,
        Some(_) => return Err(ValidationFailure::TokenMalformed),
    };
    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(ValidationFailure::TokenMalformed)
}

/// Multi-valued string view of one claim
fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_typed_fields_extracted() {
        let claims = ClaimSet::from_payload(payload(json!({
            "sub": "test-user-123",
            "iss": "https://gateway.local",
            "aud": ["cities-api", "other"],
            "exp": 1_700_000_000,
            "role": "Admin"
        })))
        .unwrap();

        assert_eq!(claims.subject(), Some("test-user-123"));
        assert_eq!(claims.issuer(), Some("https://gateway.local"));
        assert_eq!(claims.audiences(), ["cities-api", "other"]);
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(claims.roles(), ["Admin"]);
    }

    #[test]
    fn test_multi_valued_claims() {
        let claims = ClaimSet::from_payload(payload(json!({
            "role": ["User", "Admin"],
            "permissions": ["write", 7, true, null, {"nested": 1}],
            "scope": "api.read api.write"
        })))
        .unwrap();

        assert_eq!(claims.roles(), ["User", "Admin"]);
        assert_eq!(claims.values("permissions"), ["write", "7", "true"]);
        // Scope values are kept verbatim, not split
        assert_eq!(claims.values("scope"), ["api.read api.write"]);
        assert!(claims.values("missing").is_empty());
        assert!(!claims.contains("missing"));
    }

    #[test]
    fn test_wrong_registered_claim_types_are_malformed() {
        for bad in [
            json!({"exp": "tomorrow"}),
            json!({"iss": 42}),
            json!({"aud": [1, 2]}),
            json!({"sub": {"id": 1}}),
        ] {
            assert_eq!(
                ClaimSet::from_payload(payload(bad)),
                Err(ValidationFailure::TokenMalformed)
            );
        }
    }

    #[test]
    fn test_raw_payload_preserved() {
        let original = payload(json!({"sub": "a", "custom": {"deep": [1, 2]}}));
        let claims = ClaimSet::from_payload(original.clone()).unwrap();
        assert_eq!(claims.raw(), &original);
    }
}
