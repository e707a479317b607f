use crate::auth::{ClaimSet, JwtSettings};
use crate::runtime::{SystemTimeProvider, TimeProvider, ValidationObserver};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Why a bearer token was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationFailure {
    TokenMissing,
    TokenMalformed,
    SignatureInvalid,
    Expired,
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
}

impl ValidationFailure {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenMissing => "token-missing",
            Self::TokenMalformed => "token-malformed",
            Self::SignatureInvalid => "signature-invalid",
            Self::Expired => "token-expired",
            Self::NotYetValid => "token-not-yet-valid",
            Self::IssuerMismatch => "issuer-mismatch",
            Self::AudienceMismatch => "audience-mismatch",
        }
    }

    /// Client-facing description, safe to return to the caller
    pub fn description(&self) -> &'static str {
        match self {
            Self::TokenMissing => "No bearer token was provided",
            Self::TokenMalformed => "The bearer token is malformed",
            Self::SignatureInvalid => "The token signature is invalid",
            Self::Expired => "The token has expired",
            Self::NotYetValid => "The token is not valid yet",
            Self::IssuerMismatch => "The token issuer is not accepted",
            Self::AudienceMismatch => "The token audience is not accepted",
        }
    }

    /// Value for the `WWW-Authenticate` header of a 401 response
    pub fn www_authenticate(&self) -> String {
        match self {
            Self::TokenMissing => "Bearer".to_string(),
            other => format!(
                r#"Bearer error="invalid_token", error_description="{}""#,
                other.description()
            ),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl From<jsonwebtoken::errors::Error> for ValidationFailure {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            _ => Self::TokenMalformed,
        }
    }
}

/// Verifies bearer tokens against the shared [`JwtSettings`]
///
/// Stateless per call: every check is a function of the token, the settings
/// and the current time, so one validator serves all requests concurrently.
pub struct TokenValidator<T: TimeProvider = SystemTimeProvider> {
    settings: Arc<JwtSettings>,
    decoding_key: DecodingKey,
    validation: Validation,
    time: T,
    observers: Vec<Arc<dyn ValidationObserver>>,
}

impl TokenValidator<SystemTimeProvider> {
    pub fn new(settings: Arc<JwtSettings>) -> Self {
        Self::with_time_provider(settings, SystemTimeProvider)
    }
}

impl<T: TimeProvider> TokenValidator<T> {
    pub fn with_time_provider(settings: Arc<JwtSettings>, time: T) -> Self {
        // jsonwebtoken only checks the signature and algorithm here; lifetime,
        // issuer and audience are checked against our own clock below.
        let mut validation = Validation::new(settings.algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            decoding_key: settings.key().decoding_key(),
            settings,
            validation,
            time,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ValidationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn settings(&self) -> &Arc<JwtSettings> {
        &self.settings
    }

    /// Validate a raw bearer token, or its absence
    pub fn validate(&self, token: Option<&str>) -> Result<ClaimSet, ValidationFailure> {
        let result = self.check(token);

        for observer in &self.observers {
            match &result {
                Ok(claims) => observer.token_validated(claims),
                Err(failure) => observer.validation_failed(*failure),
            }
        }

        result
    }

    fn check(&self, token: Option<&str>) -> Result<ClaimSet, ValidationFailure> {
        let token = token.ok_or(ValidationFailure::TokenMissing)?;

        let header = decode_header(token).map_err(|_| ValidationFailure::TokenMalformed)?;

        // Never let the token pick its own algorithm
        if header.alg != self.settings.algorithm() {
            return Err(ValidationFailure::SignatureInvalid);
        }

        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)?;
        let claims = ClaimSet::from_payload(data.claims)?;

        if self.settings.validate_lifetime {
            self.check_lifetime(&claims)?;
        }

        if self.settings.validate_issuer && claims.issuer() != Some(self.settings.issuer.as_str()) {
            return Err(ValidationFailure::IssuerMismatch);
        }

        if self.settings.validate_audience
            && !claims.audiences().iter().any(|aud| *aud == self.settings.audience)
        {
            return Err(ValidationFailure::AudienceMismatch);
        }

        Ok(claims)
    }

    fn check_lifetime(&self, claims: &ClaimSet) -> Result<(), ValidationFailure> {
        let now = self.time.now();
        let skew = self.settings.clock_skew;

        // Past the end of the representable range: the bound can never be hit
        let expires_at = claims.expires_at().ok_or(ValidationFailure::TokenMalformed)?;
        if expires_at.checked_add_signed(skew).is_some_and(|latest| latest < now) {
            return Err(ValidationFailure::Expired);
        }

        if let Some(not_before) = claims.not_before() {
            if not_before.checked_sub_signed(skew).is_some_and(|earliest| earliest > now) {
                return Err(ValidationFailure::NotYetValid);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::runtime::FixedTimeProvider;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use chrono::{DateTime, Utc};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::sync::Mutex;

    const SECRET: &str = "your-super-secret-key-min-32-chars-long-for-security";
    const NOW: i64 = 1_760_000_000;

    fn settings() -> Arc<JwtSettings> {
        Arc::new(
            JwtSettings::from_config(&JwtConfig {
                signing_key: SECRET.to_string(),
                issuer: "https://gateway.local".to_string(),
                audience: "cities-api".to_string(),
                ..JwtConfig::default()
            })
            .unwrap(),
        )
    }

    fn validator() -> TokenValidator<FixedTimeProvider> {
        TokenValidator::with_time_provider(settings(), FixedTimeProvider::at_timestamp(NOW).unwrap())
    }

    fn claims(exp_offset: i64) -> Value {
        json!({
            "sub": "test-user-123",
            "name": "Test User",
            "role": "Admin",
            "scope": "api.read",
            "permissions": "read",
            "iss": "https://gateway.local",
            "aud": "cities-api",
            "exp": NOW + exp_offset,
            "iat": NOW - 60,
        })
    }

    fn sign_with(claims: &Value, alg: Algorithm, secret: &str) -> String {
        encode(&Header::new(alg), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn sign(claims: &Value) -> String {
        sign_with(claims, Algorithm::HS256, SECRET)
    }

    #[test]
    fn test_valid_token_round_trips_claims() {
        let original = claims(3600);
        let claims = validator().validate(Some(&sign(&original))).unwrap();

        assert_eq!(&Value::Object(claims.raw().clone()), &original);
        assert_eq!(claims.subject(), Some("test-user-123"));
        assert_eq!(claims.name(), Some("Test User"));
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(validator().validate(None), Err(ValidationFailure::TokenMissing));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "not-a-jwt", "a.b", "a.b.c", "Bearer"] {
            assert_eq!(
                validator().validate(Some(token)),
                Err(ValidationFailure::TokenMalformed),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn test_wrong_key_is_signature_invalid() {
        let token = sign_with(&claims(3600), Algorithm::HS256, "a-completely-different-secret-of-32-bytes!");
        assert_eq!(validator().validate(Some(&token)), Err(ValidationFailure::SignatureInvalid));
    }

    #[test]
    fn test_algorithm_substitution_rejected() {
        // Same secret, different declared algorithm
        let token = sign_with(&claims(3600), Algorithm::HS512, SECRET);
        assert_eq!(validator().validate(Some(&token)), Err(ValidationFailure::SignatureInvalid));
    }

    #[test]
    fn test_alg_none_rejected() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims(3600).to_string());
        let token = format!("{header}.{payload}.");
        let result = validator().validate(Some(&token));
        assert!(matches!(
            result,
            Err(ValidationFailure::TokenMalformed) | Err(ValidationFailure::SignatureInvalid)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign(&claims(3600));
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            json!({"sub": "attacker", "role": "Admin", "exp": NOW + 3600}).to_string(),
        );
        parts[1] = &forged;
        assert_eq!(
            validator().validate(Some(&parts.join("."))),
            Err(ValidationFailure::SignatureInvalid)
        );
    }

    #[test]
    fn test_clock_skew_window() {
        let ten_minutes_ago = sign(&claims(-600));
        let three_minutes_ago = sign(&claims(-180));

        assert_eq!(validator().validate(Some(&ten_minutes_ago)), Err(ValidationFailure::Expired));
        assert!(validator().validate(Some(&three_minutes_ago)).is_ok());
    }

    #[test]
    fn test_not_before_respects_skew() {
        let mut early = claims(3600);
        early["nbf"] = json!(NOW + 600);
        assert_eq!(validator().validate(Some(&sign(&early))), Err(ValidationFailure::NotYetValid));

        let mut almost = claims(3600);
        almost["nbf"] = json!(NOW + 120);
        assert!(validator().validate(Some(&sign(&almost))).is_ok());
    }

    #[test]
    fn test_lifetime_bounds_at_the_edge_of_time() {
        let max = DateTime::<Utc>::MAX_UTC.timestamp();
        let min = DateTime::<Utc>::MIN_UTC.timestamp();

        let far_future = json!({"exp": max, "iss": "https://gateway.local", "aud": "cities-api"});
        assert!(validator().validate(Some(&sign(&far_future))).is_ok());

        let mut ancient = far_future.clone();
        ancient["nbf"] = json!(min);
        assert!(validator().validate(Some(&sign(&ancient))).is_ok());

        let mut expired_long_ago = far_future.clone();
        expired_long_ago["exp"] = json!(min);
        assert_eq!(
            validator().validate(Some(&sign(&expired_long_ago))),
            Err(ValidationFailure::Expired)
        );

        let mut never_valid = far_future;
        never_valid["nbf"] = json!(max);
        assert_eq!(
            validator().validate(Some(&sign(&never_valid))),
            Err(ValidationFailure::NotYetValid)
        );
    }

    #[test]
    fn test_missing_exp_is_malformed_when_lifetime_validated() {
        let mut no_exp = claims(0);
        no_exp.as_object_mut().unwrap().remove("exp");
        assert_eq!(validator().validate(Some(&sign(&no_exp))), Err(ValidationFailure::TokenMalformed));
    }

    #[test]
    fn test_lifetime_toggle() {
        let mut settings = (*settings()).clone();
        settings.validate_lifetime = false;
        let validator = TokenValidator::with_time_provider(
            Arc::new(settings),
            FixedTimeProvider::at_timestamp(NOW).unwrap(),
        );
        assert!(validator.validate(Some(&sign(&claims(-86_400)))).is_ok());
    }

    #[test]
    fn test_issuer_is_case_sensitive() {
        let mut other = claims(3600);
        other["iss"] = json!("https://GATEWAY.local");
        assert_eq!(validator().validate(Some(&sign(&other))), Err(ValidationFailure::IssuerMismatch));

        other.as_object_mut().unwrap().remove("iss");
        assert_eq!(validator().validate(Some(&sign(&other))), Err(ValidationFailure::IssuerMismatch));
    }

    #[test]
    fn test_audience_array_any_match() {
        let mut multi = claims(3600);
        multi["aud"] = json!(["billing", "cities-api"]);
        assert!(validator().validate(Some(&sign(&multi))).is_ok());

        multi["aud"] = json!(["billing"]);
        assert_eq!(validator().validate(Some(&sign(&multi))), Err(ValidationFailure::AudienceMismatch));
    }

    #[test]
    fn test_issuer_and_audience_toggles() {
        let mut settings = (*settings()).clone();
        settings.validate_issuer = false;
        settings.validate_audience = false;
        let validator = TokenValidator::with_time_provider(
            Arc::new(settings),
            FixedTimeProvider::at_timestamp(NOW).unwrap(),
        );

        let mut foreign = claims(3600);
        foreign["iss"] = json!("someone-else");
        foreign["aud"] = json!("somewhere-else");
        assert!(validator.validate(Some(&sign(&foreign))).is_ok());
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ValidationObserver for Recorder {
        fn token_validated(&self, claims: &ClaimSet) {
            self.events
                .lock()
                .unwrap()
                .push(format!("ok:{}", claims.subject().unwrap_or_default()));
        }

        fn validation_failed(&self, failure: ValidationFailure) {
            self.events.lock().unwrap().push(format!("err:{failure}"));
        }
    }

    #[test]
    fn test_observers_see_every_outcome() {
        let recorder = Arc::new(Recorder::default());
        let validator = validator().with_observer(recorder.clone());

        let _ = validator.validate(Some(&sign(&claims(3600))));
        let _ = validator.validate(None);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["ok:test-user-123".to_string(), "err:token-missing".to_string()]
        );
    }

    #[test]
    fn test_www_authenticate_values() {
        assert_eq!(ValidationFailure::TokenMissing.www_authenticate(), "Bearer");
        assert_eq!(
            ValidationFailure::Expired.www_authenticate(),
            r#"Bearer error="invalid_token", error_description="The token has expired""#
        );
    }
}
