use authgate_core::{ClaimSet, ValidationFailure, ValidationObserver};

/// Reports token validation outcomes as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ValidationObserver for TracingObserver {
    fn token_validated(&self, claims: &ClaimSet) {
        tracing::debug!(subject = claims.subject().unwrap_or("-"), "Token validated");
    }

    fn validation_failed(&self, failure: ValidationFailure) {
        tracing::info!(reason = %failure, "Token validation failed");
    }
}
