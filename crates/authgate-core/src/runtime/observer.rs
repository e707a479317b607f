use crate::auth::{ClaimSet, ValidationFailure};

/// Receives the outcome of every token validation.
///
/// Observers are invoked synchronously, after the result has been computed,
/// and cannot change it. Both methods default to doing nothing so an
/// implementation only overrides what it cares about.
pub trait ValidationObserver: Send + Sync {
    /// A token passed every check
    fn token_validated(&self, _claims: &ClaimSet) {}

    /// A token (or its absence) was rejected
    fn validation_failed(&self, _failure: ValidationFailure) {}
}
