//! Bearer token validation, policy evaluation and test-token issuance
//!
//! The validator and the issuer are both built from one shared
//! [`JwtSettings`], so the signing secret exists exactly once per gateway.

pub mod claims;
pub mod issuer;
pub mod jwt;
pub mod policy;
pub mod settings;

pub use claims::ClaimSet;
pub use issuer::{IssuedToken, TestTokenIssuer, TokenRequest};
pub use jwt::{TokenValidator, ValidationFailure};
pub use policy::{Policy, PolicyDecision, PolicyTable, Requirement};
pub use settings::{JwtSettings, SigningKey};
