//! Decision pipeline for an authenticating reverse proxy.
//!
//! A request is matched against an ordered [`routing::RouteTable`]. Routes
//! that carry a policy have their bearer token checked by the
//! [`auth::TokenValidator`] and the resulting claims evaluated by the
//! [`auth::PolicyTable`]. Only then is the request handed to a
//! [`runtime::ProxyTransport`], which lives outside this crate.
//!
//! Everything here is built once from a [`config::GatewayConfig`] by
//! [`Gateway::from_config`] and is read-only afterwards.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod routing;
pub mod runtime;

pub use auth::{ClaimSet, JwtSettings, Policy, PolicyDecision, PolicyTable, Requirement};
pub use auth::{IssuedToken, TestTokenIssuer, TokenRequest, TokenValidator, ValidationFailure};
pub use config::GatewayConfig;
pub use error::{ConfigError, DispatchError, IssueError, TransportError};
pub use gateway::Gateway;
pub use pipeline::{AuthContext, Decision, Forwarding, Rejection, RequestParts, RequestPipeline};
pub use routing::{PathPattern, Route, RouteTable};
pub use runtime::{ProxyTransport, SystemTimeProvider, TimeProvider, ValidationObserver};
