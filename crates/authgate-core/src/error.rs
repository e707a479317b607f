use crate::pipeline::Rejection;
use thiserror::Error;

/// Errors raised while turning a [`crate::GatewayConfig`] into a running gateway.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid gateway configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// Errors reported by a [`crate::ProxyTransport`] after the core handed a request off.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("no destination available for cluster: {0}")]
    NoDestination(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

/// Outcome of [`crate::RequestPipeline::dispatch`] when no upstream response is produced.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("request rejected: {0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum IssueError {
    #[error("test token issuer is disabled")]
    Disabled,

    #[error("token lifetime of {0}s is out of range")]
    LifetimeOutOfRange(u64),

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}
