//! Per-request decision: route, authenticate, authorize, then hand off

use crate::auth::{ClaimSet, PolicyDecision, PolicyTable, Requirement, TokenValidator, ValidationFailure};
use crate::error::DispatchError;
use crate::routing::{Route, RouteTable};
use crate::runtime::{ProxyTransport, SystemTimeProvider, TimeProvider, ValidationObserver};
use http::header::AUTHORIZATION;
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// The parts of a request the decision depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    pub method: Method,
    pub path: String,
    /// Bearer token, if one was presented
    pub token: Option<String>,
}

impl RequestParts {
    pub fn new(method: Method, path: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            method,
            path: path.into(),
            token: token.map(String::from),
        }
    }

    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            token: bearer_token(request.headers()).map(String::from),
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`
///
/// Any other scheme, or an empty token, counts as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Identity attached to an authorized request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthContext {
    pub subject: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
    /// `scope` values split on whitespace
    pub scopes: Vec<String>,
    pub claims: ClaimSet,
}

impl AuthContext {
    pub fn from_claims(claims: ClaimSet) -> Self {
        Self {
            subject: claims.subject().map(String::from),
            name: claims.name().map(String::from),
            roles: claims.roles().to_vec(),
            scopes: claims
                .values("scope")
                .iter()
                .flat_map(|scope| scope.split_whitespace())
                .map(String::from)
                .collect(),
            claims,
        }
    }
}

/// An accepted request: where it goes and who sent it
#[derive(Debug, Clone, PartialEq)]
pub struct Forwarding {
    pub route: Arc<Route>,
    /// `None` on anonymous routes, or when an empty policy admitted a caller without a token
    pub auth: Option<AuthContext>,
}

impl Forwarding {
    pub fn cluster(&self) -> &str {
        &self.route.cluster
    }
}

/// Why a request was not forwarded
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    RouteNotFound,
    Unauthenticated(ValidationFailure),
    Forbidden { policy: String, requirement: Requirement },
    /// Detail is for logs only and never sent to the client
    Internal(String),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "route-not-found",
            Self::Unauthenticated(failure) => failure.kind(),
            Self::Forbidden { .. } => "policy-denied",
            Self::Internal(_) => "internal-error",
        }
    }

    /// Human-readable text for the client
    pub fn message(&self) -> String {
        match self {
            Self::RouteNotFound => "No route matches this request".to_string(),
            Self::Unauthenticated(failure) => failure.description().to_string(),
            Self::Forbidden { requirement, .. } => format!("Access denied: requires {requirement}"),
            Self::Internal(_) => "The gateway could not process this request".to_string(),
        }
    }

    /// `WWW-Authenticate` value, only for 401 rejections
    pub fn www_authenticate(&self) -> Option<String> {
        match self {
            Self::Unauthenticated(failure) => Some(failure.www_authenticate()),
            _ => None,
        }
    }

    /// Structured JSON body
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.kind(),
            "message": self.message(),
            "status": self.status().as_u16(),
        });
        if let (Self::Forbidden { requirement, .. }, Some(map)) = (self, body.as_object_mut()) {
            map.insert("requirement".to_string(), json!(requirement));
        }
        body
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forbidden { policy, requirement } => {
                write!(f, "{} (policy '{policy}' requires {requirement})", self.kind())
            }
            Self::Internal(detail) => write!(f, "{}: {detail}", self.kind()),
            _ => f.write_str(self.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Forward(Forwarding),
    Reject(Rejection),
}

/// Route lookup, token validation and policy evaluation over one immutable snapshot
pub struct RequestPipeline<T: TimeProvider = SystemTimeProvider> {
    routes: RouteTable,
    policies: PolicyTable,
    validator: TokenValidator<T>,
}

impl<T: TimeProvider> RequestPipeline<T> {
    pub fn new(routes: RouteTable, policies: PolicyTable, validator: TokenValidator<T>) -> Self {
        Self {
            routes,
            policies,
            validator,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn validator(&self) -> &TokenValidator<T> {
        &self.validator
    }

    pub fn with_observer(mut self, observer: Arc<dyn ValidationObserver>) -> Self {
        self.validator = self.validator.with_observer(observer);
        self
    }

    /// Decide what happens to a request without touching the network
    pub fn decide(&self, request: &RequestParts) -> Decision {
        let Some(route) = self.routes.find(&request.method, &request.path) else {
            tracing::debug!(method = %request.method, path = %request.path, "No matching route");
            return Decision::Reject(Rejection::RouteNotFound);
        };

        let Some(policy_name) = route.policy.as_deref() else {
            tracing::debug!(route = %route.id, "Forwarding anonymously");
            return Decision::Forward(Forwarding {
                route: route.clone(),
                auth: None,
            });
        };

        let Some(policy) = self.policies.get(policy_name) else {
            tracing::error!(route = %route.id, policy = %policy_name, "Route references an unknown policy");
            return Decision::Reject(Rejection::Internal(format!(
                "route '{}' references unknown policy '{policy_name}'",
                route.id
            )));
        };

        // An empty policy admits callers without a token, but a token that
        // is presented must still be valid.
        let claims = if policy.requirements().is_empty() && request.token.is_none() {
            None
        } else {
            match self.validator.validate(request.token.as_deref()) {
                Ok(claims) => Some(claims),
                Err(failure) => {
                    tracing::info!(route = %route.id, reason = %failure, "Rejected unauthenticated request");
                    return Decision::Reject(Rejection::Unauthenticated(failure));
                }
            }
        };

        match policy.evaluate(claims.as_ref()) {
            PolicyDecision::Allow => {
                tracing::debug!(
                    route = %route.id,
                    policy = %policy_name,
                    subject = claims.as_ref().and_then(ClaimSet::subject).unwrap_or("-"),
                    "Request authorized"
                );
                Decision::Forward(Forwarding {
                    route: route.clone(),
                    auth: claims.map(AuthContext::from_claims),
                })
            }
            PolicyDecision::Deny(requirement) => {
                tracing::info!(
                    route = %route.id,
                    policy = %policy_name,
                    requirement = %requirement,
                    "Rejected unauthorized request"
                );
                Decision::Reject(Rejection::Forbidden {
                    policy: policy_name.to_string(),
                    requirement,
                })
            }
        }
    }

    /// Decide, then forward accepted requests through `transport`
    ///
    /// Nothing is sent upstream for a rejected request.
    pub async fn dispatch<B, P>(&self, request: http::Request<B>, transport: &P) -> Result<P::Response, DispatchError>
    where
        B: Send + 'static,
        P: ProxyTransport<B> + ?Sized,
    {
        match self.decide(&RequestParts::from_request(&request)) {
            Decision::Reject(rejection) => Err(DispatchError::Rejected(rejection)),
            Decision::Forward(forwarding) => {
                let response = transport
                    .forward(request, forwarding.cluster(), forwarding.auth.as_ref())
                    .await?;
                Ok(response)
            }
        }
    }
}
