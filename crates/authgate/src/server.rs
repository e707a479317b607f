//! HTTP front end: the test-token endpoint plus a catch-all proxy handler

use crate::transport::ReqwestTransport;
use anyhow::{Context, Result};
use authgate_core::{DispatchError, Gateway, IssueError, ProxyTransport, Rejection, TokenRequest, TransportError};
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

pub const TOKEN_PATH: &str = "/auth/token";

/// Shared state for every handler
pub struct AppState<P> {
    pub gateway: Arc<Gateway>,
    pub transport: Arc<P>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            transport: self.transport.clone(),
        }
    }
}

/// Build the router; the token endpoint only exists when the issuer is enabled
pub fn router<P>(gateway: Arc<Gateway>, transport: Arc<P>) -> Router
where
    P: ProxyTransport<Body, Response = Response> + 'static,
{
    let issuer_enabled = gateway.issuer().is_some();
    let mut router = Router::new();
    if issuer_enabled {
        router = router.route(TOKEN_PATH, get(issue_token::<P>));
    }
    router.fallback(proxy::<P>).with_state(AppState { gateway, transport })
}

/// Bind and serve until Ctrl-C
pub async fn serve(gateway: Arc<Gateway>, listen: SocketAddr) -> Result<()> {
    let transport = Arc::new(ReqwestTransport::new(gateway.clusters(), gateway.upstream_timeout())?);
    let app = router(gateway, transport);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    tracing::info!(address = %listener.local_addr()?, "Gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn issue_token<P>(State(state): State<AppState<P>>, Query(request): Query<TokenRequest>) -> Response {
    let issued = state
        .gateway
        .issuer()
        .ok_or(IssueError::Disabled)
        .and_then(|issuer| issuer.issue(&request));

    match issued {
        Ok(issued) => Json(json!({
            "token": issued.token,
            "expires": issued.expires,
            "role": issued.role,
            "scope": issued.scope,
            "usage": "Use: Authorization: Bearer <token>",
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue test token");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal-error",
                "The gateway could not issue a token",
            )
        }
    }
}

async fn proxy<P>(State(state): State<AppState<P>>, request: Request) -> Response
where
    P: ProxyTransport<Body, Response = Response>,
{
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match state.gateway.pipeline().dispatch(request, state.transport.as_ref()).await {
        Ok(response) => response,
        Err(DispatchError::Rejected(rejection)) => rejection_response(&rejection),
        Err(DispatchError::Transport(error)) => transport_error_response(&error),
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

/// JSON rejection with `WWW-Authenticate` on 401
pub fn rejection_response(rejection: &Rejection) -> Response {
    if let Rejection::Internal(detail) = rejection {
        tracing::error!(detail = %detail, "Request failed inside the gateway");
    }

    let mut response = (rejection.status(), Json(rejection.body())).into_response();
    if let Some(challenge) = rejection.www_authenticate() {
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
    }
    response
}

/// Map transport failures without exposing cluster topology
pub fn transport_error_response(error: &TransportError) -> Response {
    tracing::warn!(error = %error, "Upstream exchange failed");

    match error {
        TransportError::Timeout => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream-timeout",
            "The upstream service did not respond in time",
        ),
        TransportError::PayloadTooLarge(limit) => error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload-too-large",
            &format!("The request body exceeds {limit} bytes"),
        ),
        TransportError::InvalidRequest(_) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid-request",
            "The request could not be forwarded",
        ),
        TransportError::UnknownCluster(_) | TransportError::NoDestination(_) | TransportError::Upstream(_) => {
            error_response(
                StatusCode::BAD_GATEWAY,
                "upstream-unavailable",
                "The upstream service is unavailable",
            )
        }
    }
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": kind,
            "message": message,
            "status": status.as_u16(),
        })),
    )
        .into_response()
}
