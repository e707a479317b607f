//! Reverse-proxy transport over `reqwest`
//!
//! Resolves a cluster id to its destinations, picks one round-robin and
//! replays the request against it. Client-supplied identity headers are
//! always stripped; the gateway sets its own from the validated token.

use async_trait::async_trait;
use authgate_core::config::ClusterDefinition;
use authgate_core::{AuthContext, ProxyTransport, TransportError};
use anyhow::Context;
use axum::body::{Body, HttpBody};
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Largest request body buffered before forwarding
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

pub const X_AUTH_SUBJECT: HeaderName = HeaderName::from_static("x-auth-subject");
pub const X_AUTH_ROLES: HeaderName = HeaderName::from_static("x-auth-roles");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

// Hop-by-hop headers (RFC 7230 section 6.1) plus the obsolete ones clients still send
static HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

struct Cluster {
    destinations: Vec<String>,
    next: AtomicUsize,
}

impl Cluster {
    fn pick(&self) -> Option<&str> {
        if self.destinations.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.destinations.len();
        Some(&self.destinations[index])
    }
}

/// Forwards authorized requests to cluster destinations
pub struct ReqwestTransport {
    client: reqwest::Client,
    clusters: HashMap<String, Cluster>,
}

impl ReqwestTransport {
    pub fn new(clusters: &BTreeMap<String, ClusterDefinition>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        let clusters = clusters
            .iter()
            .map(|(id, cluster)| {
                let destinations = cluster
                    .destinations
                    .values()
                    .map(|d| d.address.trim_end_matches('/').to_string())
                    .collect();
                (
                    id.clone(),
                    Cluster {
                        destinations,
                        next: AtomicUsize::new(0),
                    },
                )
            })
            .collect();

        Ok(Self { client, clusters })
    }
}

#[async_trait]
impl ProxyTransport<Body> for ReqwestTransport {
    type Response = Response<Body>;

    async fn forward(
        &self,
        request: Request<Body>,
        cluster: &str,
        auth: Option<&AuthContext>,
    ) -> Result<Response<Body>, TransportError> {
        let destination = self
            .clusters
            .get(cluster)
            .ok_or_else(|| TransportError::UnknownCluster(cluster.to_string()))?
            .pick()
            .ok_or_else(|| TransportError::NoDestination(cluster.to_string()))?;

        let (parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("{destination}{path_and_query}");

        let client_ip = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip());
        let headers = upstream_headers(&parts.headers, client_ip.map(|ip| ip.to_string()), auth);

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > MAX_BODY_SIZE as u64) {
            return Err(TransportError::PayloadTooLarge(MAX_BODY_SIZE));
        }
        let body = read_body(body, MAX_BODY_SIZE).await?;

        tracing::debug!(cluster = %cluster, method = %parts.method, url = %url, "Forwarding request");

        let response = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_headers(&mut headers);

        let mut downstream = Response::new(Body::from_stream(response.bytes_stream()));
        *downstream.status_mut() = status;
        *downstream.headers_mut() = headers;

        tracing::debug!(cluster = %cluster, status = %status, "Upstream responded");

        Ok(downstream)
    }
}

/// Buffer a request body, failing once it grows past `limit` bytes
async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut buffer = Vec::new();

    while let Some(frame) = std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
        let frame = frame.map_err(|e| TransportError::InvalidRequest(format!("Failed to read request body: {e}")))?;
        if let Ok(data) = frame.into_data() {
            if buffer.len() + data.len() > limit {
                return Err(TransportError::PayloadTooLarge(limit));
            }
            buffer.extend_from_slice(&data);
        }
    }

    Ok(buffer)
}

/// Headers sent upstream: inbound headers minus hop-by-hop and spoofable
/// identity headers, plus forwarding and identity headers set by the gateway
fn upstream_headers(inbound: &HeaderMap, client_ip: Option<String>, auth: Option<&AuthContext>) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_headers(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(&X_AUTH_SUBJECT);
    headers.remove(&X_AUTH_ROLES);

    if let Some(ip) = client_ip {
        let forwarded_for = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        insert(&mut headers, X_FORWARDED_FOR, &forwarded_for);
    }
    if let Some(host) = inbound.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if let Some(auth) = auth {
        if let Some(subject) = &auth.subject {
            insert(&mut headers, X_AUTH_SUBJECT, subject);
        }
        if !auth.roles.is_empty() {
            insert(&mut headers, X_AUTH_ROLES, &auth.roles.join(","));
        }
    }

    headers
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "Dropping header value that is not valid in HTTP"),
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`
fn strip_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgate_core::ClaimSet;
    use serde_json::json;

    fn auth(subject: &str, roles: &[&str]) -> AuthContext {
        let claims = match json!({"sub": subject, "role": roles}) {
            serde_json::Value::Object(map) => ClaimSet::from_payload(map).unwrap(),
            _ => unreachable!(),
        };
        AuthContext::from_claims(claims)
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        headers.insert("x-custom-hop", HeaderValue::from_static("1"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(X_AUTH_SUBJECT, HeaderValue::from_static("spoofed"));
        headers.insert(X_AUTH_ROLES, HeaderValue::from_static("Admin"));
        headers
    }

    #[test]
    fn test_hop_and_spoofed_headers_removed() {
        let headers = upstream_headers(&inbound(), None, None);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(&X_AUTH_SUBJECT).is_none());
        assert!(headers.get(&X_AUTH_ROLES).is_none());
        assert_eq!(headers[header::ACCEPT], "application/json");
        assert_eq!(headers[&X_FORWARDED_HOST], "gateway.local");
        assert_eq!(headers[&X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn test_identity_headers_from_auth_context() {
        let headers = upstream_headers(&inbound(), None, Some(&auth("test-user-123", &["User", "Admin"])));
        assert_eq!(headers[&X_AUTH_SUBJECT], "test-user-123");
        assert_eq!(headers[&X_AUTH_ROLES], "User,Admin");
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut inbound = inbound();
        inbound.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));

        let headers = upstream_headers(&inbound, Some("192.168.1.5".to_string()), None);
        assert_eq!(headers[&X_FORWARDED_FOR], "10.0.0.1, 192.168.1.5");

        let headers = upstream_headers(&HeaderMap::new(), Some("192.168.1.5".to_string()), None);
        assert_eq!(headers[&X_FORWARDED_FOR], "192.168.1.5");
    }

    #[tokio::test]
    async fn test_body_limit() {
        let body = read_body(Body::from("hello"), 5).await.unwrap();
        assert_eq!(body, b"hello");

        let err = read_body(Body::from("hello!"), 5).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge(5)));
    }

    #[test]
    fn test_round_robin() {
        let cluster = Cluster {
            destinations: vec!["http://a".to_string(), "http://b".to_string()],
            next: AtomicUsize::new(0),
        };
        let picks: Vec<_> = (0..4).filter_map(|_| cluster.pick()).collect();
        assert_eq!(picks, ["http://a", "http://b", "http://a", "http://b"]);

        let empty = Cluster {
            destinations: vec![],
            next: AtomicUsize::new(0),
        };
        assert!(empty.pick().is_none());
    }
}
