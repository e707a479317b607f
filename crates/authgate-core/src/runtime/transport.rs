use crate::error::TransportError;
use crate::pipeline::AuthContext;
use async_trait::async_trait;

/// Proxy transport abstraction: delivers an authorized request to a cluster.
///
/// The core never resolves clusters, retries, or streams bodies itself. It
/// decides, then calls `forward` exactly once for an accepted request.
/// Implementations must be Send + Sync so one instance can serve every
/// in-flight request.
#[async_trait]
pub trait ProxyTransport<B: Send + 'static>: Send + Sync {
    /// Whatever the transport hands back to the server (usually a response)
    type Response: Send;

    /// Forward `request` to one destination of `cluster`
    ///
    /// `auth` is `None` for anonymous routes.
    async fn forward(
        &self,
        request: http::Request<B>,
        cluster: &str,
        auth: Option<&AuthContext>,
    ) -> Result<Self::Response, TransportError>;
}
