use crate::auth::{JwtSettings, PolicyTable, TestTokenIssuer, TokenValidator};
use crate::auth::issuer::MAX_LIFETIME_SECS;
use crate::auth::policy::DEFAULT_POLICY;
use crate::config::{ClusterDefinition, GatewayConfig, ServerConfig};
use crate::error::ConfigError;
use crate::pipeline::RequestPipeline;
use crate::routing::{Route, RouteTable};
use crate::runtime::{SystemTimeProvider, TimeProvider, ValidationObserver};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Everything built from one configuration, immutable once constructed
///
/// Share it behind an `Arc`; replacing the `Arc` is the only way to change
/// keys, policies or routes.
pub struct Gateway<T: TimeProvider = SystemTimeProvider> {
    settings: Arc<JwtSettings>,
    pipeline: RequestPipeline<T>,
    issuer: Option<TestTokenIssuer<T>>,
    clusters: BTreeMap<String, ClusterDefinition>,
    server: ServerConfig,
    listen: SocketAddr,
}

impl Gateway<SystemTimeProvider> {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Self::with_time_provider(config, SystemTimeProvider)
    }
}

impl<T: TimeProvider + Clone> Gateway<T> {
    /// Build the gateway, reporting every configuration problem at once
    pub fn with_time_provider(config: &GatewayConfig, time: T) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let settings = JwtSettings::from_config(&config.jwt)
            .map_err(|e| errors.extend(e))
            .ok()
            .map(Arc::new);

        if config.token_issuer.enabled {
            let lifetime = config.token_issuer.lifetime_secs;
            if lifetime == 0 || lifetime > MAX_LIFETIME_SECS {
                errors.push(format!(
                    "token_issuer.lifetime_secs must be between 1 and {MAX_LIFETIME_SECS} (got {lifetime})"
                ));
            }
        }

        let policies = PolicyTable::from_definitions(&config.policies)
            .map_err(|e| errors.extend(e))
            .ok();

        for (id, cluster) in &config.clusters {
            validate_cluster(id, cluster, &mut errors);
        }

        let routes = build_routes(config, &mut errors);

        let listen = config
            .server
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| errors.push(format!("server.listen '{}' is invalid: {e}", config.server.listen)))
            .ok();

        if config.server.upstream_timeout_secs == 0 {
            errors.push("server.upstream_timeout_secs must be greater than 0".to_string());
        }

        let (Some(settings), Some(policies), Some(listen)) = (settings, policies, listen) else {
            return Err(ConfigError::Invalid(errors));
        };
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        let routes = RouteTable::new(routes);
        for (earlier, later) in routes.shadowed() {
            tracing::warn!(route = %later, shadowed_by = %earlier, "Route can never match");
        }

        if settings.require_https_metadata {
            tracing::debug!("require_https_metadata has no effect with a static signing key");
        }

        let issuer = config.token_issuer.enabled.then(|| {
            tracing::info!("Test token endpoint enabled");
            TestTokenIssuer::with_time_provider(settings.clone(), &config.token_issuer, time.clone())
        });

        let validator = TokenValidator::with_time_provider(settings.clone(), time);

        tracing::info!(
            routes = routes.len(),
            policies = policies.len(),
            clusters = config.clusters.len(),
            "Gateway configuration loaded"
        );

        Ok(Self {
            settings,
            pipeline: RequestPipeline::new(routes, policies, validator),
            issuer,
            clusters: config.clusters.clone(),
            server: config.server.clone(),
            listen,
        })
    }

    /// Register a validation observer on the token validator
    pub fn with_observer(mut self, observer: Arc<dyn ValidationObserver>) -> Self {
        self.pipeline = self.pipeline.with_observer(observer);
        self
    }
}

impl<T: TimeProvider> Gateway<T> {
    pub fn pipeline(&self) -> &RequestPipeline<T> {
        &self.pipeline
    }

    /// `None` when the test token endpoint is disabled
    pub fn issuer(&self) -> Option<&TestTokenIssuer<T>> {
        self.issuer.as_ref()
    }

    pub fn settings(&self) -> &Arc<JwtSettings> {
        &self.settings
    }

    pub fn clusters(&self) -> &BTreeMap<String, ClusterDefinition> {
        &self.clusters
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.server.upstream_timeout_secs)
    }
}

fn validate_cluster(id: &str, cluster: &ClusterDefinition, errors: &mut Vec<String>) {
    if cluster.destinations.is_empty() {
        errors.push(format!("cluster '{id}' has no destinations"));
    }

    for (name, destination) in &cluster.destinations {
        let valid = destination
            .address
            .parse::<http::Uri>()
            .ok()
            .filter(|uri| matches!(uri.scheme_str(), Some("http" | "https")) && uri.authority().is_some());
        if valid.is_none() {
            errors.push(format!(
                "cluster '{id}' destination '{name}': address '{}' must be an absolute http(s) URL",
                destination.address
            ));
        }
    }
}

fn build_routes(config: &GatewayConfig, errors: &mut Vec<String>) -> Vec<Route> {
    let mut seen = HashSet::new();
    let mut routes = Vec::with_capacity(config.routes.len());

    let policy_defined = |name: &str| name == DEFAULT_POLICY || config.policies.iter().any(|p| p.name.trim() == name);

    for definition in &config.routes {
        let route = match Route::from_definition(definition) {
            Ok(route) => route,
            Err(e) => {
                errors.extend(e);
                continue;
            }
        };

        if !seen.insert(route.id.clone()) {
            errors.push(format!("route id '{}' is used more than once", route.id));
        }
        if let Some(policy) = &route.policy {
            if !policy_defined(policy) {
                errors.push(format!("route '{}' references undefined policy '{policy}'", route.id));
            }
        }
        if !config.clusters.contains_key(&route.cluster) {
            errors.push(format!("route '{}' references undefined cluster '{}'", route.id, route.cluster));
        }

        routes.push(route);
    }

    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Requirement;
    use crate::config::{DestinationDefinition, JwtConfig, PolicyDefinition, RouteDefinition};

    fn config() -> GatewayConfig {
        let mut destinations = BTreeMap::new();
        destinations.insert(
            "destination1".to_string(),
            DestinationDefinition {
                address: "http://127.0.0.1:5001".to_string(),
            },
        );

        GatewayConfig {
            jwt: JwtConfig {
                signing_key: "your-super-secret-key-min-32-chars-long-for-security".to_string(),
                issuer: "https://gateway.local".to_string(),
                audience: "cities-api".to_string(),
                ..JwtConfig::default()
            },
            policies: vec![PolicyDefinition {
                name: "AdminOnly".to_string(),
                requirements: vec![
                    Requirement::Authenticated,
                    Requirement::Role {
                        roles: vec!["Admin".to_string()],
                    },
                ],
            }],
            routes: vec![
                route("admin", "/admin/*", Some("AdminOnly")),
                route("public", "/*", None),
            ],
            clusters: BTreeMap::from([("cities".to_string(), ClusterDefinition { destinations })]),
            ..GatewayConfig::default()
        }
    }

    fn route(id: &str, path: &str, policy: Option<&str>) -> RouteDefinition {
        RouteDefinition {
            id: id.to_string(),
            path: path.to_string(),
            methods: vec![],
            policy: policy.map(String::from),
            cluster: "cities".to_string(),
        }
    }

    fn errors(config: &GatewayConfig) -> Vec<String> {
        match Gateway::from_config(config) {
            Ok(_) => panic!("expected configuration errors"),
            Err(ConfigError::Invalid(errors)) => errors,
        }
    }

    #[test]
    fn test_valid_config() {
        let gateway = Gateway::from_config(&config()).unwrap();
        assert_eq!(gateway.pipeline().routes().len(), 2);
        assert!(gateway.pipeline().policies().contains("AdminOnly"));
        assert!(gateway.pipeline().policies().contains("default"));
        assert!(gateway.issuer().is_some());
        assert_eq!(gateway.listen_addr().port(), 8080);
        assert_eq!(gateway.upstream_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_undefined_policy_fails_startup() {
        let mut config = config();
        config.routes.push(route("ghost", "/ghost", Some("Ghost")));
        let errors = errors(&config);
        assert_eq!(errors, ["route 'ghost' references undefined policy 'Ghost'"]);
    }

    #[test]
    fn test_default_policy_resolves_without_definition() {
        let mut config = config();
        config.routes.insert(0, route("api", "/api/*", Some("default")));
        assert!(Gateway::from_config(&config).is_ok());
    }

    #[test]
    fn test_every_error_is_reported() {
        let mut config = config();
        config.jwt.signing_key = "short".to_string();
        config.server.listen = "not-an-address".to_string();
        config.server.upstream_timeout_secs = 0;
        config.routes.push(route("public", "/again", None));
        config.routes.push(RouteDefinition {
            cluster: "missing".to_string(),
            ..route("orphan", "/orphan", None)
        });
        config.clusters.insert(
            "empty".to_string(),
            ClusterDefinition {
                destinations: BTreeMap::new(),
            },
        );

        let errors = errors(&config);
        assert_eq!(errors.len(), 6, "{errors:#?}");
        assert!(errors.iter().any(|e| e.contains("signing_key")));
        assert!(errors.iter().any(|e| e.contains("server.listen")));
        assert!(errors.iter().any(|e| e.contains("upstream_timeout_secs")));
        assert!(errors.iter().any(|e| e.contains("'public' is used more than once")));
        assert!(errors.iter().any(|e| e.contains("undefined cluster 'missing'")));
        assert!(errors.iter().any(|e| e.contains("cluster 'empty' has no destinations")));
    }

    #[test]
    fn test_time_bounds_are_startup_errors() {
        let mut unbounded = config();
        unbounded.jwt.clock_skew_secs = 10_000_000_000_000;
        unbounded.token_issuer.lifetime_secs = u64::MAX;

        let reported = errors(&unbounded);
        assert_eq!(reported.len(), 2, "{reported:#?}");
        assert!(reported.iter().any(|e| e.contains("jwt.clock_skew_secs")));
        assert!(reported.iter().any(|e| e.contains("token_issuer.lifetime_secs")));

        let mut zero = config();
        zero.token_issuer.lifetime_secs = 0;
        assert_eq!(errors(&zero).len(), 1);

        zero.token_issuer.enabled = false;
        assert!(Gateway::from_config(&zero).is_ok());
    }

    #[test]
    fn test_destination_address_must_be_http_url() {
        let mut config = config();
        for address in ["127.0.0.1:5001", "ftp://host", "/relative"] {
            config
                .clusters
                .get_mut("cities")
                .unwrap()
                .destinations
                .insert("bad".to_string(), DestinationDefinition { address: address.to_string() });
            let errors = errors(&config);
            assert_eq!(errors.len(), 1, "{address}: {errors:?}");
        }
    }

    #[test]
    fn test_issuer_can_be_disabled() {
        let mut config = config();
        config.token_issuer.enabled = false;
        assert!(Gateway::from_config(&config).unwrap().issuer().is_none());
    }

    #[test]
    fn test_validate_returns_errors() {
        let mut config = config();
        config.jwt.audience.clear();
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("jwt.audience"));
        assert!(GatewayConfig::default().validate().is_err());
    }
}
