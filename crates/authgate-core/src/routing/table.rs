use crate::auth::policy::ANONYMOUS_POLICY;
use crate::config::RouteDefinition;
use crate::routing::PathPattern;
use http::Method;
use std::sync::Arc;

/// A request pattern bound to a policy and a backend cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: String,
    pub pattern: PathPattern,
    /// Empty matches any method
    pub methods: Vec<Method>,
    /// `None` forwards anonymously
    pub policy: Option<String>,
    pub cluster: String,
}

impl Route {
    pub fn from_definition(definition: &RouteDefinition) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let id = definition.id.trim();

        if id.is_empty() {
            errors.push(format!("route with path '{}' has an empty id", definition.path));
        }

        let pattern = PathPattern::parse(&definition.path)
            .map_err(|e| errors.push(format!("route '{id}': {e}")))
            .ok();

        let mut methods = Vec::with_capacity(definition.methods.len());
        for method in &definition.methods {
            match Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()) {
                Ok(method) => methods.push(method),
                Err(_) => errors.push(format!("route '{id}': invalid method '{method}'")),
            }
        }

        let policy = definition
            .policy
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case(ANONYMOUS_POLICY))
            .map(String::from);

        if definition.cluster.trim().is_empty() {
            errors.push(format!("route '{id}': cluster is required"));
        }

        match pattern {
            Some(pattern) if errors.is_empty() => Ok(Self {
                id: id.to_string(),
                pattern,
                methods,
                policy,
                cluster: definition.cluster.trim().to_string(),
            }),
            _ => Err(errors),
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.allows_method(method) && self.pattern.matches(path)
    }

    /// Method comparison ignores case, so `get` in a request matches `GET`
    fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|allowed| allowed.as_str().eq_ignore_ascii_case(method.as_str()))
    }

    /// Whether this route, placed earlier, hides `later` completely
    fn shadows(&self, later: &Route) -> bool {
        let covers_methods = self.methods.is_empty()
            || (!later.methods.is_empty() && later.methods.iter().all(|m| self.allows_method(m)));
        covers_methods && self.pattern.shadows(&later.pattern)
    }
}

/// Ordered route list; the first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.matches(method, path))
    }

    /// Pairs of (earlier, later) route ids where `later` can never match
    pub fn shadowed(&self) -> Vec<(&str, &str)> {
        let mut shadowed = Vec::new();
        for (index, later) in self.routes.iter().enumerate() {
            if let Some(earlier) = self.routes[..index].iter().find(|earlier| earlier.shadows(later)) {
                shadowed.push((earlier.id.as_str(), later.id.as_str()));
            }
        }
        shadowed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
