use crate::auth::ClaimSet;
use crate::config::PolicyDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the built-in policy that only requires authentication
pub const DEFAULT_POLICY: &str = "default";

/// Route policy value that disables authentication for a route
pub const ANONYMOUS_POLICY: &str = "anonymous";

/// One predicate of a policy
///
/// Value sets are any-match: one intersecting value satisfies the requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// A validated claim set must be present
    Authenticated,

    /// The `role` claim must contain one of `roles`
    Role { roles: Vec<String> },

    /// `claim` must contain one of `values`; an empty list only requires presence
    Claim {
        claim: String,
        #[serde(default)]
        values: Vec<String>,
    },
}

impl Requirement {
    pub fn is_satisfied_by(&self, claims: Option<&ClaimSet>) -> bool {
        match (self, claims) {
            (_, None) => false,
            (Self::Authenticated, Some(_)) => true,
            (Self::Role { roles }, Some(claims)) => intersects(claims.roles(), roles),
            (Self::Claim { claim, values }, Some(claims)) if values.is_empty() => {
                claims.contains(claim)
            }
            (Self::Claim { claim, values }, Some(claims)) => intersects(claims.values(claim), values),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated => f.write_str("an authenticated user"),
            Self::Role { roles } => write!(f, "role in [{}]", roles.join(", ")),
            Self::Claim { claim, values } if values.is_empty() => write!(f, "claim '{claim}'"),
            Self::Claim { claim, values } => {
                write!(f, "claim '{claim}' in [{}]", values.join(", "))
            }
        }
    }
}

fn intersects(present: &[String], accepted: &[String]) -> bool {
    present.iter().any(|value| accepted.contains(value))
}

/// Result of evaluating a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    /// The first requirement that did not hold
    Deny(Requirement),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A named conjunction of requirements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    name: String,
    requirements: Vec<Requirement>,
}

impl Policy {
    pub fn new(name: impl Into<String>, requirements: Vec<Requirement>) -> Self {
        Self {
            name: name.into(),
            requirements,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Evaluate against a claim set, or `None` for an unauthenticated caller
    ///
    /// Stops at the first unmet requirement. An empty policy always allows.
    pub fn evaluate(&self, claims: Option<&ClaimSet>) -> PolicyDecision {
        self.requirements
            .iter()
            .find(|requirement| !requirement.is_satisfied_by(claims))
            .map_or(PolicyDecision::Allow, |unmet| PolicyDecision::Deny(unmet.clone()))
    }
}

/// Immutable name → policy lookup
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    policies: HashMap<String, Arc<Policy>>,
}

impl PolicyTable {
    /// Build the table from configuration, collecting every error
    ///
    /// A `default` policy requiring authentication is added unless the
    /// configuration defines its own.
    pub fn from_definitions(definitions: &[PolicyDefinition]) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();
        let mut policies = HashMap::new();

        for definition in definitions {
            let name = definition.name.trim();
            if name.is_empty() {
                errors.push("policy name cannot be empty".to_string());
                continue;
            }
            if name.eq_ignore_ascii_case(ANONYMOUS_POLICY) {
                errors.push(format!("policy name '{name}' is reserved"));
                continue;
            }

            for requirement in &definition.requirements {
                match requirement {
                    Requirement::Role { roles } if roles.is_empty() => errors.push(format!(
                        "policy '{name}': role requirement needs at least one role"
                    )),
                    Requirement::Claim { claim, .. } if claim.is_empty() => errors.push(format!(
                        "policy '{name}': claim requirement needs a claim name"
                    )),
                    _ => {}
                }
            }

            let policy = Policy::new(name, definition.requirements.clone());
            if policies.insert(name.to_string(), Arc::new(policy)).is_some() {
                errors.push(format!("policy '{name}' is defined more than once"));
            }
        }

        policies
            .entry(DEFAULT_POLICY.to_string())
            .or_insert_with(|| Arc::new(Policy::new(DEFAULT_POLICY, vec![Requirement::Authenticated])));

        if errors.is_empty() {
            Ok(Self { policies })
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Policy>> {
        self.policies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
