use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use storyforge_core::error::{Result, StoryforgeError};

use super::state::StoryState;

/// Target name that terminates a run.
pub const END: &str = "__end__";

/// A pure decision over the current state, returning a branch key.
pub trait Router: Send + Sync + 'static {
    fn route(&self, state: &StoryState) -> String;

    /// Every key this router can return, when known. Checked against the
    /// branch map when the graph is built.
    fn outcomes(&self) -> Option<Vec<String>> {
        None
    }
}

impl<F> Router for F
where
    F: Fn(&StoryState) -> String + Send + Sync + 'static,
{
    fn route(&self, state: &StoryState) -> String {
        self(state)
    }
}

/// Where control goes after a node.
#[derive(Clone)]
pub enum EdgeTarget {
    Fixed(String),
    Conditional {
        router: Arc<dyn Router>,
        branches: BTreeMap<String, String>,
    },
}

/// The single outgoing edge of a node.
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub target: EdgeTarget,
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            EdgeTarget::Fixed(to) => write!(f, "Edge({} -> {})", self.from, to),
            EdgeTarget::Conditional { branches, .. } => {
                write!(f, "Edge({} -> {:?})", self.from, branches)
            }
        }
    }
}

impl Edge {
    pub fn fixed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            target: EdgeTarget::Fixed(to.into()),
        }
    }

    pub fn conditional(
        from: impl Into<String>,
        router: Arc<dyn Router>,
        branches: BTreeMap<String, String>,
    ) -> Self {
        Self {
            from: from.into(),
            target: EdgeTarget::Conditional { router, branches },
        }
    }

    /// Every name this edge can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match &self.target {
            EdgeTarget::Fixed(to) => vec![to.as_str()],
            EdgeTarget::Conditional { branches, .. } => {
                branches.values().map(String::as_str).collect()
            }
        }
    }

    /// Resolve the next node name for the given state.
    pub fn resolve(&self, state: &StoryState) -> Result<String> {
        match &self.target {
            EdgeTarget::Fixed(to) => Ok(to.clone()),
            EdgeTarget::Conditional { router, branches } => {
                let key = router.route(state);
                branches.get(&key).cloned().ok_or_else(|| {
                    StoryforgeError::Config(format!(
                        "router after '{}' returned unmapped key '{}'",
                        self.from, key
                    ))
                })
            }
        }
    }
}

/// Routes on the string value of one field, with a default for anything else.
///
/// Unrecognized values (including an absent field) take the default key and
/// log a warning.
#[derive(Debug, Clone)]
pub struct FieldRouter {
    field: String,
    known: Vec<String>,
    default: String,
}

impl FieldRouter {
    pub fn new(field: impl Into<String>, known: &[&str], default: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            known: known.iter().map(|s| s.to_string()).collect(),
            default: default.into(),
        }
    }
}

impl Router for FieldRouter {
    fn route(&self, state: &StoryState) -> String {
        let value = state.get_str(&self.field);
        if self.known.iter().any(|k| k == value) {
            value.to_string()
        } else {
            warn!(
                field = %self.field,
                value,
                default = %self.default,
                "Unrecognized routing value, using default branch"
            );
            self.default.clone()
        }
    }

    fn outcomes(&self) -> Option<Vec<String>> {
        let mut keys = self.known.clone();
        if !keys.contains(&self.default) {
            keys.push(self.default.clone());
        }
        Some(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branches(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fixed_edge_resolves() {
        let edge = Edge::fixed("a", "b");
        assert_eq!(edge.resolve(&StoryState::new()).unwrap(), "b");
        assert_eq!(edge.targets(), vec!["b"]);
    }

    #[test]
    fn test_conditional_edge_uses_router() {
        let router: Arc<dyn Router> = Arc::new(|s: &StoryState| {
            if s.get_bool("ok") { "yes".to_string() } else { "no".to_string() }
        });
        let edge = Edge::conditional("a", router, branches(&[("yes", "b"), ("no", END)]));

        assert_eq!(edge.resolve(&StoryState::new().with("ok", true)).unwrap(), "b");
        assert_eq!(edge.resolve(&StoryState::new()).unwrap(), END);
    }

    #[test]
    fn test_unmapped_key_is_config_error() {
        let router: Arc<dyn Router> = Arc::new(|_: &StoryState| "maybe".to_string());
        let edge = Edge::conditional("a", router, branches(&[("yes", "b")]));
        let err = edge.resolve(&StoryState::new()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_field_router_default() {
        let router = FieldRouter::new("genre", &["Historical", "Terror"], "Moral & Reflection");

        assert_eq!(router.route(&StoryState::new().with("genre", "Terror")), "Terror");
        assert_eq!(
            router.route(&StoryState::new().with("genre", "Sci-Fi")),
            "Moral & Reflection"
        );
        assert_eq!(router.route(&StoryState::new()), "Moral & Reflection");
        assert_eq!(router.outcomes().unwrap().len(), 3);
    }
}
