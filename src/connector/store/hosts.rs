//! Host name comparison for credential lookup.
//!
//! Stored credentials are keyed by whatever host name was in use when they
//! were saved, which may be the short or the fully-qualified form. The
//! comparison rule is pluggable because "same host" is a heuristic.

use std::sync::Arc;

/// Decides whether two host names refer to the same endpoint.
pub trait HostNameMatcher: Send + Sync {
    fn matches(&self, a: &str, b: &str) -> bool;
}

/// Resolves a host name to its fully-qualified form.
pub type HostResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Case-insensitive matcher with an optional qualification rule.
///
/// Two names match when they are equal ignoring case, or when one is a prefix
/// of the other and both resolve to the same qualified name. Without a
/// resolver only the first rule applies.
#[derive(Clone, Default)]
pub struct QualifiedHostMatcher {
    resolver: Option<HostResolver>,
}

impl QualifiedHostMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(resolver: HostResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }
}

impl HostNameMatcher for QualifiedHostMatcher {
    fn matches(&self, a: &str, b: &str) -> bool {
        if a.eq_ignore_ascii_case(b) {
            return true;
        }

        let Some(resolver) = &self.resolver else {
            return false;
        };

        let (a_lower, b_lower) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
        if !a_lower.starts_with(&b_lower) && !b_lower.starts_with(&a_lower) {
            return false;
        }

        match (resolver(a), resolver(b)) {
            (Some(qa), Some(qb)) => qa.eq_ignore_ascii_case(&qb),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_resolver() -> HostResolver {
        Arc::new(|name: &str| {
            let lower = name.to_ascii_lowercase();
            match lower.as_str() {
                "build" | "build.example.com" => Some("build.example.com".to_string()),
                "buildbox" | "buildbox.example.com" => Some("buildbox.example.com".to_string()),
                _ => None,
            }
        })
    }

    #[test]
    fn test_case_insensitive_equality() {
        let matcher = QualifiedHostMatcher::new();
        assert!(matcher.matches("HOST1", "host1"));
        assert!(!matcher.matches("host1", "host2"));
    }

    #[test]
    fn test_prefix_needs_resolver() {
        let matcher = QualifiedHostMatcher::new();
        assert!(!matcher.matches("build", "build.example.com"));
    }

    #[test]
    fn test_short_and_qualified_names_match() {
        let matcher = QualifiedHostMatcher::with_resolver(example_resolver());
        assert!(matcher.matches("build", "build.example.com"));
        assert!(matcher.matches("BUILD.example.com", "build"));
    }

    #[test]
    fn test_prefix_with_different_qualified_names_does_not_match() {
        let matcher = QualifiedHostMatcher::with_resolver(example_resolver());
        assert!(!matcher.matches("build", "buildbox"));
    }

    #[test]
    fn test_unresolvable_names_do_not_match() {
        let matcher = QualifiedHostMatcher::with_resolver(example_resolver());
        assert!(!matcher.matches("db", "db.internal"));
    }
}
