/// Declarative route protection
///
/// Maps path patterns to the resource id and roles a caller needs.
/// Patterns use ant-style wildcards: `*` matches within one path segment,
/// `**` matches any number of segments, `?` matches one character.
/// Rules are checked in order and the first match wins.

use regex::Regex;
use std::collections::HashSet;

use crate::auth::Role;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct RouteRule {
    pattern: String,
    matcher: Regex,
    pub resource_id: String,
    pub required_roles: HashSet<Role>,
}

impl RouteRule {
    pub fn new(
        pattern: &str,
        resource_id: String,
        required_roles: HashSet<Role>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            pattern: pattern.to_string(),
            matcher: compile_pattern(pattern)?,
            resource_id,
            required_roles,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    if !pattern.starts_with('/') {
        return Err(ConfigError::InvalidValue(format!(
            "route pattern must start with '/': {}",
            pattern
        )));
    }

    let mut expr = String::from("^");
    for segment in pattern.split('/').skip(1) {
        if segment == "**" {
            expr.push_str("(?:/.*)?");
            continue;
        }
        expr.push('/');
        for c in segment.chars() {
            match c {
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
    }
    expr.push('$');

    Regex::new(&expr)
        .map_err(|e| ConfigError::InvalidValue(format!("route pattern {}: {}", pattern, e)))
}
