//! # Wildcard Pattern Matching
//!
//! `*` matches any run of characters; every other character is literal. Patterns
//! are anchored, so `*/health` matches `/api/health` but not `/api/health/x`.
//!
//! [`PatternSet`] compiles several patterns, ordered longest first (ties broken
//! lexicographically) so [`PatternSet::first_match`] reports the most specific
//! pattern. The rate limiter's custom rules deliberately do NOT use this ordering:
//! they keep registration order.

use regex::Regex;

use crate::core::error::{GatewayError, GatewayResult};

/// Compile one wildcard pattern into an anchored regular expression
pub fn compile_wildcard(pattern: &str) -> GatewayResult<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("^{}$", body))
        .map_err(|e| GatewayError::config(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Set of wildcard patterns sorted by specificity
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<(String, Regex)>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> GatewayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources: Vec<String> = patterns.into_iter().map(Into::into).collect();
        sources.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        sources.dedup();

        let patterns = sources
            .into_iter()
            .map(|source| compile_wildcard(&source).map(|regex| (source, regex)))
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// An empty set matches everything
    pub fn matches(&self, input: &str) -> bool {
        self.patterns.is_empty() || self.first_match(input).is_some()
    }

    /// Wildcard `exact` defers to the set; otherwise plain equality
    pub fn matches_exact(&self, input: &str, exact: &str) -> bool {
        if exact.contains('*') {
            self.matches(input)
        } else {
            input == exact
        }
    }

    /// Most specific pattern matching `input`
    pub fn first_match(&self, input: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(input))
            .map(|(source, _)| source.as_str())
    }

    /// Patterns in evaluation order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(source, _)| source.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
