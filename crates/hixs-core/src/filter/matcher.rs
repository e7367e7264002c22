//! Compiled blocklist
//!
//! All patterns are compiled once into a single case-insensitive [`RegexSet`]
//! and searched against the full URL string. The matcher is immutable after
//! construction and can be shared freely between threads.

use crate::error::CoreError;
use crate::filter::patterns::builtin_patterns;
use regex::{RegexBuilder, RegexSet, RegexSetBuilder};
use std::fmt;
use tracing::info;

/// Compiled program size budget for the whole set
const SET_SIZE_LIMIT: usize = 64 * (1 << 20);

/// Classifies request URLs against a fixed pattern set
pub struct PatternMatcher {
    set: RegexSet,
    patterns: Vec<String>,
}

impl PatternMatcher {
    /// Compile `patterns`. A pattern that does not compile is reported by name.
    pub fn new<I, S>(patterns: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        // Compile individually first so a bad entry can be named in the error
        for pattern in &patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| CoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
        }

        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .size_limit(SET_SIZE_LIMIT)
            .build()
            .map_err(|source| CoreError::InvalidPattern {
                pattern: format!("<{} patterns combined>", patterns.len()),
                source,
            })?;

        info!("Compiled {} blocklist patterns", patterns.len());

        Ok(Self { set, patterns })
    }

    /// The built-in blocklist
    pub fn builtin() -> Result<Self, CoreError> {
        Self::new(builtin_patterns())
    }

    /// The built-in blocklist followed by `extra`
    pub fn with_extra(extra: &[String]) -> Result<Self, CoreError> {
        Self::new(builtin_patterns().map(String::from).chain(extra.iter().cloned()))
    }

    /// Whether a request to `url` should be blocked.
    ///
    /// Input that does not parse as an absolute URL is never blocked.
    pub fn blocks(&self, url: &str) -> bool {
        is_absolute_url(url) && self.set.is_match(url)
    }

    /// The first pattern (in list order) matching `url`
    pub fn first_match(&self, url: &str) -> Option<&str> {
        if !is_absolute_url(url) {
            return None;
        }
        self.set
            .matches(url)
            .iter()
            .next()
            .map(|index| self.patterns[index].as_str())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternMatcher")
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

fn is_absolute_url(url: &str) -> bool {
    url::Url::parse(url).is_ok()
}
