//! Pattern matching seam
//!
//! The engines never interpret detection patterns themselves; they ask a
//! [`PatternMatcher`]. [`RegexMatcher`] is the default and caches compiled
//! expressions so each pattern is compiled once per process.

use super::error::{WafError, WafResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Decides whether a detection pattern matches an input string
pub trait PatternMatcher: Send + Sync {
    /// Match `input` against `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not valid for this matcher.
    fn is_match(&self, pattern: &str, input: &str) -> WafResult<bool>;
}

/// Regex-backed matcher with a compiled-pattern cache
#[derive(Debug, Default)]
pub struct RegexMatcher {
    cache: RwLock<HashMap<String, Arc<Regex>>>,
}

impl RegexMatcher {
    /// Create an empty matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and cache every pattern up front.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn precompile<'a>(&self, patterns: impl IntoIterator<Item = &'a str>) -> WafResult<()> {
        for pattern in patterns {
            self.compiled(pattern)?;
        }
        Ok(())
    }

    /// Number of cached patterns
    pub fn cached(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn compiled(&self, pattern: &str) -> WafResult<Arc<Regex>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(re) = cache.get(pattern) {
                return Ok(Arc::clone(re));
            }
        }

        let re = Arc::new(Regex::new(pattern).map_err(|e| WafError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?);

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(pattern.to_string(), Arc::clone(&re));
        }
        Ok(re)
    }
}

impl PatternMatcher for RegexMatcher {
    fn is_match(&self, pattern: &str, input: &str) -> WafResult<bool> {
        Ok(self.compiled(pattern)?.is_match(input))
    }
}
