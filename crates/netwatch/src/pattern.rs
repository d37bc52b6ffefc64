// URL pattern matching
//
// Turns the strings test steps pass in ("/auth/login", ".*\/users/\d+.*")
// into compiled matchers. Plain path fragments become permissive
// substring-style regexes; anything that already looks like a regex is used
// as-is.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;

/// Pattern that matches every URL
pub const MATCH_ALL: &str = ".*";

/// Token sequences that mark a string as an already-written regex.
const REGEX_MARKERS: &[&str] = &[".*", "\\d", "?", "+", "\\w", "\\s"];

/// Returns true if `pattern` already looks like a regular expression.
pub fn looks_like_regex(pattern: &str) -> bool {
    REGEX_MARKERS.iter().any(|marker| pattern.contains(marker))
}

/// Normalizes a URL pattern into a regex string.
///
/// Regex-looking input is returned unchanged, so normalization is idempotent.
/// A plain path fragment loses one leading `/`, is escaped, and is wrapped in
/// `.*` on both sides so it matches any URL containing it. Empty input
/// matches everything.
///
/// ```ignore
/// assert_eq!(normalize("/auth/login"), ".*auth/login.*");
/// assert_eq!(normalize(".*\\/login.*"), ".*\\/login.*");
/// assert_eq!(normalize(""), ".*");
/// ```
pub fn normalize(pattern: &str) -> String {
    if pattern.is_empty() {
        return MATCH_ALL.to_string();
    }
    if looks_like_regex(pattern) {
        return pattern.to_string();
    }

    let fragment = pattern.strip_prefix('/').unwrap_or(pattern);
    if fragment.is_empty() {
        return MATCH_ALL.to_string();
    }
    format!(".*{}.*", regex::escape(fragment))
}

/// A compiled, normalized URL pattern.
///
/// Matching is unanchored: the pattern only has to occur somewhere in the URL.
#[derive(Clone)]
pub struct UrlPattern {
    source: String,
    /// `None` matches every URL
    regex: Option<Regex>,
}

impl UrlPattern {
    /// Normalizes and compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the normalized pattern is not a
    /// valid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        let source = normalize(pattern);
        if source == MATCH_ALL {
            return Ok(Self::match_all());
        }
        let regex = Regex::new(&source).map_err(|e| Error::InvalidPattern {
            pattern: source.clone(),
            source: e,
        })?;
        Ok(Self {
            source,
            regex: Some(regex),
        })
    }

    /// Pattern matching every URL
    pub fn match_all() -> Self {
        Self {
            source: MATCH_ALL.to_string(),
            regex: None,
        }
    }

    /// The normalized regex source this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if `url` matches this pattern.
    pub fn is_match(&self, url: &str) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(url))
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UrlPattern {}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UrlPattern").field(&self.source).finish()
    }
}

impl Serialize for UrlPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}
