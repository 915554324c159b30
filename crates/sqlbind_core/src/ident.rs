use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sqlbind_parser::ast::Ident;
use unicase::UniCase;

/// An identifier that compares and hashes case-insensitively.
///
/// The original spelling is kept for display and for generated column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdString(String);

impl IdString {
    pub fn new(s: impl Into<String>) -> Self {
        IdString(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Names starting with `$` are generated by the binder and can never be
    /// referenced from SQL text.
    pub fn is_internal(&self) -> bool {
        self.0.starts_with('$')
    }

    pub fn eq_str(&self, other: &str) -> bool {
        UniCase::new(self.0.as_str()) == UniCase::new(other)
    }
}

impl PartialEq for IdString {
    fn eq(&self, other: &Self) -> bool {
        self.eq_str(&other.0)
    }
}

impl Eq for IdString {}

impl Hash for IdString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        UniCase::new(self.0.as_str()).hash(state)
    }
}

impl From<&str> for IdString {
    fn from(value: &str) -> Self {
        IdString(value.to_string())
    }
}

impl From<String> for IdString {
    fn from(value: String) -> Self {
        IdString(value)
    }
}

impl From<&Ident> for IdString {
    fn from(value: &Ident) -> Self {
        IdString(value.value.clone())
    }
}

impl fmt::Display for IdString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks the most similar candidate to some misspelled name.
#[derive(Debug, Clone)]
pub struct SimilarName {
    score: f64,
    name: String,
}

impl SimilarName {
    const SIMILARITY_THRESHOLD: f64 = 0.7;

    /// Maybe updates `current` with `candidate` if it scores higher in
    /// similarity with `name`.
    pub fn maybe_update(current: &mut Option<Self>, candidate: &str, name: &str) {
        let score = strsim::jaro(&candidate.to_lowercase(), &name.to_lowercase());
        if score <= Self::SIMILARITY_THRESHOLD {
            return;
        }
        match current {
            Some(existing) if existing.score >= score => (),
            _ => {
                *current = Some(SimilarName {
                    score,
                    name: candidate.to_string(),
                })
            }
        }
    }

    /// Find the best match for `name` among `candidates`.
    pub fn find<'a>(candidates: impl IntoIterator<Item = &'a str>, name: &str) -> Option<String> {
        let mut best = None;
        for candidate in candidates {
            if candidate.starts_with('$') || UniCase::new(candidate) == UniCase::new(name) {
                continue;
            }
            Self::maybe_update(&mut best, candidate, name);
        }
        best.map(|s| s.name)
    }
}

/// Format a "did you mean" suffix for error messages.
pub fn did_you_mean(suggestion: Option<String>) -> String {
    match suggestion {
        Some(s) => format!("; Did you mean {s}?"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn case_insensitive_eq_and_hash() {
        let mut set = hashbrown::HashSet::new();
        set.insert(IdString::new("MyTable"));
        assert!(set.contains(&IdString::new("mytable")));
        assert_eq!(IdString::new("ABC"), IdString::new("abc"));
        assert_eq!("MyTable", set.iter().next().unwrap().to_string());
    }

    #[test]
    fn internal_names() {
        assert!(IdString::new("$col1").is_internal());
        assert!(!IdString::new("col1").is_internal());
    }

    #[test]
    fn similar_names() {
        let got = SimilarName::find(["orders", "customers", "$col1"], "ordrs");
        assert_eq!(Some("orders".to_string()), got);

        let got = SimilarName::find(["orders"], "zzzzzz");
        assert_eq!(None, got);
    }
}
