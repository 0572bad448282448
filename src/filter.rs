//! Include/exclude substring filtering

/// Include entry that switches include filtering off
pub const WILDCARD: &str = "*";

/// Decides which messages reach the sink.
///
/// Exclusion wins: a message containing any excluded substring is dropped,
/// whatever the include list says. Otherwise a non-empty include list
/// requires at least one of its substrings to be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    must_not_contain: Vec<String>,
    must_contain: Vec<String>,
}

impl FilterChain {
    /// Build a chain from raw configuration lists.
    ///
    /// Blank entries are skipped. An include entry of `*` empties the
    /// include list and ends include parsing.
    pub fn new<E, I>(exclude: E, include: I) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let must_not_contain = exclude
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();

        let mut must_contain = Vec::new();
        for entry in include.into_iter().map(Into::into) {
            if entry.trim().is_empty() {
                continue;
            }
            if entry.trim() == WILDCARD {
                must_contain.clear();
                break;
            }
            must_contain.push(entry);
        }

        Self {
            must_not_contain,
            must_contain,
        }
    }

    /// A chain that accepts everything
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn accept(&self, text: &str) -> bool {
        if self.must_not_contain.iter().any(|s| text.contains(s.as_str())) {
            return false;
        }
        self.must_contain.is_empty() || self.must_contain.iter().any(|s| text.contains(s.as_str()))
    }

    pub fn exclude_list(&self) -> &[String] {
        &self.must_not_contain
    }

    pub fn include_list(&self) -> &[String] {
        &self.must_contain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_exclude_only() {
        let chain = FilterChain::new(["ERR"], NONE);
        assert!(!chain.accept("this is ERR"));
        assert!(chain.accept("ok"));
    }

    #[test]
    fn test_include_only() {
        let chain = FilterChain::new(NONE, ["INFO"]);
        assert!(chain.accept("INFO: ok"));
        assert!(!chain.accept("debug"));
    }

    #[test]
    fn test_wildcard_clears_include() {
        let chain = FilterChain::new(["noise"], ["INFO", "*", "WARN"]);
        assert!(chain.include_list().is_empty());
        assert!(chain.accept("anything at all"));
        assert!(!chain.accept("some noise"));

        let padded = FilterChain::new(NONE, [" * "]);
        assert!(padded.include_list().is_empty());
    }

    #[test]
    fn test_any_excluded_entry_rejects() {
        // Only the first entry matches; a per-entry early exit would let this through
        let chain = FilterChain::new(["ERR", "FATAL"], ["ERR"]);
        assert!(!chain.accept("ERR: disk"));
        // Only the last entry matches
        assert!(!chain.accept("FATAL ERR"));
        assert!(!chain.accept("just FATAL"));
    }

    #[test]
    fn test_exclude_beats_include() {
        let chain = FilterChain::new(["secret"], ["INFO"]);
        assert!(chain.accept("INFO: ready"));
        assert!(!chain.accept("INFO: secret token"));
        assert!(!chain.accept("WARN: nope"));
    }

    #[test]
    fn test_blank_entries_ignored() {
        let chain = FilterChain::new(["", "   "], ["\t"]);
        assert_eq!(chain, FilterChain::accept_all());
        assert!(chain.accept(""));
    }
}
