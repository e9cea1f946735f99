use regex::Regex;

/// Compiled line filter for one-shot log retrieval
#[derive(Clone)]
pub struct LineFilter {
    /// Regex pattern (if any)
    regex: Option<Regex>,

    /// Original pattern string
    pattern: String,
}

impl LineFilter {
    /// Compile a filter; an empty pattern keeps every line
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }

    /// Check if a line matches this filter
    pub fn matches(&self, line: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(line),
            None => true,
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }
}

impl std::fmt::Debug for LineFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineFilter")
            .field("pattern", &self.pattern)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_filter() {
        let filter = LineFilter::new("error|panic").unwrap();
        assert!(filter.matches("an error occurred"));
        assert!(filter.matches("panic: nil map"));
        assert!(!filter.matches("everything is fine"));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = LineFilter::new("").unwrap();
        assert!(filter.is_empty());
        assert!(filter.matches("anything"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_malformed_pattern_is_rejected() {
        assert!(LineFilter::new("level=(info").is_err());
    }
}
