//! Identifier validation and wildcard name filters
//!
//! Every schema and object name taken from a path is checked here before it
//! reaches SQL text or an outgoing path. Only ASCII letters, digits and
//! underscore are accepted.
//!
//! Wildcard filters (`*`, `?`) are used by path expansion and translate to
//! SQL `LIKE` patterns that always travel as bound parameters.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DbDriveError, Result};

static NAME_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$"));
static FILTER_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_*?]+$"));

/// Escape character used in generated `LIKE ... ESCAPE` clauses
pub const LIKE_ESCAPE: char = '\\';

/// Returns true when `name` consists only of `[A-Za-z0-9_]` and is non-empty
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.as_ref().is_ok_and(|re| re.is_match(name))
}

/// Validate a name, reporting `kind` ("schema", "table", ...) on rejection
pub fn ensure_valid_name(kind: &str, name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(DbDriveError::name_rejected(kind, name))
    }
}

/// A validated wildcard name filter
///
/// `*` matches any run of characters, `?` exactly one. Matching is
/// case-insensitive when evaluated locally; server-side matching follows the
/// drive's name matching policy.
#[derive(Debug, Clone)]
pub struct NameFilter {
    wildcard: String,
    matcher: Regex,
}

impl NameFilter {
    /// Parse a wildcard pattern such as `ORD*` or `T?_2024`
    pub fn parse(wildcard: &str) -> Result<Self> {
        if !FILTER_PATTERN.as_ref().is_ok_and(|re| re.is_match(wildcard)) {
            return Err(DbDriveError::name_rejected("filter", wildcard));
        }

        let mut pattern = String::from("(?i)^");
        for ch in wildcard.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push(other),
            }
        }
        pattern.push('$');

        let matcher = Regex::new(&pattern)
            .map_err(|e| DbDriveError::invalid_input(format!("Invalid filter '{wildcard}': {e}")))?;

        Ok(Self { wildcard: wildcard.to_string(), matcher })
    }

    /// The wildcard text as given
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.wildcard
    }

    /// True when the filter contains no wildcard characters
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self.wildcard.contains(['*', '?'])
    }

    /// SQL `LIKE` pattern, escaping literal `_` with [`LIKE_ESCAPE`]
    #[must_use]
    pub fn like_pattern(&self) -> String {
        let mut out = String::with_capacity(self.wildcard.len() + 4);
        for ch in self.wildcard.chars() {
            match ch {
                '*' => out.push('%'),
                '?' => out.push('_'),
                '_' => {
                    out.push(LIKE_ESCAPE);
                    out.push('_');
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Local case-insensitive match
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        assert!(NAME_PATTERN.is_ok());
        assert!(FILTER_PATTERN.is_ok());
    }

    #[test]
    fn test_accepts_identifier_characters() {
        assert!(is_valid_name("SALES"));
        assert!(is_valid_name("order_items_2024"));
        assert!(is_valid_name("_"));
        assert!(is_valid_name("9"));
    }

    #[test]
    fn test_rejects_injection_and_separators() {
        for bad in ["", "SALES;DROP", "a'b", "a--b", "a b", "a\tb", "a\\b", "a/b", "a:b", "é", "a.b"] {
            assert!(!is_valid_name(bad), "expected '{bad}' to be rejected");
        }
    }

    #[test]
    fn test_ensure_valid_name_reports_kind() {
        let err = ensure_valid_name("table", "X;DROP").unwrap_err();
        match err {
            DbDriveError::NameRejected { kind, name } => {
                assert_eq!(kind, "table");
                assert_eq!(name, "X;DROP");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_filter_like_pattern() {
        assert_eq!(NameFilter::parse("ORD*").unwrap().like_pattern(), "ORD%");
        assert_eq!(NameFilter::parse("T?").unwrap().like_pattern(), "T_");
        assert_eq!(NameFilter::parse("A_B*").unwrap().like_pattern(), "A\\_B%");
    }

    #[test]
    fn test_filter_local_match() {
        let filter = NameFilter::parse("ord*").unwrap();
        assert!(filter.matches("ORDERS"));
        assert!(filter.matches("ord"));
        assert!(!filter.matches("XORD"));

        let filter = NameFilter::parse("T?BLE").unwrap();
        assert!(filter.matches("TABLE"));
        assert!(!filter.matches("TBLE"));
    }

    #[test]
    fn test_filter_rejects_metacharacters() {
        assert!(NameFilter::parse("a%").is_err());
        assert!(NameFilter::parse("a.*").is_err());
        assert!(NameFilter::parse("").is_err());
        assert!(NameFilter::parse("x'--").is_err());
    }

    #[test]
    fn test_literal_filter() {
        assert!(NameFilter::parse("ORDERS").unwrap().is_literal());
        assert!(!NameFilter::parse("ORD*").unwrap().is_literal());
    }
}
