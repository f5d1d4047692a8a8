use {regex::Regex, std::fmt};

/// Glob pattern over thread names.
///
/// `*` matches any run of characters (including none) and `?` matches exactly
/// one character; everything else matches literally. The whole name must match.
#[derive(Clone)]
pub struct ThreadNamePattern {
    glob: String,
    regex: Regex,
}

impl ThreadNamePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(glob.len().saturating_add(8));
        expr.push_str("(?s)^");
        let mut buf = [0u8; 4];
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut buf))),
            }
        }
        expr.push('$');
        Ok(Self {
            glob: glob.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, thread_name: &str) -> bool {
        self.regex.is_match(thread_name)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl fmt::Debug for ThreadNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadNamePattern({:?})", self.glob)
    }
}

impl PartialEq for ThreadNamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

impl Eq for ThreadNamePattern {}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case("worker-*", "worker-7", true; "prefix match")]
    #[test_case("worker-*", "worker-", true; "prefix only")]
    #[test_case("worker-*", "misc-thread", false; "prefix mismatch")]
    #[test_case("worker-*", "my-worker-1", false; "anchored at start")]
    #[test_case("*", "misc-thread", true; "star matches all")]
    #[test_case("*", "", true; "star matches empty")]
    #[test_case("io-?", "io-1", true; "single char")]
    #[test_case("io-?", "io-12", false; "single char only")]
    #[test_case("solRpc.*", "solRpc.1", true; "dot is literal")]
    #[test_case("solRpc.*", "solRpcX1", false; "dot is not wildcard")]
    #[test_case("[net]*", "[net]-rx", true; "brackets are literal")]
    #[test_case("exact", "exact", true; "exact")]
    #[test_case("exact", "exactly", false; "exact is anchored")]
    fn test_glob_matching(glob: &str, name: &str, expected: bool) {
        let pattern = ThreadNamePattern::new(glob).unwrap();
        assert_eq!(pattern.matches(name), expected, "{glob} vs {name}");
    }

    #[test]
    fn test_pattern_identity() {
        let a = ThreadNamePattern::new("tokio-*").unwrap();
        let b = ThreadNamePattern::new("tokio-*").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "tokio-*");
        assert_eq!(format!("{a:?}"), "ThreadNamePattern(\"tokio-*\")");
    }
}
