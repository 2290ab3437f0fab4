//! `?`/`*` name patterns for `CONNECT` targets.

use regex::Regex;

/// A compiled wildcard pattern. `?` matches one character, `*` any run of
/// characters; everything else matches literally and the whole name must
/// match.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// # Errors
    ///
    /// Returns an error if the translated expression exceeds the regex size
    /// limits.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.source.contains(['*', '?'])
    }
}
