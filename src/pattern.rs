//! Shell-style wildcard matching (`*`, `?`) for directory searches, compiled
//! once to a [`regex::Regex`].

use regex::Regex;

use crate::error::{Error, Result};

/// A compiled `*`/`?` wildcard pattern, matched case-insensitively against
/// a single path segment (never across `\` separators).
pub struct SearchPattern {
    source: String,
    regex: Regex,
}

impl SearchPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut regex_src = String::with_capacity(pattern.len() * 2 + 2);
        regex_src.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => regex_src.push_str(".*"),
                '?' => regex_src.push('.'),
                '\\' => return Err(Error::InvalidPath("wildcard pattern contains '\\'".into())),
                _ => {
                    regex_src.push_str(&regex::escape(&ch.to_string()));
                }
            }
        }
        regex_src.push('$');
        let regex = Regex::new(&format!("(?i){regex_src}"))
            .map_err(|e| Error::InvalidPath(format!("bad search pattern: {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run_of_characters() {
        let p = SearchPattern::compile("*.txt").unwrap();
        assert!(p.matches("notes.txt"));
        assert!(p.matches(".txt"));
        assert!(!p.matches("notes.rs"));
    }

    #[test]
    fn question_mark_matches_exactly_one_character() {
        let p = SearchPattern::compile("log?.bin").unwrap();
        assert!(p.matches("log1.bin"));
        assert!(!p.matches("log12.bin"));
        assert!(!p.matches("log.bin"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let p = SearchPattern::compile("README*").unwrap();
        assert!(p.matches("readme.md"));
    }

    #[test]
    fn literal_regex_metacharacters_are_escaped() {
        let p = SearchPattern::compile("a.b").unwrap();
        assert!(p.matches("a.b"));
        assert!(!p.matches("axb"));
    }
}
