//! Parses and decomposes `\`-separated virtual paths.

use crate::error::{Error, Result};

/// A validated, absolute `\`-separated path: `\a\b\c`. Each segment is
/// 1..=255 UTF-16 code units and contains neither `\` nor a NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathName {
    segments: Vec<String>,
}

impl PathName {
    pub fn parse(path: &str) -> Result<Self> {
        if !path.starts_with('\\') {
            return Err(Error::InvalidPath(format!("path must be absolute: {path}")));
        }
        let mut segments = Vec::new();
        for raw in path.split('\\').skip(1) {
            if raw.is_empty() {
                continue;
            }
            let units = raw.encode_utf16().count();
            if units == 0 || units > 255 {
                return Err(Error::InvalidPath(format!(
                    "segment '{raw}' length outside 1..=255"
                )));
            }
            if raw.contains('\0') {
                return Err(Error::InvalidPath(format!("segment '{raw}' contains NUL")));
            }
            segments.push(raw.to_string());
        }
        Ok(Self { segments })
    }

    /// The root path `\`.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// All segments but the last: the path of the containing directory.
    pub fn parent(&self) -> Self {
        let len = self.segments.len().saturating_sub(1);
        Self {
            segments: self.segments[..len].to_vec(),
        }
    }

    /// The final segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Result<Self> {
        let mut full = self.full_path();
        if !full.ends_with('\\') {
            full.push('\\');
        }
        full.push_str(name);
        Self::parse(&full)
    }

    /// Reconstructs the canonical `\`-separated string form.
    pub fn full_path(&self) -> String {
        if self.segments.is_empty() {
            return "\\".to_string();
        }
        let mut out = String::new();
        for seg in &self.segments {
            out.push('\\');
            out.push_str(seg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_path_into_segments() {
        let p = PathName::parse(r"\a\b\c").unwrap();
        assert_eq!(p.segments(), &["a", "b", "c"]);
        assert_eq!(p.name(), Some("c"));
        assert_eq!(p.parent().full_path(), r"\a\b");
    }

    #[test]
    fn root_has_no_name_and_no_segments() {
        let p = PathName::parse(r"\").unwrap();
        assert!(p.is_root());
        assert_eq!(p.name(), None);
        assert_eq!(p.full_path(), r"\");
    }

    #[test]
    fn rejects_relative_paths() {
        assert!(PathName::parse("a\\b").is_err());
    }

    #[test]
    fn collapses_repeated_separators() {
        let p = PathName::parse(r"\a\\b").unwrap();
        assert_eq!(p.segments(), &["a", "b"]);
    }

    #[test]
    fn child_appends_a_segment() {
        let p = PathName::parse(r"\a").unwrap();
        let c = p.child("b").unwrap();
        assert_eq!(c.full_path(), r"\a\b");
    }
}
