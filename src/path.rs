use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::BrokerError;

/// A normalized node path plus its routing classification.
///
/// Paths under `/<downstream>/<link>/...` are remote: they are answered by
/// the link's responder and `base` is the part the link itself understands.
///
/// ```
/// use dslink_broker::path::ParsedPath;
///
/// let p = ParsedPath::parse("/downstream//linkA/sensor/", "downstream").unwrap();
/// assert_eq!(p.full(), "/downstream/linkA/sensor");
/// assert!(p.is_remote());
/// assert_eq!(p.base(), "/sensor");
/// assert_eq!(p.link(), Some("linkA"));
/// ```
#[derive(Debug, Clone)]
pub struct ParsedPath {
    full: String,
    segments: Vec<String>,
    base: String,
    link: Option<String>,
    remote: bool,
}

impl ParsedPath {
    pub fn parse(raw: &str, downstream: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("path is empty"));
        }
        if raw.chars().any(char::is_control) {
            return Err(invalid("path contains control characters"));
        }
        if !raw.starts_with('/') {
            return Err(invalid("path must start with `/`"));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            if segment.trim().is_empty() || segment == "." || segment == ".." {
                return Err(invalid("path has an empty segment"));
            }
            segments.push(segment.to_string());
        }

        let full = format!("/{}", segments.join("/"));
        let in_downstream = segments.len() >= 2 && segments[0] == downstream;
        let link = in_downstream.then(|| segments[1].clone());
        let remote = in_downstream && segments.len() > 2;
        let base = if remote {
            format!("/{}", segments[2..].join("/"))
        } else {
            "/".to_string()
        };

        Ok(Self {
            full,
            segments,
            base,
            link,
            remote,
        })
    }

    /// The normalized path.
    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, or empty for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Link-relative remainder of a remote path; `/` otherwise.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Link owning this path, set for the link root and everything below it.
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
}

impl PartialEq for ParsedPath {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl Eq for ParsedPath {}

impl Hash for ParsedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn parse(raw: &str) -> Result<ParsedPath, BrokerError> {
        ParsedPath::parse(raw, "downstream")
    }

    #[test]
    fn root_is_local() {
        let p = parse("/").unwrap();
        assert!(p.is_root());
        assert_eq!(p.full(), "/");
        assert!(!p.is_remote());
        assert_eq!(p.link(), None);
    }

    #[test]
    fn collapses_repeated_and_trailing_separators() {
        let p = parse("//sys///status//").unwrap();
        assert_eq!(p.full(), "/sys/status");
        assert_eq!(p.name(), "status");
    }

    #[test]
    fn link_root_is_local_but_knows_its_link() {
        let p = parse("/downstream/linkA").unwrap();
        assert!(!p.is_remote());
        assert_eq!(p.link(), Some("linkA"));
        assert_eq!(p.base(), "/");
    }

    #[test]
    fn below_link_root_is_remote() {
        let p = parse("/downstream/linkA/sensor/temp").unwrap();
        assert!(p.is_remote());
        assert_eq!(p.base(), "/sensor/temp");
        assert_eq!(p.link(), Some("linkA"));
    }

    #[test]
    fn other_trees_are_local() {
        let p = parse("/upstream/linkA/sensor").unwrap();
        assert!(!p.is_remote());
        assert_eq!(p.link(), None);
    }

    #[test]
    fn custom_downstream_name() {
        let p = ParsedPath::parse("/conns/l/x", "conns").unwrap();
        assert!(p.is_remote());
        assert_eq!(p.base(), "/x");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse(""), Err(BrokerError::InvalidPath { .. })));
        assert!(parse("sys/status").is_err());
        assert!(parse("/sys/\u{7}bell").is_err());
        assert!(parse("/sys/ /x").is_err());
        assert!(parse("/sys/../x").is_err());
    }

    #[test]
    fn equality_is_on_normalized_form() {
        let a = parse("/downstream/linkA/x").unwrap();
        let b = parse("/downstream//linkA/x/").unwrap();
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
