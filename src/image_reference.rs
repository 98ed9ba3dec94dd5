use serde::Serialize;
use std::fmt;

/// A container image split into its location and its tag.
///
/// `url` is everything that identifies the image without its tag, including a
/// registry `host:port` prefix when present. An empty `tag` means the tag is
/// unknown and must not be offered as a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub url: String,
    pub tag: String,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}:{}", self.url, self.tag)
        }
    }
}

impl ImageReference {
    pub fn new(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tag: tag.into(),
        }
    }

    /// Parses `[host[:port]/]repo/path[:tag][@digest]`.
    ///
    /// Only a colon after the last `/` separates the tag, so the port of a
    /// registry host is never mistaken for one. A digest suffix is dropped.
    pub fn parse(s: &str) -> Self {
        let name = s.split_once('@').map_or(s, |(name, _digest)| name);

        if let Some(pos) = name.rfind(':') {
            let last_slash = name.rfind('/');
            if last_slash.is_none_or(|slash| pos > slash) {
                return Self::new(&name[..pos], &name[pos + 1..]);
            }
        }

        Self::new(name, "")
    }

    pub fn has_tag(&self) -> bool {
        !self.tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_with_port() {
        let reference = ImageReference::parse("host:5000/repo/app:v1.2.3");
        assert_eq!(reference.url, "host:5000/repo/app");
        assert_eq!(reference.tag, "v1.2.3");
    }

    #[test]
    fn test_parse_without_registry() {
        let reference = ImageReference::parse("repo/app:v1.2.3");
        assert_eq!(reference.url, "repo/app");
        assert_eq!(reference.tag, "v1.2.3");
    }

    #[test]
    fn test_parse_single_segment() {
        let reference = ImageReference::parse("nginx:1.27");
        assert_eq!(reference, ImageReference::new("nginx", "1.27"));
    }

    #[test]
    fn test_parse_port_without_tag() {
        let reference = ImageReference::parse("host:5000/repo/app");
        assert_eq!(reference.url, "host:5000/repo/app");
        assert_eq!(reference.tag, "");
        assert!(!reference.has_tag());
    }

    #[test]
    fn test_parse_no_tag() {
        let reference = ImageReference::parse("docker.io/library/busybox");
        assert_eq!(reference.url, "docker.io/library/busybox");
        assert!(!reference.has_tag());
    }

    #[test]
    fn test_parse_drops_digest() {
        let reference = ImageReference::parse("ghcr.io/org/app:v2@sha256:0123abcd");
        assert_eq!(reference, ImageReference::new("ghcr.io/org/app", "v2"));

        let pinned = ImageReference::parse("ghcr.io/org/app@sha256:0123abcd");
        assert_eq!(pinned, ImageReference::new("ghcr.io/org/app", ""));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ImageReference::new("host:5000/app", "v1").to_string(),
            "host:5000/app:v1"
        );
        assert_eq!(ImageReference::new("host:5000/app", "").to_string(), "host:5000/app");
    }
}
