// file: src/ingest/resolver.rs
// description: origin classification of references via an ordered rule table
// reference: configurable host-based classification

use crate::models::SourceKind;
use url::Url;

#[derive(Debug, Clone)]
pub struct ResolverRule {
    pub host_suffixes: Vec<String>,
    /// Extra path fragment the reference must contain to match.
    pub path_marker: Option<String>,
    pub kind: SourceKind,
}

impl ResolverRule {
    pub fn new(host_suffixes: &[&str], kind: SourceKind) -> Self {
        Self {
            host_suffixes: host_suffixes.iter().map(|s| s.to_string()).collect(),
            path_marker: None,
            kind,
        }
    }

    pub fn with_path_marker(mut self, marker: &str) -> Self {
        self.path_marker = Some(marker.to_string());
        self
    }

    fn matches(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host.to_lowercase(),
            None => return false,
        };

        let host_matches = self
            .host_suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)));

        host_matches
            && self
                .path_marker
                .as_ref()
                .is_none_or(|marker| url.path().contains(marker.as_str()))
    }
}

pub struct SourceResolver {
    rules: Vec<ResolverRule>,
}

impl SourceResolver {
    pub fn new(rules: Vec<ResolverRule>) -> Self {
        Self { rules }
    }

    /// Rules are tried in order. The first match wins.
    pub fn insert_rule(&mut self, position: usize, rule: ResolverRule) {
        let position = position.min(self.rules.len());
        self.rules.insert(position, rule);
    }

    pub fn resolve(&self, reference: &str) -> SourceKind {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self
                .rules
                .iter()
                .find(|rule| rule.matches(&url))
                .map(|rule| rule.kind)
                .unwrap_or(SourceKind::GenericHttp),
            _ => SourceKind::LocalFile,
        }
    }
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new(vec![
            ResolverRule::new(&["box.com", "boxcloud.com"], SourceKind::Box),
            ResolverRule::new(&["sharepoint.com"], SourceKind::Sharepoint),
            ResolverRule::new(&["onedrive.live.com", "1drv.ms"], SourceKind::Onedrive),
            ResolverRule::new(
                &["drive.google.com", "docs.google.com"],
                SourceKind::GoogleDrive,
            ),
            ResolverRule::new(&["dropbox.com"], SourceKind::Dropbox),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let resolver = SourceResolver::default();

        assert_eq!(resolver.resolve("https://app.box.com/s/abc123"), SourceKind::Box);
        assert_eq!(resolver.resolve("https://box.com/s/abc123"), SourceKind::Box);
        assert_eq!(
            resolver.resolve("https://contoso.sharepoint.com/:b:/r/sites/x/doc.pdf"),
            SourceKind::Sharepoint
        );
        assert_eq!(resolver.resolve("https://1drv.ms/b/s!abc"), SourceKind::Onedrive);
        assert_eq!(
            resolver.resolve("https://drive.google.com/file/d/XYZ/view"),
            SourceKind::GoogleDrive
        );
        assert_eq!(
            resolver.resolve("https://www.dropbox.com/s/k/file.pdf?dl=0"),
            SourceKind::Dropbox
        );
        assert_eq!(
            resolver.resolve("https://example.org/report.pdf"),
            SourceKind::GenericHttp
        );
    }

    #[test]
    fn test_lookalike_host_is_generic() {
        let resolver = SourceResolver::default();
        assert_eq!(
            resolver.resolve("https://notbox.com/s/abc"),
            SourceKind::GenericHttp
        );
    }

    #[test]
    fn test_local_references() {
        let resolver = SourceResolver::default();
        assert_eq!(resolver.resolve("file:///tmp/a.pdf"), SourceKind::LocalFile);
        assert_eq!(resolver.resolve("/tmp/a.pdf"), SourceKind::LocalFile);
    }

    #[test]
    fn test_inserted_rule_takes_priority() {
        let mut resolver = SourceResolver::default();
        resolver.insert_rule(
            0,
            ResolverRule::new(&["example.org"], SourceKind::Dropbox).with_path_marker("/share/"),
        );

        assert_eq!(
            resolver.resolve("https://example.org/share/x"),
            SourceKind::Dropbox
        );
        assert_eq!(
            resolver.resolve("https://example.org/other"),
            SourceKind::GenericHttp
        );
    }
}
