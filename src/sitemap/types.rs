use crate::sitemap::extractor::ExtractError;
use crate::sitemap::fetcher::FetchError;
use serde::Serialize;

/// Error reason recorded when an index sits at the depth ceiling.
pub const DEPTH_EXCEEDED_REASON: &str = "Maximum recursive depth reached, more sites available.";

/// Classification of a single fetched document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Leaf document listing page URLs
    #[default]
    Sitemap,
    /// Document listing further sitemap URLs
    Index,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Sitemap => write!(f, "sitemap"),
            DocumentKind::Index => write!(f, "index"),
        }
    }
}

/// What went wrong for one URL in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    ContentTypeRejected,
    Decode,
    TooLarge,
    InvalidUrl,
    Client,
    DepthExceeded,
    Extractor,
}

impl From<&FetchError> for FailureKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Transport { .. } => FailureKind::Transport,
            FetchError::ContentTypeRejected(_) => FailureKind::ContentTypeRejected,
            FetchError::Decode(_) => FailureKind::Decode,
            FetchError::TooLarge(_) => FailureKind::TooLarge,
            FetchError::InvalidUrl(_) => FailureKind::InvalidUrl,
            FetchError::Client(_) => FailureKind::Client,
        }
    }
}

/// A failure recorded against one URL; never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteError {
    pub url: String,
    pub reason: String,
    pub kind: FailureKind,
}

impl SiteError {
    pub fn fetch(url: impl Into<String>, err: &FetchError) -> Self {
        Self {
            url: url.into(),
            reason: err.to_string(),
            kind: FailureKind::from(err),
        }
    }

    pub fn extractor(url: impl Into<String>, err: &ExtractError) -> Self {
        Self {
            url: url.into(),
            reason: err.to_string(),
            kind: FailureKind::Extractor,
        }
    }

    pub fn depth_exceeded(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: DEPTH_EXCEEDED_REASON.to_string(),
            kind: FailureKind::DepthExceeded,
        }
    }
}

/// Flattened outcome of one sitemap run.
///
/// `urls` holds page URLs from documents classified as [`DocumentKind::Sitemap`]
/// only; index URLs never appear in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapSiteResult {
    /// Classification of the last successfully classified document, in
    /// depth-first document order. For a plain sitemap this is the root.
    pub kind: DocumentKind,
    pub urls: Vec<String>,
    pub errors: Vec<SiteError>,
    /// Deepest index level expanded (0 when no index was expanded).
    pub depth: usize,
}

impl MapSiteResult {
    /// Result for a run whose root document could not be processed.
    pub fn failed(error: SiteError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    /// Folds a child's result into this one. The child's kind overwrites ours.
    pub(crate) fn merge(&mut self, child: MapSiteResult) {
        self.kind = child.kind;
        self.urls.extend(child.urls);
        self.errors.extend(child.errors);
        self.depth = self.depth.max(child.depth);
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_lowercase_kind() {
        let result = MapSiteResult {
            kind: DocumentKind::Index,
            urls: vec![],
            errors: vec![SiteError::depth_exceeded("https://example.com/index.xml")],
            depth: 0,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "index");
        assert_eq!(json["errors"][0]["kind"], "depth_exceeded");
        assert_eq!(json["errors"][0]["reason"], DEPTH_EXCEEDED_REASON);
    }

    #[test]
    fn test_merge_takes_child_kind_and_appends() {
        let mut parent = MapSiteResult {
            kind: DocumentKind::Index,
            depth: 1,
            ..MapSiteResult::default()
        };
        parent.merge(MapSiteResult {
            kind: DocumentKind::Sitemap,
            urls: vec!["https://example.com/a".into()],
            errors: vec![],
            depth: 0,
        });

        assert_eq!(parent.kind, DocumentKind::Sitemap);
        assert_eq!(parent.urls, vec!["https://example.com/a"]);
        assert_eq!(parent.depth, 1);
    }

    #[test]
    fn test_failed_defaults_to_sitemap() {
        let err = FetchError::ContentTypeRejected("text/html".into());
        let result = MapSiteResult::failed(SiteError::fetch("https://example.com/", &err));

        assert_eq!(result.kind, DocumentKind::Sitemap);
        assert!(result.urls.is_empty());
        assert_eq!(result.errors[0].kind, FailureKind::ContentTypeRejected);
        assert_eq!(
            result.errors[0].reason,
            "Response rejected, invalid \"Content-Type\" header: text/html."
        );
    }
}
