use crate::config::{ConfigError, ParserConfig};
use crate::sitemap::extractor::{is_index_document, LineExtractor, UrlExtractor};
use crate::sitemap::fetcher::{decode_body, Fetcher};
use crate::sitemap::types::{DocumentKind, FailureKind, MapSiteResult, SiteError};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// URL recorded against failures of a document passed to
/// [`SitemapParser::from_buffer`].
pub const BUFFER_URL: &str = "buffer";

/// Recursive sitemap walker.
///
/// Fetches a document, classifies it as a sitemap or an index, and expands
/// indexes level by level until `max_depth`. Every failure below the root is
/// recorded in [`MapSiteResult::errors`]; the public entry points never fail.
///
/// Settings are public fields. Changing them between runs is supported and
/// takes effect on the next fetch.
pub struct SitemapParser {
    /// Index levels that may be expanded below the root.
    pub max_depth: usize,
    /// Maximum in-flight child fetches per index level.
    pub concurrency: usize,
    /// Pause between batches of `concurrency` children. 0 streams children
    /// without batching.
    pub batch_pause_ms: u64,
    pub fetcher: Fetcher,
    extractor: Arc<dyn UrlExtractor>,
}

impl std::fmt::Debug for SitemapParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitemapParser")
            .field("max_depth", &self.max_depth)
            .field("concurrency", &self.concurrency)
            .field("batch_pause_ms", &self.batch_pause_ms)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl SitemapParser {
    /// Creates a parser using the [`LineExtractor`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] if `max_depth` or `max_retries` is outside
    /// 1..=10, or `concurrency` is 0.
    pub fn new(config: ParserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ParserConfig {
            max_depth,
            concurrency,
            batch_pause_ms,
            fetch,
        } = config;

        Ok(Self {
            max_depth,
            concurrency,
            batch_pause_ms,
            fetcher: Fetcher::new(fetch)?,
            extractor: Arc::new(LineExtractor),
        })
    }

    /// Replaces the URL extraction strategy.
    pub fn with_extractor(mut self, extractor: impl UrlExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Fetches `url` and walks the sitemap tree beneath it.
    ///
    /// A failure to fetch or extract the root yields a result with no URLs
    /// and a single error naming `url`.
    pub async fn run(&self, url: &str) -> MapSiteResult {
        let result = match self.fetcher.fetch(url).await {
            Ok(text) => self.walk_root(url, text).await,
            Err(err) => MapSiteResult::failed(SiteError::fetch(url, &err)),
        };
        log_summary(url, &result);
        result
    }

    /// Same as [`run`](Self::run) for a document already in memory.
    ///
    /// The bytes go through the same gzip and UTF-8 handling as a fetched
    /// body. Children of an index buffer are fetched over HTTP(S) as usual.
    pub async fn from_buffer(&self, bytes: &[u8]) -> MapSiteResult {
        let result = match decode_body(bytes, None, self.fetcher.config.max_body_bytes) {
            Ok(text) => self.walk_root(BUFFER_URL, text).await,
            Err(err) => MapSiteResult::failed(SiteError::fetch(BUFFER_URL, &err)),
        };
        log_summary(BUFFER_URL, &result);
        result
    }

    async fn walk_root(&self, url: &str, text: String) -> MapSiteResult {
        match self.classify_and_merge(url.to_owned(), text, 0).await {
            Ok(result) => result,
            Err(error) => MapSiteResult::failed(error),
        }
    }

    /// Classifies one document evaluated at `depth` and, for an index,
    /// expands its children at `depth + 1`.
    fn classify_and_merge(
        &self,
        url: String,
        text: String,
        depth: usize,
    ) -> BoxFuture<'_, Result<MapSiteResult, SiteError>> {
        async move {
            let mut result = MapSiteResult::default();
            if text.is_empty() {
                return Ok(result);
            }

            let is_index = is_index_document(&text);
            let candidates = self.extract(&url, &text)?;

            tracing::debug!(
                url = %url,
                depth = depth,
                index = is_index,
                candidates = candidates.len(),
                "Classified document"
            );

            if !is_index {
                result.urls = candidates;
                return Ok(result);
            }

            result.kind = DocumentKind::Index;
            if depth >= self.max_depth {
                tracing::warn!(url = %url, max_depth = self.max_depth, "Depth ceiling reached");
                result.errors.push(SiteError::depth_exceeded(url));
                return Ok(result);
            }

            let child_depth = depth + 1;
            result.depth = child_depth;

            for (child_url, outcome) in self.expand(candidates, child_depth).await {
                match outcome {
                    Ok(child) => result.merge(child),
                    Err(error) => {
                        tracing::warn!(
                            url = %child_url,
                            reason = %error.reason,
                            "Child sitemap failed"
                        );
                        result.errors.push(error);
                    }
                }
            }

            Ok(result)
        }
        .boxed()
    }

    /// Fetches and classifies every child of one index level. Outcomes are
    /// returned in child order regardless of completion order.
    async fn expand(
        &self,
        children: Vec<String>,
        depth: usize,
    ) -> Vec<(String, Result<MapSiteResult, SiteError>)> {
        let concurrency = self.concurrency.max(1);

        if self.batch_pause_ms == 0 {
            return stream::iter(children)
                .map(|url| self.visit_child(url, depth))
                .buffered(concurrency)
                .collect()
                .await;
        }

        let pause = Duration::from_millis(self.batch_pause_ms);
        let mut outcomes = Vec::with_capacity(children.len());
        for (i, batch) in children.chunks(concurrency).enumerate() {
            if i > 0 {
                tokio::time::sleep(pause).await;
            }
            let visits = batch.iter().map(|url| self.visit_child(url.clone(), depth));
            outcomes.extend(future::join_all(visits).await);
        }
        outcomes
    }

    async fn visit_child(
        &self,
        url: String,
        depth: usize,
    ) -> (String, Result<MapSiteResult, SiteError>) {
        let outcome = match self.fetcher.fetch_linked(&url).await {
            Ok(text) => self.classify_and_merge(url.clone(), text, depth).await,
            Err(err) => Err(SiteError::fetch(url.as_str(), &err)),
        };
        (url, outcome)
    }

    /// Runs the extractor, turning both errors and panics into a [`SiteError`].
    fn extract(&self, url: &str, text: &str) -> Result<Vec<String>, SiteError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.extractor.extract(text))) {
            Ok(Ok(urls)) => Ok(urls),
            Ok(Err(err)) => Err(SiteError::extractor(url, &err)),
            Err(payload) => Err(SiteError {
                url: url.to_owned(),
                reason: format!("Extractor panicked: {}", panic_message(payload.as_ref())),
                kind: FailureKind::Extractor,
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn log_summary(url: &str, result: &MapSiteResult) {
    tracing::info!(
        url = %url,
        kind = %result.kind,
        urls = result.urls.len(),
        errors = result.errors.len(),
        depth = result.depth,
        "Sitemap run complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::sitemap::extractor::{ExtractError, XmlExtractor};
    use crate::sitemap::types::DEPTH_EXCEEDED_REASON;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/a</loc></url>
  <url><loc>https://example.com/b</loc></url>
</urlset>"#;

    fn index_of(children: &[String]) -> String {
        let entries: String = children
            .iter()
            .map(|c| format!("<sitemap><loc>{c}</loc></sitemap>\n"))
            .collect();
        format!(
            "<?xml version=\"1.0\"?>\n<sitemapindex xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{entries}</sitemapindex>"
        )
    }

    fn parser(max_depth: usize) -> SitemapParser {
        SitemapParser::new(ParserConfig {
            max_depth,
            fetch: FetchConfig {
                max_retries: 1,
                retry_delay_ms: 0,
                ..FetchConfig::default()
            },
            ..ParserConfig::default()
        })
        .unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/xml"),
            )
            .mount(server)
            .await;
    }

    struct PanickingExtractor;

    impl UrlExtractor for PanickingExtractor {
        fn extract(&self, _text: &str) -> Result<Vec<String>, ExtractError> {
            panic!("extractor blew up");
        }
    }

    #[tokio::test]
    async fn test_empty_buffer_is_empty_sitemap() {
        let result = parser(2).from_buffer(b"").await;
        assert_eq!(result, MapSiteResult::default());
    }

    #[tokio::test]
    async fn test_buffer_sitemap() {
        let result = parser(2).from_buffer(SITEMAP.as_bytes()).await;
        assert_eq!(result.kind, DocumentKind::Sitemap);
        assert_eq!(result.urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert!(result.errors.is_empty());
        assert_eq!(result.depth, 0);
    }

    #[tokio::test]
    async fn test_index_at_ceiling_records_depth_error() {
        let mut parser = parser(1);
        parser.max_depth = 0;
        let index = index_of(&["https://example.com/child.xml".to_string()]);

        let result = parser.from_buffer(index.as_bytes()).await;
        assert_eq!(result.kind, DocumentKind::Index);
        assert!(result.urls.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].url, BUFFER_URL);
        assert_eq!(result.errors[0].reason, DEPTH_EXCEEDED_REASON);
        assert_eq!(result.errors[0].kind, FailureKind::DepthExceeded);
    }

    #[tokio::test]
    async fn test_child_kind_overwrites_index_kind() {
        let server = MockServer::start().await;
        let child = format!("{}/child.xml", server.uri());
        serve(&server, "/index.xml", index_of(&[child])).await;
        serve(&server, "/child.xml", SITEMAP.to_string()).await;

        let result = parser(1).run(&format!("{}/index.xml", server.uri())).await;
        assert_eq!(result.kind, DocumentKind::Sitemap);
        assert_eq!(result.urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert!(result.errors.is_empty());
        assert_eq!(result.depth, 1);
    }

    #[tokio::test]
    async fn test_child_failures_do_not_abort_siblings() {
        let server = MockServer::start().await;
        let good = format!("{}/good.xml", server.uri());
        let missing = format!("{}/missing.xml", server.uri());
        serve(&server, "/index.xml", index_of(&[missing.clone(), good])).await;
        serve(&server, "/good.xml", SITEMAP.to_string()).await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let result = parser(2).run(&format!("{}/index.xml", server.uri())).await;
        assert_eq!(result.urls.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].url, missing);
        assert_eq!(result.errors[0].kind, FailureKind::Transport);
        // Failed child never classified; last classified document was the good sitemap
        assert_eq!(result.kind, DocumentKind::Sitemap);
    }

    #[tokio::test]
    async fn test_children_never_resolve_to_local_files() {
        let dir = std::env::temp_dir().join("mapsite_parser_test_local_child");
        std::fs::create_dir_all(&dir).unwrap();
        let secret = dir.join("secret.xml");
        std::fs::write(
            &secret,
            "<urlset><url><loc>https://leaked.example/</loc></url></urlset>",
        )
        .unwrap();
        let secret_path = secret.to_str().unwrap().to_string();
        let secret_file_url = format!("file://{secret_path}");

        let server = MockServer::start().await;
        let good = format!("{}/good.xml", server.uri());
        let listed = vec![
            "secret.xml".to_string(),
            "/etc/hostname".to_string(),
            secret_path.clone(),
            secret_file_url.clone(),
            good,
        ];
        serve(&server, "/index.xml", index_of(&listed)).await;
        serve(&server, "/good.xml", SITEMAP.to_string()).await;

        let result = parser(1).run(&format!("{}/index.xml", server.uri())).await;
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(result.urls, vec!["https://example.com/a", "https://example.com/b"]);
        let failed: Vec<&str> = result.errors.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            failed,
            vec![
                "secret.xml",
                "/etc/hostname",
                secret_path.as_str(),
                secret_file_url.as_str(),
            ]
        );
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == FailureKind::InvalidUrl));
    }

    #[tokio::test]
    async fn test_root_fetch_failure_is_single_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = format!("{}/sitemap.xml", server.uri());
        let result = parser(2).run(&url).await;
        assert_eq!(result.kind, DocumentKind::Sitemap);
        assert!(result.urls.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].url, url);
        assert_eq!(result.errors[0].kind, FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_extractor_panic_is_caught() {
        let parser = parser(2).with_extractor(PanickingExtractor);
        let result = parser.from_buffer(SITEMAP.as_bytes()).await;

        assert!(result.urls.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, FailureKind::Extractor);
        assert!(result.errors[0].reason.contains("extractor blew up"));
    }

    #[tokio::test]
    async fn test_extractor_error_is_recorded() {
        let parser = parser(2).with_extractor(XmlExtractor);
        let result = parser.from_buffer(b"<urlset><url><loc>x</url></urlset>").await;

        assert!(result.urls.is_empty());
        assert_eq!(result.errors[0].kind, FailureKind::Extractor);
        assert_eq!(result.errors[0].url, BUFFER_URL);
    }

    #[tokio::test]
    async fn test_undecodable_buffer_is_single_error() {
        let result = parser(2).from_buffer(&[0x1f, 0x8b, 0xff]).await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].kind, FailureKind::Decode);
    }

    #[tokio::test]
    async fn test_batched_expansion_keeps_child_order() {
        let server = MockServer::start().await;
        let mut children = Vec::new();
        for i in 0..5 {
            let route = format!("/child{i}.xml");
            children.push(format!("{}{}", server.uri(), route));
            let body = format!("<urlset><url><loc>https://example.com/{i}</loc></url></urlset>");
            serve(&server, &route, body).await;
        }
        serve(&server, "/index.xml", index_of(&children)).await;

        let mut parser = parser(1);
        parser.concurrency = 2;
        parser.batch_pause_ms = 1;

        let result = parser.run(&format!("{}/index.xml", server.uri())).await;
        let expected: Vec<String> = (0..5).map(|i| format!("https://example.com/{i}")).collect();
        assert_eq!(result.urls, expected);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_new_rejects_out_of_range_depth() {
        let config = ParserConfig {
            max_depth: 0,
            ..ParserConfig::default()
        };
        assert!(matches!(
            SitemapParser::new(config),
            Err(ConfigError::OutOfRange {
                field: "max_depth",
                ..
            })
        ));
    }
}
