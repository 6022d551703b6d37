use crate::config::{ConfigError, FetchConfig};
use crate::util::{resolve_remote, resolve_source, Source};
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MIME types accepted when `validate_content_type` is on. Matched by
/// substring so `; charset=...` suffixes pass.
pub const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "text/xml",
    "application/xml",
    "application/rss+xml",
    "application/gzip",
    "application/x-gzip",
];

const MAX_REDIRECTS: usize = 5;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const UTF8_BOM: &str = "\u{feff}";

/// Low-level failure of a single attempt. Every variant is retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// Connect, header or body read exceeded `timeout_ms`
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Local file could not be read
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if is_timeout(&err) {
            TransportError::Timeout
        } else {
            TransportError::Network(err)
        }
    }
}

/// Read timeouts can surface as an `io::ErrorKind::TimedOut` buried in the
/// source chain rather than through `reqwest::Error::is_timeout`.
fn is_timeout(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if inner
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut)
        {
            return true;
        }
        source = inner.source();
    }
    false
}

/// Errors returned by [`Fetcher::fetch`].
///
/// Only [`FetchError::Transport`] is the result of retrying; everything else
/// fails on first sight.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed; carries the last failure.
    #[error("{source} (after {attempts} attempt(s))")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// `Content-Type` not on the allow-list while validation is enabled
    #[error("Response rejected, invalid \"Content-Type\" header: {0}.")]
    ContentTypeRejected(String),
    /// Decompression or UTF-8 decoding failed
    #[error("Failed to decode response body: {0}")]
    Decode(String),
    /// Body (raw or decompressed) exceeded `max_body_bytes`
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
    /// Location could not be resolved to an HTTP(S) URL or a local path
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// HTTP client could not be built (usually a malformed proxy URI)
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Attempt bookkeeping for one logical fetch. Never shared between calls.
#[derive(Debug)]
struct FetchSession {
    attempts: u32,
}

impl FetchSession {
    fn new() -> Self {
        Self { attempts: 0 }
    }

    fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Outcome of one attempt that did not produce a body.
enum AttemptError {
    Retry(TransportError),
    Fail(FetchError),
}

impl From<TransportError> for AttemptError {
    fn from(err: TransportError) -> Self {
        AttemptError::Retry(err)
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        AttemptError::Retry(err.into())
    }
}

struct CachedClient {
    timeout_ms: u64,
    proxy: Option<String>,
    client: reqwest::Client,
}

/// Fetches one sitemap document as text.
///
/// `config` is public: changes apply to the next [`fetch`](Fetcher::fetch).
/// The underlying `reqwest::Client` is reused across calls and rebuilt only
/// when the timeout or proxy changes.
pub struct Fetcher {
    pub config: FetchConfig,
    client: Mutex<Option<CachedClient>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self {
            config: FetchConfig::default(),
            client: Mutex::new(None),
        }
    }
}

impl Fetcher {
    /// Creates a fetcher after checking `max_retries` is within 1..=10.
    pub fn new(config: FetchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            client: Mutex::new(None),
        })
    }

    /// Fetches `location` and returns the decoded document text.
    ///
    /// `location` may be an `http(s)://` URL, a `file://` URL or a bare path.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Transport`] - connection failure, timeout or non-2xx
    ///   status on every one of the `max_retries + 1` attempts
    /// - [`FetchError::ContentTypeRejected`] - disallowed `Content-Type`
    /// - [`FetchError::Decode`] - corrupt gzip payload or invalid UTF-8
    /// - [`FetchError::TooLarge`] - body over `max_body_bytes`
    /// - [`FetchError::InvalidUrl`] - unparseable location or unsupported scheme
    /// - [`FetchError::Client`] - the proxy URI is malformed
    pub async fn fetch(&self, location: &str) -> Result<String, FetchError> {
        let source = resolve_source(location).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        match source {
            Source::Remote(url) => self.fetch_remote(url).await,
            Source::Local(path) => self.read_local(&path).await,
        }
    }

    /// Fetches a location listed inside another document.
    ///
    /// Unlike [`fetch`](Fetcher::fetch), only absolute `http(s)://` URLs are
    /// followed; relative references, bare paths and `file://` URLs fail with
    /// [`FetchError::InvalidUrl`] before any I/O.
    pub async fn fetch_linked(&self, location: &str) -> Result<String, FetchError> {
        let url = resolve_remote(location).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        self.fetch_remote(url).await
    }

    async fn fetch_remote(&self, url: Url) -> Result<String, FetchError> {
        let client = self.client()?;
        let max_retries = self.config.max_retries;
        let mut session = FetchSession::new();

        let (content_type, bytes) = loop {
            let attempt = session.begin_attempt();
            tracing::debug!(url = %url, attempt = attempt, "Fetching sitemap");

            match self.attempt(&client, &url).await {
                Ok(payload) => break payload,
                Err(AttemptError::Fail(err)) => return Err(err),
                Err(AttemptError::Retry(err)) => {
                    if session.retries_used() >= max_retries {
                        return Err(FetchError::Transport {
                            attempts: session.attempts,
                            source: err,
                        });
                    }

                    let delay_ms = self.config.retry_delay_ms.saturating_mul(u64::from(attempt));
                    tracing::warn!(
                        url = %url,
                        error = %err,
                        attempt = attempt,
                        delay_ms = delay_ms,
                        "Fetch failed, retrying"
                    );
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        };

        decode_body(&bytes, content_type.as_deref(), self.config.max_body_bytes)
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        url: &Url,
    ) -> Result<(Option<String>, Vec<u8>), AttemptError> {
        let mut request = client
            .get(url.clone())
            .header(USER_AGENT, self.config.user_agent.as_str());
        if self.config.validate_content_type {
            request = request.header(ACCEPT, ALLOWED_CONTENT_TYPES.join(", "));
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()).into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        // Policy failure: checked before the body is downloaded and never retried
        if self.config.validate_content_type {
            let declared = content_type.as_deref().unwrap_or("");
            if !is_allowed_content_type(declared) {
                return Err(AttemptError::Fail(FetchError::ContentTypeRejected(
                    content_type.unwrap_or_else(|| "<missing>".to_string()),
                )));
            }
        }

        let bytes = read_limited_bytes(response, self.config.max_body_bytes).await?;
        Ok((content_type, bytes))
    }

    /// Reads a local sitemap. No retries and no content-type check; a `.gz`
    /// extension or gzip magic bytes trigger decompression.
    async fn read_local(&self, path: &Path) -> Result<String, FetchError> {
        let limit = self.config.max_body_bytes;
        let io_failure = |e: std::io::Error| FetchError::Transport {
            attempts: 1,
            source: TransportError::Io(e),
        };

        let meta = tokio::fs::metadata(path).await.map_err(io_failure)?;
        if meta.len() > limit as u64 {
            return Err(FetchError::TooLarge(limit));
        }
        let bytes = tokio::fs::read(path).await.map_err(io_failure)?;

        let declared = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
            .then_some("application/gzip");

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Read local sitemap");
        decode_body(&bytes, declared, limit)
    }

    fn client(&self) -> Result<reqwest::Client, FetchError> {
        let timeout_ms = self.config.timeout_ms;
        let proxy = self.config.proxy();

        let mut cached = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = cached.as_ref() {
            if c.timeout_ms == timeout_ms && c.proxy.as_deref() == proxy {
                return Ok(c.client.clone());
            }
        }

        let client = build_client(timeout_ms, proxy)?;
        *cached = Some(CachedClient {
            timeout_ms,
            proxy: proxy.map(str::to_owned),
            client: client.clone(),
        });
        Ok(client)
    }
}

fn build_client(timeout_ms: u64, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
    let timeout = Duration::from_millis(timeout_ms);
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    builder = match proxy {
        // Sitemap proxies commonly terminate TLS themselves
        Some(uri) => builder
            .proxy(reqwest::Proxy::all(uri).map_err(FetchError::Client)?)
            .danger_accept_invalid_certs(true),
        None => builder.no_proxy(),
    };

    builder.build().map_err(FetchError::Client)
}

/// Returns true when `content_type` contains one of [`ALLOWED_CONTENT_TYPES`]
/// (case-insensitive).
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| lowered.contains(allowed))
}

/// Some servers label gzip payloads as `application/zip`.
fn declares_compression(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("gzip") || lowered.contains("zip")
}

/// Turns a raw body into document text.
///
/// Decompresses when the body starts with the gzip magic bytes, or when
/// `content_type` declares a compressed payload and the body does not already
/// look like markup. The result is UTF-8 decoded with any leading BOM dropped.
///
/// # Errors
///
/// [`FetchError::Decode`] for corrupt gzip or invalid UTF-8,
/// [`FetchError::TooLarge`] when the decompressed size exceeds `limit`.
pub fn decode_body(
    bytes: &[u8],
    content_type: Option<&str>,
    limit: usize,
) -> Result<String, FetchError> {
    if bytes.is_empty() {
        return Ok(String::new());
    }

    let has_magic = bytes.starts_with(&GZIP_MAGIC);
    let declared = content_type.is_some_and(declares_compression);

    let raw = if has_magic || (declared && !looks_like_markup(bytes)) {
        gunzip(bytes, limit)?
    } else {
        if bytes.len() > limit {
            return Err(FetchError::TooLarge(limit));
        }
        bytes.to_vec()
    };

    let text = String::from_utf8(raw)
        .map_err(|e| FetchError::Decode(format!("invalid UTF-8: {e}")))?;

    Ok(match text.strip_prefix(UTF8_BOM) {
        Some(stripped) => stripped.to_owned(),
        None => text,
    })
}

fn looks_like_markup(bytes: &[u8]) -> bool {
    let start = bytes
        .strip_prefix(UTF8_BOM.as_bytes())
        .unwrap_or(bytes)
        .iter()
        .find(|b| !b.is_ascii_whitespace());
    start == Some(&b'<')
}

fn gunzip(bytes: &[u8], limit: usize) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::new();
    // Read one byte past the limit to detect oversize output without inflating all of it
    GzDecoder::new(bytes)
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| FetchError::Decode(format!("gzip: {e}")))?;

    if out.len() > limit {
        return Err(FetchError::TooLarge(limit));
    }
    Ok(out)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, AttemptError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(AttemptError::Fail(FetchError::TooLarge(limit)));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(AttemptError::Fail(FetchError::TooLarge(limit)));
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: a connection dropped mid-body is retried like any other transport failure
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            }
            .into());
        }
    }

    Ok(bytes)
}
