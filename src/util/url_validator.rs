use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Errors that can occur while resolving a sitemap source string.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http, https or file.
    #[error("Unsupported scheme: {0} (only http/https/file allowed)")]
    UnsupportedScheme(String),
    /// A `file://` URL that does not map to a local path (e.g. has a remote host).
    #[error("Not a local file URL: {0}")]
    NotALocalPath(String),
    /// The source string was empty or whitespace.
    #[error("Empty URL")]
    Empty,
}

/// Where a sitemap document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Fetched over HTTP(S).
    Remote(Url),
    /// Read from the local filesystem.
    Local(PathBuf),
}

/// Resolves a sitemap location into a [`Source`].
///
/// Accepts `http://` and `https://` URLs, `file://` URLs, and bare
/// filesystem paths (anything that does not parse as an absolute URL).
/// Windows drive letters such as `C:\sitemap.xml` parse as a one-letter
/// scheme and are treated as paths.
///
/// # Errors
///
/// Returns [`UrlValidationError`] if:
/// - The input is empty ([`UrlValidationError::Empty`])
/// - The scheme is something other than http, https or file
///   ([`UrlValidationError::UnsupportedScheme`])
/// - A `file://` URL names a remote host ([`UrlValidationError::NotALocalPath`])
///
/// # Examples
///
/// ```
/// use mapsite::util::{resolve_source, Source};
///
/// let remote = resolve_source("https://example.com/sitemap.xml").unwrap();
/// assert!(matches!(remote, Source::Remote(_)));
///
/// let local = resolve_source("./fixtures/sitemap.xml").unwrap();
/// assert!(matches!(local, Source::Local(_)));
///
/// assert!(resolve_source("ftp://example.com/sitemap.xml").is_err());
/// ```
pub fn resolve_source(input: &str) -> Result<Source, UrlValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(Source::Local(PathBuf::from(trimmed)));
        }
        Err(e) => return Err(UrlValidationError::InvalidUrl(e)),
    };

    match url.scheme() {
        "http" | "https" => Ok(Source::Remote(url)),
        "file" => url
            .to_file_path()
            .map(Source::Local)
            .map_err(|_| UrlValidationError::NotALocalPath(trimmed.to_owned())),
        scheme if scheme.len() == 1 && cfg!(windows) => Ok(Source::Local(PathBuf::from(trimmed))),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Resolves a location found inside a fetched document.
///
/// Only absolute `http://` and `https://` URLs are accepted. Relative
/// references, bare paths and `file://` URLs are rejected so a remote
/// document can never point the fetcher at the local filesystem.
///
/// # Errors
///
/// [`UrlValidationError::Empty`], [`UrlValidationError::InvalidUrl`] for
/// relative or unparseable input, [`UrlValidationError::UnsupportedScheme`]
/// for any other scheme.
pub fn resolve_remote(input: &str) -> Result<Url, UrlValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(trimmed)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_and_https_are_remote() {
        assert!(matches!(
            resolve_source("https://example.com/sitemap.xml"),
            Ok(Source::Remote(_))
        ));
        assert!(matches!(
            resolve_source("http://localhost:8080/sitemap.xml"),
            Ok(Source::Remote(_))
        ));
    }

    #[test]
    fn test_unsupported_schemes() {
        assert!(matches!(
            resolve_source("ftp://example.com/sitemap.xml"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(resolve_source("gopher://example.com").is_err());
    }

    #[test]
    fn test_bare_path_is_local() {
        let source = resolve_source("fixtures/sitemap.xml").unwrap();
        assert_eq!(source, Source::Local(PathBuf::from("fixtures/sitemap.xml")));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_url_is_local() {
        let source = resolve_source("file:///tmp/sitemap.xml").unwrap();
        assert_eq!(source, Source::Local(PathBuf::from("/tmp/sitemap.xml")));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_path_is_local() {
        let source = resolve_source("/var/www/sitemap.xml").unwrap();
        assert_eq!(source, Source::Local(PathBuf::from("/var/www/sitemap.xml")));
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        assert!(matches!(
            resolve_source("  https://example.com/sitemap.xml\n"),
            Ok(Source::Remote(_))
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(resolve_source(""), Err(UrlValidationError::Empty)));
        assert!(matches!(resolve_source("   "), Err(UrlValidationError::Empty)));
    }

    #[test]
    fn test_broken_url_rejected() {
        assert!(matches!(
            resolve_source("http://[::1"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_remote_only_accepts_http_and_https() {
        assert!(resolve_remote("https://example.com/sitemap.xml").is_ok());
        assert!(resolve_remote("http://localhost:8080/a.xml").is_ok());
    }

    #[test]
    fn test_remote_only_rejects_local_locations() {
        assert!(matches!(
            resolve_remote("secret.xml"),
            Err(UrlValidationError::InvalidUrl(url::ParseError::RelativeUrlWithoutBase))
        ));
        assert!(matches!(
            resolve_remote("/etc/hostname"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            resolve_remote("file:///etc/hostname"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(matches!(resolve_remote(" "), Err(UrlValidationError::Empty)));
    }
}
