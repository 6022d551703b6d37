//! Sitemap fetching and recursive index expansion.
//!
//! - **Fetching**: HTTP GET (or local file read) with retry, content-type
//!   gatekeeping, optional proxying and transparent gzip decoding
//! - **Extraction**: pluggable `<loc>` extraction behind [`UrlExtractor`]
//! - **Parsing**: classify each document as sitemap or index and expand
//!   indexes concurrently up to a depth ceiling
//!
//! # Architecture
//!
//! - [`fetcher`] - [`Fetcher`], the retrying transport layer
//! - [`extractor`] - [`LineExtractor`] (default) and [`XmlExtractor`]
//! - [`parser`] - [`SitemapParser`], the recursive orchestrator
//! - [`types`] - [`MapSiteResult`] and its error records
//!
//! # Example
//!
//! ```no_run
//! use mapsite::config::ParserConfig;
//! use mapsite::sitemap::SitemapParser;
//!
//! # async fn demo() -> Result<(), mapsite::config::ConfigError> {
//! let parser = SitemapParser::new(ParserConfig::default())?;
//! let result = parser.run("https://example.com/sitemap_index.xml").await;
//! for url in &result.urls {
//!     println!("{url}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod extractor;
pub mod fetcher;
pub mod parser;
pub mod types;

pub use extractor::{ExtractError, LineExtractor, UrlExtractor, XmlExtractor};
pub use fetcher::{FetchError, Fetcher, TransportError};
pub use parser::SitemapParser;
pub use types::{DocumentKind, FailureKind, MapSiteResult, SiteError};
