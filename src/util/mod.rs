//! Utility functions used by the fetcher.
//!
//! - **Source resolution**: decide whether a sitemap location is fetched over
//!   HTTP(S) or read from the local filesystem, and restrict locations found
//!   inside fetched documents to HTTP(S)
//!
//! # Examples
//!
//! ```
//! use mapsite::util::{resolve_source, Source};
//!
//! match resolve_source("https://example.com/sitemap.xml").unwrap() {
//!     Source::Remote(url) => assert_eq!(url.host_str(), Some("example.com")),
//!     Source::Local(_) => unreachable!(),
//! }
//! ```

mod url_validator;

pub use url_validator::{resolve_remote, resolve_source, Source, UrlValidationError};
