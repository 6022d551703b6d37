//! Fetch a sitemap or sitemap index and flatten it into one URL inventory.
//!
//! See [`sitemap::SitemapParser`] for the entry point.

pub mod config;
pub mod sitemap;
pub mod util;
