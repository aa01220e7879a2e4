//! Same-origin asset crawl
//!
//! This module contains:
//! - Incremental HTML asset link extraction (stylesheets, images, scripts)
//! - `CrawlExpander`, attached to level-0 responses when crawling is enabled
//! - The same-origin filter applied to every discovered link

mod expander;
mod parser;

pub use expander::{same_origin_candidate, CrawlExpander};
pub use parser::{extract_asset_links, AssetScanner};
