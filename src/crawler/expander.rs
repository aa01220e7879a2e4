//! Crawl expansion of level-0 HTML responses

use crate::crawler::parser::AssetScanner;
use crate::url::RequestUri;

/// Scans a page body as it arrives and proposes the asset links in it
///
/// The expander keeps no copy of the body; only the scanner's tokenizer
/// state and the links not yet drained are held.
#[derive(Debug)]
pub struct CrawlExpander {
    scanner: AssetScanner,
    finalized: bool,
}

impl CrawlExpander {
    pub fn new(page: &RequestUri) -> Self {
        Self {
            scanner: AssetScanner::new(page.url()),
            finalized: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Feeds decoded body bytes and drains the links discovered so far
    ///
    /// A link is returned by the first call after the tag carrying it is
    /// complete. Feeding after finalization is ignored.
    ///
    /// # Arguments
    ///
    /// * `data` - Next piece of the decoded body
    /// * `is_final` - Whether the body ended with this piece
    pub fn feed(&mut self, data: &[u8], is_final: bool) -> Vec<String> {
        if self.finalized {
            return Vec::new();
        }

        self.scanner.push(data);
        if is_final {
            self.finalized = true;
            self.scanner.end();
        }

        let links = self.scanner.take_links();
        if !links.is_empty() {
            tracing::debug!("Found {} asset links", links.len());
        }
        links
    }
}

/// Turns a discovered link into a request URI on the page's origin
///
/// The fragment is stripped and the link parsed; unparseable links and
/// links whose scheme, host or effective port differ from the page are
/// discarded.
pub fn same_origin_candidate(page: &RequestUri, link: &str) -> Option<RequestUri> {
    let candidate = match RequestUri::parse(link) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::trace!("Discarding link {}: {}", link, e);
            return None;
        }
    };

    if !page.same_origin(&candidate) {
        tracing::trace!("Discarding cross-origin link {}", candidate);
        return None;
    }

    Some(candidate)
}
