//! Request records and their bookkeeping
//!
//! This module contains:
//! - `Request`: one request record with its attached decoder/expander state
//! - `RequestRegistry`: the owning arena, stream index and dedup set
//! - `HeaderList`: the ordered header builder used at submission
//! - `BodySource`/`BodyReader`: pull-based request bodies

mod body;
mod headers;
mod registry;

pub use body::{BodyRead, BodyReader, BodySource};
pub use headers::{build_request_headers, HeaderField, HeaderList, USER_AGENT};
pub use registry::{Enqueue, RequestRegistry};

use crate::crawler::CrawlExpander;
use crate::decode::DecodePipeline;
use crate::output::RequestTiming;
use crate::url::RequestUri;
use std::fmt;
use std::sync::Arc;

/// Stable handle of a request inside its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(usize);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

/// Protocol-assigned stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One request and everything attached to it over its lifetime
///
/// Owned exclusively by a [`RequestRegistry`]; everything else refers to it
/// through its [`RequestId`] or the [`StreamId`] it was bound to.
#[derive(Debug)]
pub struct Request {
    /// Normalized URI (fragment stripped)
    pub uri: RequestUri,

    /// Crawl depth: 0 for user-supplied URIs
    pub level: u32,

    /// Body source for POST requests
    pub body: Option<Arc<BodySource>>,

    /// Stream the request was bound to, once the engine opened it
    pub stream: Option<StreamId>,

    /// Response `:status`
    pub status: Option<u16>,

    /// Inflater, attached when the response announced a compressed body
    pub decoder: Option<DecodePipeline>,

    /// Link extractor, attached for level-0 responses when crawling
    pub expander: Option<CrawlExpander>,

    /// Set once a decode failure reset the stream
    pub reset: bool,

    /// Lifecycle timestamps
    pub timing: RequestTiming,
}

impl Request {
    pub fn new(uri: RequestUri, body: Option<Arc<BodySource>>, level: u32) -> Self {
        Self {
            uri,
            level,
            body,
            stream: None,
            status: None,
            decoder: None,
            expander: None,
            reset: false,
            timing: RequestTiming::default(),
        }
    }

    /// HTTP method implied by the presence of a body
    pub fn method(&self) -> &'static str {
        if self.body.is_some() {
            "POST"
        } else {
            "GET"
        }
    }

    /// Total body length, if any
    pub fn body_len(&self) -> Option<u64> {
        self.body.as_ref().map(|b| b.len())
    }
}
