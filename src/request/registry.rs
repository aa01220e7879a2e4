//! Request registry: owning arena, stream index and dedup set
//!
//! The registry owns every request record for the lifetime of a session.
//! The stream index only maps live stream ids to request handles and never
//! participates in ownership.

use crate::request::{BodySource, Request, RequestId, StreamId};
use crate::url::RequestUri;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of [`RequestRegistry::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// A new record was appended
    Accepted(RequestId),
    /// The URI was already enqueued (default mode only)
    Duplicate,
}

/// Owns the pending, in-flight and completed requests of one session
#[derive(Debug, Default)]
pub struct RequestRegistry {
    /// Request records in enqueue order
    requests: Vec<Request>,

    /// Live stream id -> request handle
    streams: HashMap<StreamId, RequestId>,

    /// Normalized URIs already enqueued; stays empty in multiply mode
    seen: HashSet<String>,

    /// Whether duplicate URIs are rejected
    dedup: bool,

    /// Number of closed streams
    completed: usize,
}

impl RequestRegistry {
    /// Creates an empty registry
    ///
    /// # Arguments
    ///
    /// * `dedup` - Reject URIs already enqueued; `false` in multiply mode
    pub fn new(dedup: bool) -> Self {
        Self {
            dedup,
            ..Self::default()
        }
    }

    /// Appends a new request unless its URI is a duplicate
    ///
    /// # Arguments
    ///
    /// * `uri` - Normalized request URI
    /// * `body` - Body source, for POST requests
    /// * `level` - Crawl depth of the request
    pub fn enqueue(
        &mut self,
        uri: RequestUri,
        body: Option<Arc<BodySource>>,
        level: u32,
    ) -> Enqueue {
        if self.dedup {
            if self.seen.contains(uri.as_str()) {
                return Enqueue::Duplicate;
            }
            self.seen.insert(uri.as_str().to_string());
        }

        let id = RequestId(self.requests.len());
        self.requests.push(Request::new(uri, body, level));
        Enqueue::Accepted(id)
    }

    /// Records that `stream` now carries request `id`
    ///
    /// Returns false (and changes nothing) if the stream is already live or
    /// the request was bound before.
    pub fn bind(&mut self, stream: StreamId, id: RequestId) -> bool {
        if self.streams.contains_key(&stream) {
            tracing::warn!("Stream {} is already bound", stream);
            return false;
        }
        let Some(request) = self.requests.get_mut(id.0) else {
            tracing::warn!("Cannot bind stream {} to unknown request {}", stream, id);
            return false;
        };
        if request.stream.is_some() {
            tracing::warn!("Request {} is already bound", id);
            return false;
        }

        request.stream = Some(stream);
        self.streams.insert(stream, id);
        true
    }

    /// Looks up the request carried by a live stream
    ///
    /// Unknown and closed streams (e.g. server push) give `None`.
    pub fn lookup(&self, stream: StreamId) -> Option<RequestId> {
        self.streams.get(&stream).copied()
    }

    /// Records the closure of a stream
    ///
    /// Removes the stream from the index and increments the completed
    /// counter. Returns the request the stream carried, or `None` for a
    /// stream that was never bound (in which case nothing is counted).
    pub fn mark_complete(&mut self, stream: StreamId) -> Option<RequestId> {
        let id = self.streams.remove(&stream)?;
        self.completed += 1;
        Some(id)
    }

    /// Returns true when every enqueued request has closed
    pub fn all_complete(&self) -> bool {
        self.completed == self.requests.len()
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(id.0)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.requests.get_mut(id.0)
    }

    /// Handles of every request, in enqueue order
    pub fn ids(&self) -> impl Iterator<Item = RequestId> {
        (0..self.requests.len()).map(RequestId)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    /// Total number of enqueued requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Number of closed streams
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Number of streams currently live
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }
}
