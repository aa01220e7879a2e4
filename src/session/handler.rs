//! Event dispatch for one session
//!
//! `SessionHandler` owns the request registry and timing state of a session
//! and reacts to protocol engine events. It never touches the network, so
//! it can be driven by any [`Engine`].

use crate::config::Config;
use crate::crawler::{same_origin_candidate, CrawlExpander};
use crate::decode::{ContentEncoding, DecodePipeline};
use crate::engine::{Engine, EngineEvent, ErrorCode, ReceivedFrame, SentFrame, Settings};
use crate::output::{RequestReport, StatsRecorder};
use crate::request::{
    build_request_headers, BodyReader, BodySource, Enqueue, HeaderList, RequestId,
    RequestRegistry, StreamId,
};
use crate::url::RequestUri;
use crate::Result;
use bytes::Bytes;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

/// What the session should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Every request completed and GOAWAY was requested
    Shutdown,
}

/// Synchronous core of a connection session
#[derive(Debug)]
pub struct SessionHandler<'a> {
    config: &'a Config,
    registry: RequestRegistry,
    stats: StatsRecorder,
}

impl<'a> SessionHandler<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            registry: RequestRegistry::new(config.dedup_enabled()),
            stats: StatsRecorder::new(),
        }
    }

    /// Adds a request to submit once connected
    pub fn enqueue(
        &mut self,
        uri: RequestUri,
        body: Option<Arc<BodySource>>,
        level: u32,
    ) -> Enqueue {
        self.registry.enqueue(uri, body, level)
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Handles the transport becoming ready
    ///
    /// Records the handshake time, submits the initial settings and then
    /// every queued request in enqueue order.
    pub fn on_connected<E: Engine>(&mut self, engine: &mut E, at: Instant) -> Result<Flow> {
        self.stats.record_handshake(at);
        engine.submit_settings(&Settings::from_config(self.config))?;

        let ids: Vec<RequestId> = self.registry.ids().collect();
        for id in ids {
            self.submit(engine, id)?;
        }

        self.shutdown_if_complete(engine)
    }

    /// Dispatches one engine event
    ///
    /// Events for streams without a request (server push, already closed
    /// streams) are ignored.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine that produced the event
    /// * `event` - The event
    /// * `out` - Sink for decoded response bodies
    pub fn on_event<E: Engine, W: Write>(
        &mut self,
        engine: &mut E,
        event: EngineEvent,
        out: &mut W,
    ) -> Result<Flow> {
        match event {
            EngineEvent::FrameSent(frame) => {
                self.on_frame_sent(frame);
                Ok(Flow::Continue)
            }
            EngineEvent::FrameReceived(ReceivedFrame::ResponseHeaders {
                stream,
                fields,
                end_stream,
            }) => {
                self.on_response_headers(stream, &fields, end_stream);
                Ok(Flow::Continue)
            }
            EngineEvent::FrameReceived(ReceivedFrame::Trailers { stream, fields }) => {
                tracing::debug!("Received trailers on stream {}", stream);
                trace_fields(stream, &fields);
                Ok(Flow::Continue)
            }
            EngineEvent::BodyChunk { stream, data } => {
                self.on_body_chunk(engine, stream, data, out)?;
                Ok(Flow::Continue)
            }
            EngineEvent::StreamClosed { stream, code } => {
                self.on_stream_closed(engine, stream, code, out)
            }
        }
    }

    /// Per-request results for reporting
    pub fn report(&self) -> Vec<RequestReport> {
        self.registry
            .iter()
            .map(|request| RequestReport {
                uri: request.uri.to_string(),
                level: request.level,
                status: request.status,
                timing: self.stats.report(&request.timing),
                completed: request.timing.complete.is_some(),
            })
            .collect()
    }

    fn submit<E: Engine>(&mut self, engine: &mut E, id: RequestId) -> Result<()> {
        let Some(request) = self.registry.get(id) else {
            return Ok(());
        };

        let headers = build_request_headers(&request.uri, request.body_len(), &self.config.headers);
        let body = request.body.clone().map(BodyReader::new);
        tracing::debug!("Submitting {} {} (level {})", request.method(), request.uri, request.level);

        engine.submit_request(id, headers, body)?;
        Ok(())
    }

    fn on_frame_sent(&mut self, frame: SentFrame) {
        match frame {
            SentFrame::RequestHeaders { request, stream } => {
                if self.registry.bind(stream, request) {
                    if let Some(req) = self.registry.get_mut(request) {
                        req.timing.record_open(Instant::now());
                        tracing::debug!("Stream {} opened for {}", stream, req.uri);
                    }
                }
            }
            SentFrame::Data {
                stream,
                len,
                end_stream,
            } => {
                tracing::debug!(
                    "Sent DATA on stream {} ({} bytes, end_stream={})",
                    stream,
                    len,
                    end_stream
                );
            }
            SentFrame::RstStream { stream, code } => {
                tracing::debug!("Sent RST_STREAM on stream {} ({})", stream, code);
            }
        }
    }

    fn on_response_headers(&mut self, stream: StreamId, fields: &HeaderList, end_stream: bool) {
        tracing::debug!(
            "Received HEADERS on stream {} (end_stream={})",
            stream,
            end_stream
        );
        trace_fields(stream, fields);

        let Some(id) = self.registry.lookup(stream) else {
            return;
        };
        let get_assets = self.config.get_assets;
        let Some(request) = self.registry.get_mut(id) else {
            return;
        };

        request.timing.record_reply(Instant::now());
        if let Some(status) = fields.get(":status").and_then(|s| s.parse().ok()) {
            request.status = Some(status);
        }

        if request.decoder.is_none() {
            if let Some(encoding) = fields
                .get("content-encoding")
                .and_then(ContentEncoding::from_header)
            {
                tracing::debug!("Inflating {:?} body on stream {}", encoding, stream);
                request.decoder = Some(DecodePipeline::new(encoding));
            }
        }

        if get_assets && request.level == 0 && request.expander.is_none() {
            request.expander = Some(CrawlExpander::new(&request.uri));
        }
    }

    fn on_body_chunk<E: Engine, W: Write>(
        &mut self,
        engine: &mut E,
        stream: StreamId,
        data: Bytes,
        out: &mut W,
    ) -> Result<()> {
        tracing::debug!("Received DATA on stream {} ({} bytes)", stream, data.len());

        let Some(id) = self.registry.lookup(stream) else {
            return Ok(());
        };
        let Some(request) = self.registry.get_mut(id) else {
            return Ok(());
        };
        if request.reset {
            return Ok(());
        }

        let mut sink = BodySink::new(out, request.expander.as_mut());
        let decoded = match request.decoder.as_mut() {
            Some(decoder) => decoder.feed(&data, |chunk| sink.write(chunk)).map(drop),
            None => {
                sink.write(&data);
                Ok(())
            }
        };
        let links = sink.finish()?;

        if let Err(e) = decoded {
            tracing::warn!("Resetting stream {} ({}): {}", stream, request.uri, e);
            request.reset = true;
            engine.submit_rst_stream(stream, ErrorCode::INTERNAL_ERROR)?;
        }

        if links.is_empty() {
            return Ok(());
        }
        // assets go out on the open session while the page is still arriving
        let page = request.uri.clone();
        let level = request.level;
        self.expand(engine, &page, level, links)
    }

    fn on_stream_closed<E: Engine, W: Write>(
        &mut self,
        engine: &mut E,
        stream: StreamId,
        code: ErrorCode,
        out: &mut W,
    ) -> Result<Flow> {
        tracing::debug!("Stream {} closed ({})", stream, code);

        let Some(id) = self.registry.lookup(stream) else {
            return Ok(Flow::Continue);
        };
        let Some(request) = self.registry.get_mut(id) else {
            return Ok(Flow::Continue);
        };

        let mut links = Vec::new();
        if !request.reset {
            if let Some(decoder) = request.decoder.as_mut() {
                let mut sink = BodySink::new(out, request.expander.as_mut());
                let finished = decoder.finish(|chunk| sink.write(chunk));
                links = sink.finish()?;
                if let Err(e) = finished {
                    tracing::warn!("Body of {} ended early: {}", request.uri, e);
                }
            }
        }
        if let Some(mut expander) = request.expander.take() {
            links.extend(expander.feed(&[], true));
        }
        request.timing.record_complete(Instant::now());

        let page = request.uri.clone();
        let level = request.level;
        self.registry.mark_complete(stream);

        self.expand(engine, &page, level, links)?;
        self.shutdown_if_complete(engine)
    }

    /// Enqueues and submits the same-origin links found on `page`
    fn expand<E: Engine>(
        &mut self,
        engine: &mut E,
        page: &RequestUri,
        level: u32,
        links: Vec<String>,
    ) -> Result<()> {
        for link in links {
            let Some(uri) = same_origin_candidate(page, &link) else {
                continue;
            };
            match self.registry.enqueue(uri, None, level + 1) {
                Enqueue::Accepted(id) => self.submit(engine, id)?,
                Enqueue::Duplicate => tracing::trace!("Already requested {}", link),
            }
        }
        Ok(())
    }

    fn shutdown_if_complete<E: Engine>(&mut self, engine: &mut E) -> Result<Flow> {
        if !self.registry.all_complete() {
            return Ok(Flow::Continue);
        }
        tracing::debug!(
            "All {} requests complete, sending GOAWAY",
            self.registry.len()
        );
        engine.submit_goaway()?;
        Ok(Flow::Shutdown)
    }
}

fn trace_fields(stream: StreamId, fields: &HeaderList) {
    for field in fields.iter() {
        tracing::trace!("[stream {}] {}: {}", stream, field.name, field.value);
    }
}

/// Routes decoded body bytes to the output and the crawl expander
struct BodySink<'s, W> {
    out: &'s mut W,
    expander: Option<&'s mut CrawlExpander>,
    links: Vec<String>,
    error: Option<io::Error>,
}

impl<'s, W: Write> BodySink<'s, W> {
    fn new(out: &'s mut W, expander: Option<&'s mut CrawlExpander>) -> Self {
        Self {
            out,
            expander,
            links: Vec::new(),
            error: None,
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        if self.error.is_none() {
            if let Err(e) = self.out.write_all(chunk) {
                self.error = Some(e);
            }
        }
        if let Some(expander) = self.expander.as_mut() {
            self.links.extend(expander.feed(chunk, false));
        }
    }

    /// Links found in the routed bytes, or the first output error
    fn finish(self) -> io::Result<Vec<String>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.links),
        }
    }
}
