//! `h2`-backed protocol engine
//!
//! The engine runs entirely inside the session task: [`H2Engine::next_event`]
//! drives the connection, releases queued requests, uploads request bodies
//! and yields response events, all from a single poll.

use crate::engine::{
    Engine, EngineError, EngineEvent, ErrorCode, ReceivedFrame, SentFrame, Settings,
};
use crate::request::{BodyRead, BodyReader, HeaderList, RequestId, StreamId};
use bytes::Bytes;
use futures::future::poll_fn;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use h2::client::{Connection, ResponseFuture, SendRequest};
use h2::{RecvStream, SendStream};
use http::header::HeaderMap;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};

/// Largest body piece pulled from a [`BodyReader`] at once
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// A request waiting for the connection to accept a new stream
struct Submission {
    request: RequestId,
    headers: HeaderList,
    body: Option<BodyReader>,
}

/// Send half of an open stream and the rest of its body
struct Outbound {
    send: SendStream<Bytes>,
    body: Option<BodyReader>,
}

enum Phase<T> {
    /// Transport connected, preface not sent yet
    Pending(Option<T>),
    Open {
        send_request: Option<SendRequest<Bytes>>,
        connection: Pin<Box<Connection<T, Bytes>>>,
    },
    Closed,
}

/// HTTP/2 client engine over an established transport
pub struct H2Engine<T> {
    phase: Phase<T>,
    settings: Settings,
    queued: VecDeque<Submission>,
    outbound: HashMap<StreamId, Outbound>,
    responses: SelectAll<BoxStream<'static, EngineEvent>>,
    events: VecDeque<EngineEvent>,
    goaway: bool,
    closed: Option<Result<(), EngineError>>,
}

impl<T> H2Engine<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected transport; nothing is written until the first
    /// call to [`next_event`](Self::next_event)
    pub fn new(io: T) -> Self {
        Self {
            phase: Phase::Pending(Some(io)),
            settings: Settings::default(),
            queued: VecDeque::new(),
            outbound: HashMap::new(),
            responses: SelectAll::new(),
            events: VecDeque::new(),
            goaway: false,
            closed: None,
        }
    }

    /// Waits for the next engine event
    ///
    /// The first call sends the connection preface with the submitted
    /// settings.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(event))` - Next event
    /// * `Ok(None)` - The connection closed gracefully
    /// * `Err(EngineError)` - Connection-level failure
    pub async fn next_event(&mut self) -> Result<Option<EngineEvent>, EngineError> {
        if let Phase::Pending(io) = &mut self.phase {
            let Some(io) = io.take() else {
                self.phase = Phase::Closed;
                return Err(EngineError::Closed);
            };

            let mut builder = h2::client::Builder::new();
            builder.enable_push(self.settings.enable_push);
            if let Some(window) = self.settings.initial_window_size {
                builder.initial_window_size(window);
            }

            match builder.handshake::<_, Bytes>(io).await {
                Ok((send_request, connection)) => {
                    tracing::debug!("Sent connection preface and SETTINGS {:?}", self.settings);
                    self.phase = Phase::Open {
                        send_request: Some(send_request),
                        connection: Box::pin(connection),
                    };
                }
                Err(e) => {
                    self.phase = Phase::Closed;
                    return Err(e.into());
                }
            }
        }

        poll_fn(|cx| self.poll_event(cx)).await
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<EngineEvent>, EngineError>> {
        let Self {
            phase,
            queued,
            outbound,
            responses,
            events,
            goaway,
            closed,
            ..
        } = self;

        let Phase::Open {
            send_request,
            connection,
        } = phase
        else {
            return Poll::Ready(Ok(None));
        };

        if closed.is_none() {
            if let Poll::Ready(result) = connection.as_mut().poll(cx) {
                *closed = Some(result.map_err(EngineError::from));
            }
        }

        if closed.is_none() {
            if let Err(e) = pump_submissions(cx, send_request, queued, outbound, responses, events)
            {
                *closed = Some(Err(e));
            }
        }

        if let Some(Err(_)) = closed {
            if let Some(Err(e)) = closed.take() {
                *phase = Phase::Closed;
                return Poll::Ready(Err(e));
            }
        }

        if let Some(event) = events.pop_front() {
            return Poll::Ready(Ok(Some(event)));
        }

        poll_uploads(cx, outbound, events);
        if let Some(event) = events.pop_front() {
            return Poll::Ready(Ok(Some(event)));
        }

        if let Poll::Ready(Some(event)) = responses.poll_next_unpin(cx) {
            if let EngineEvent::StreamClosed { stream, .. } = &event {
                outbound.remove(stream);
            }
            return Poll::Ready(Ok(Some(event)));
        }

        if *goaway && queued.is_empty() && send_request.is_some() {
            // Dropping the last handle lets the connection send GOAWAY once
            // the remaining streams finish.
            tracing::debug!("Releasing request handle, connection will send GOAWAY");
            *send_request = None;
            cx.waker().wake_by_ref();
        }

        if closed.is_some() && responses.is_empty() {
            *phase = Phase::Closed;
            return Poll::Ready(Ok(None));
        }

        Poll::Pending
    }
}

impl<T> Engine for H2Engine<T> {
    fn submit_settings(&mut self, settings: &Settings) -> Result<(), EngineError> {
        match self.phase {
            Phase::Pending(_) => {
                self.settings = *settings;
                Ok(())
            }
            _ => Err(EngineError::SettingsAfterHandshake),
        }
    }

    fn submit_request(
        &mut self,
        request: RequestId,
        headers: HeaderList,
        body: Option<BodyReader>,
    ) -> Result<(), EngineError> {
        if matches!(self.phase, Phase::Closed) || self.goaway {
            return Err(EngineError::Closed);
        }
        self.queued.push_back(Submission {
            request,
            headers,
            body,
        });
        Ok(())
    }

    fn submit_rst_stream(&mut self, stream: StreamId, code: ErrorCode) -> Result<(), EngineError> {
        let outbound = self
            .outbound
            .get_mut(&stream)
            .ok_or(EngineError::UnknownStream(stream))?;

        outbound.send.send_reset(code.into());
        outbound.body = None;
        self.events
            .push_back(EngineEvent::FrameSent(SentFrame::RstStream { stream, code }));
        Ok(())
    }

    fn submit_goaway(&mut self) -> Result<(), EngineError> {
        self.goaway = true;
        Ok(())
    }
}

/// Hands queued requests to the connection while it accepts new streams
fn pump_submissions(
    cx: &mut Context<'_>,
    send_request: &mut Option<SendRequest<Bytes>>,
    queued: &mut VecDeque<Submission>,
    outbound: &mut HashMap<StreamId, Outbound>,
    responses: &mut SelectAll<BoxStream<'static, EngineEvent>>,
    events: &mut VecDeque<EngineEvent>,
) -> Result<(), EngineError> {
    let Some(sender) = send_request.as_mut() else {
        return Ok(());
    };

    while !queued.is_empty() {
        match sender.poll_ready(cx) {
            Poll::Pending => break,
            Poll::Ready(Err(e)) => return Err(e.into()),
            Poll::Ready(Ok(())) => {}
        }

        let Some(submission) = queued.pop_front() else {
            break;
        };
        let request = build_http_request(&submission.headers)?;

        let body = submission.body.filter(|body| !body.is_empty());
        let (response, mut send) = sender.send_request(request, body.is_none())?;
        let stream = StreamId::new(u32::from(response.stream_id()));

        if let Some(body) = &body {
            send.reserve_capacity(upload_window(body));
        }

        tracing::debug!(
            "Sent HEADERS for request {} on stream {} ({} fields)",
            submission.request,
            stream,
            submission.headers.len()
        );
        events.push_back(EngineEvent::FrameSent(SentFrame::RequestHeaders {
            request: submission.request,
            stream,
        }));
        outbound.insert(stream, Outbound { send, body });
        responses.push(response_events(stream, response));
    }

    Ok(())
}

fn upload_window(body: &BodyReader) -> usize {
    body.remaining().min(UPLOAD_CHUNK_SIZE as u64) as usize
}

/// Moves request body bytes into the connection as capacity allows
fn poll_uploads(
    cx: &mut Context<'_>,
    outbound: &mut HashMap<StreamId, Outbound>,
    events: &mut VecDeque<EngineEvent>,
) {
    for (stream, Outbound { send, body: slot }) in outbound.iter_mut() {
        while let Some(body) = slot.as_mut() {
            send.reserve_capacity(upload_window(body));

            let mut capacity = send.capacity();
            while capacity == 0 {
                match send.poll_capacity(cx) {
                    Poll::Ready(Some(Ok(n))) => capacity = n,
                    Poll::Ready(Some(Err(e))) => {
                        tracing::debug!("Stream {} can no longer send: {}", stream, e);
                        *slot = None;
                        break;
                    }
                    Poll::Ready(None) => {
                        *slot = None;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
            let Some(body) = slot.as_mut() else {
                break;
            };
            if capacity == 0 {
                break;
            }

            match body.read(capacity.min(UPLOAD_CHUNK_SIZE)) {
                Ok(BodyRead::Data(data)) => {
                    let len = data.len();
                    let end_stream = body.is_finished();
                    if let Err(e) = send.send_data(data, end_stream) {
                        tracing::debug!("Stream {} refused body data: {}", stream, e);
                        *slot = None;
                        break;
                    }
                    events.push_back(EngineEvent::FrameSent(SentFrame::Data {
                        stream: *stream,
                        len,
                        end_stream,
                    }));
                    if end_stream {
                        *slot = None;
                    }
                }
                Ok(BodyRead::Eof) => {
                    if let Err(e) = send.send_data(Bytes::new(), true) {
                        tracing::debug!("Stream {} refused end of body: {}", stream, e);
                    }
                    events.push_back(EngineEvent::FrameSent(SentFrame::Data {
                        stream: *stream,
                        len: 0,
                        end_stream: true,
                    }));
                    *slot = None;
                }
                Ok(BodyRead::Retry) => {
                    cx.waker().wake_by_ref();
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read request body for stream {}: {}", stream, e);
                    send.send_reset(h2::Reason::INTERNAL_ERROR);
                    *slot = None;
                }
            }
        }
    }
}

/// Converts an assembled header list into an `http` request
fn build_http_request(headers: &HeaderList) -> Result<http::Request<()>, EngineError> {
    let method = headers.get(":method").unwrap_or("GET");
    let scheme = headers.get(":scheme").unwrap_or("https");
    let authority = headers.get(":authority").unwrap_or_default();
    let path = headers.get(":path").unwrap_or("/");

    let uri = http::Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path)
        .build()?;

    let mut builder = http::Request::builder()
        .method(method)
        .uri(uri)
        .version(http::Version::HTTP_2);
    for field in headers.regular() {
        builder = builder.header(field.name.as_str(), field.value.as_str());
    }

    Ok(builder.body(())?)
}

fn header_fields(status: Option<http::StatusCode>, map: &HeaderMap) -> HeaderList {
    let mut fields = HeaderList::new();
    if let Some(status) = status {
        fields.append(":status", status.as_str());
    }
    for (name, value) in map {
        fields.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    fields
}

fn closed_event(stream: StreamId, error: Option<&h2::Error>) -> EngineEvent {
    let code = match error {
        None => ErrorCode::NO_ERROR,
        Some(e) => {
            tracing::debug!("Stream {} failed: {}", stream, e);
            e.reason()
                .map(ErrorCode::from)
                .unwrap_or(ErrorCode::INTERNAL_ERROR)
        }
    };
    EngineEvent::StreamClosed { stream, code }
}

enum ResponsePhase {
    Headers(ResponseFuture),
    Body(RecvStream),
    Trailers(RecvStream),
    Closing,
    Finished,
}

/// Turns one response into its event sequence, ending with `StreamClosed`
fn response_events(stream: StreamId, response: ResponseFuture) -> BoxStream<'static, EngineEvent> {
    stream::unfold(ResponsePhase::Headers(response), move |phase| async move {
        match phase {
            ResponsePhase::Headers(response) => match response.await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    let end_stream = body.is_end_stream();
                    let event = EngineEvent::FrameReceived(ReceivedFrame::ResponseHeaders {
                        stream,
                        fields: header_fields(Some(parts.status), &parts.headers),
                        end_stream,
                    });
                    Some((event, ResponsePhase::Body(body)))
                }
                Err(e) => Some((closed_event(stream, Some(&e)), ResponsePhase::Finished)),
            },
            ResponsePhase::Body(mut body) => match body.data().await {
                Some(Ok(data)) => {
                    if let Err(e) = body.flow_control().release_capacity(data.len()) {
                        tracing::debug!("Could not release capacity on stream {}: {}", stream, e);
                    }
                    Some((
                        EngineEvent::BodyChunk { stream, data },
                        ResponsePhase::Body(body),
                    ))
                }
                Some(Err(e)) => Some((closed_event(stream, Some(&e)), ResponsePhase::Finished)),
                None => Some(next_trailers(stream, body).await),
            },
            ResponsePhase::Trailers(body) => Some(next_trailers(stream, body).await),
            ResponsePhase::Closing => Some((closed_event(stream, None), ResponsePhase::Finished)),
            ResponsePhase::Finished => None,
        }
    })
    .boxed()
}

async fn next_trailers(stream: StreamId, mut body: RecvStream) -> (EngineEvent, ResponsePhase) {
    match body.trailers().await {
        Ok(Some(trailers)) => (
            EngineEvent::FrameReceived(ReceivedFrame::Trailers {
                stream,
                fields: header_fields(None, &trailers),
            }),
            ResponsePhase::Closing,
        ),
        Ok(None) => (closed_event(stream, None), ResponsePhase::Finished),
        Err(e) => (closed_event(stream, Some(&e)), ResponsePhase::Finished),
    }
}
