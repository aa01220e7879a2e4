//! Streaming response body inflation
//!
//! A [`DecodePipeline`] is attached to a request once its response announces
//! `content-encoding: gzip` or `deflate`. The concrete format (gzip, zlib
//! wrapped or raw deflate) is picked from the first body bytes. Output goes
//! through one fixed buffer that is handed to the sink after every
//! decompressor call, so a small input that inflates to a large body never
//! accumulates in memory.

use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::io;
use thiserror::Error;

/// Largest chunk handed to a sink; also the whole output buffer of a decoder
pub const DECODE_CHUNK_SIZE: usize = 4096;

/// Gzip headers longer than this are treated as corrupt
const MAX_GZIP_HEADER: usize = 64 * 1024;

const GZIP_FHCRC: u8 = 0x02;
const GZIP_FEXTRA: u8 = 0x04;
const GZIP_FNAME: u8 = 0x08;
const GZIP_FCOMMENT: u8 = 0x10;

/// Decompression errors; always scoped to a single stream
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to inflate response body: {0}")]
    Inflate(#[from] io::Error),

    #[error("Decoder already failed on an earlier chunk")]
    Poisoned,
}

/// A supported `content-encoding` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Matches a `content-encoding` header value, ignoring case
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("gzip") {
            Some(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Gzip,
    Zlib,
    Deflate,
}

impl Format {
    /// Picks the container format from the leading bytes
    fn sniff(head: &[u8]) -> Self {
        if head.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if is_zlib_header(head) {
            Self::Zlib
        } else {
            Self::Deflate
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Deflate => "deflate",
        }
    }
}

/// Push-driven inflater that never holds more than one output chunk
struct Inflater {
    format: Format,
    raw: Decompress,
    /// Gzip header bytes seen so far; `None` once the deflate data started
    header: Option<Vec<u8>>,
    /// Gzip CRC32 and ISIZE trailer bytes seen after the last block
    trailer: Vec<u8>,
    crc: Crc,
    done: bool,
}

impl Inflater {
    fn new(format: Format) -> Self {
        Self {
            format,
            // gzip members are raw deflate once the header is skipped
            raw: Decompress::new(format == Format::Zlib),
            header: (format == Format::Gzip).then(Vec::new),
            trailer: Vec::new(),
            crc: Crc::new(),
            done: false,
        }
    }

    fn inflate<F>(&mut self, data: &[u8], sink: &mut F) -> io::Result<usize>
    where
        F: FnMut(&[u8]),
    {
        let Some(header) = self.header.as_mut() else {
            return self.run(data, sink);
        };

        header.extend_from_slice(data);
        match gzip_header_len(header)? {
            Some(len) => {
                let body = header.split_off(len);
                self.header = None;
                self.run(&body, sink)
            }
            None if header.len() > MAX_GZIP_HEADER => Err(invalid_data("gzip header too long")),
            None => Ok(0),
        }
    }

    /// Inflates `input` through a stack buffer, emptying it into `sink`
    /// after every call into the decompressor
    fn run<F>(&mut self, mut input: &[u8], sink: &mut F) -> io::Result<usize>
    where
        F: FnMut(&[u8]),
    {
        let mut out = [0u8; DECODE_CHUNK_SIZE];
        let mut total = 0;

        while !self.done {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = self
                .raw
                .decompress(input, &mut out, FlushDecompress::None)
                .map_err(invalid_data)?;
            let consumed = (self.raw.total_in() - before_in) as usize;
            let produced = (self.raw.total_out() - before_out) as usize;

            input = &input[consumed..];
            if produced > 0 {
                let chunk = &out[..produced];
                self.crc.update(chunk);
                sink(chunk);
                total += produced;
            }

            match status {
                Status::StreamEnd => self.done = true,
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => break,
                Status::Ok | Status::BufError => {}
            }
        }

        if self.done && self.format == Format::Gzip {
            let wanted = 8usize.saturating_sub(self.trailer.len()).min(input.len());
            self.trailer.extend_from_slice(&input[..wanted]);
        }
        Ok(total)
    }

    /// Drains pending output and checks the stream ended where it should
    fn finish<F>(&mut self, sink: &mut F) -> io::Result<usize>
    where
        F: FnMut(&[u8]),
    {
        let drained = match self.header {
            Some(_) => 0,
            None => self.run(&[], sink)?,
        };

        if self.header.is_some() {
            return Err(truncated("gzip header"));
        }
        if !self.done {
            return Err(truncated("deflate data"));
        }
        if self.format == Format::Gzip {
            let &[c0, c1, c2, c3, s0, s1, s2, s3] = self.trailer.as_slice() else {
                return Err(truncated("gzip trailer"));
            };
            if u32::from_le_bytes([c0, c1, c2, c3]) != self.crc.sum() {
                return Err(invalid_data("gzip CRC mismatch"));
            }
            if u32::from_le_bytes([s0, s1, s2, s3]) != self.crc.amount() {
                return Err(invalid_data("gzip length mismatch"));
            }
        }
        Ok(drained)
    }
}

/// Length of a complete gzip member header, or `None` if more bytes are needed
fn gzip_header_len(buf: &[u8]) -> io::Result<Option<usize>> {
    if buf.len() < 10 {
        return Ok(None);
    }
    if buf[..3] != [0x1f, 0x8b, 8] {
        return Err(invalid_data("not a gzip deflate member"));
    }

    let flags = buf[3];
    let mut pos = 10;
    if flags & GZIP_FEXTRA != 0 {
        let Some(&[lo, hi]) = buf.get(pos..pos + 2) else {
            return Ok(None);
        };
        pos += 2 + usize::from(u16::from_le_bytes([lo, hi]));
    }
    for flag in [GZIP_FNAME, GZIP_FCOMMENT] {
        if flags & flag == 0 {
            continue;
        }
        let Some(rest) = buf.get(pos..) else {
            return Ok(None);
        };
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => pos += nul + 1,
            None => return Ok(None),
        }
    }
    if flags & GZIP_FHCRC != 0 {
        pos += 2;
    }

    Ok((buf.len() >= pos).then_some(pos))
}

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("body ended inside the {}", what),
    )
}

/// CMF/FLG check from RFC 1950
fn is_zlib_header(head: &[u8]) -> bool {
    match head {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

enum State {
    /// Waiting for enough bytes to recognise the format
    Sniffing(Vec<u8>),
    Inflating(Inflater),
    Poisoned,
}

/// Per-request streaming decompressor
pub struct DecodePipeline {
    encoding: ContentEncoding,
    state: State,
    produced: u64,
}

impl std::fmt::Debug for DecodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Sniffing(_) => "sniffing",
            State::Inflating(inflater) => inflater.format.name(),
            State::Poisoned => "poisoned",
        };
        f.debug_struct("DecodePipeline")
            .field("encoding", &self.encoding)
            .field("state", &state)
            .field("produced", &self.produced)
            .finish()
    }
}

impl DecodePipeline {
    pub fn new(encoding: ContentEncoding) -> Self {
        Self {
            encoding,
            state: State::Sniffing(Vec::new()),
            produced: 0,
        }
    }

    /// Total decoded bytes handed to sinks so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, State::Poisoned)
    }

    /// Inflates `data`, calling `sink` with each decoded chunk
    ///
    /// Chunks are at most [`DECODE_CHUNK_SIZE`] bytes. After a failure the
    /// pipeline is poisoned and refuses further input.
    ///
    /// # Returns
    ///
    /// Number of decoded bytes produced by this call
    pub fn feed<F>(&mut self, data: &[u8], sink: F) -> Result<usize, DecodeError>
    where
        F: FnMut(&[u8]),
    {
        let pending = match &mut self.state {
            State::Poisoned => return Err(DecodeError::Poisoned),
            State::Inflating(_) => None,
            State::Sniffing(head) => {
                head.extend_from_slice(data);
                if head.len() < 2 {
                    return Ok(0);
                }
                Some(std::mem::take(head))
            }
        };

        match pending {
            Some(head) => {
                let format = Format::sniff(&head);
                tracing::trace!("Inflating body as {}", format.name());
                self.state = State::Inflating(Inflater::new(format));
                self.inflate(&head, sink)
            }
            None => self.inflate(data, sink),
        }
    }

    /// Flushes whatever the decoder still holds at end of stream
    ///
    /// A truncated stream, or a gzip trailer that does not match the
    /// decoded bytes, is reported as an error.
    pub fn finish<F>(&mut self, mut sink: F) -> Result<usize, DecodeError>
    where
        F: FnMut(&[u8]),
    {
        let mut total = 0;
        if let State::Sniffing(head) = &mut self.state {
            if head.is_empty() {
                return Ok(0);
            }
            let head = std::mem::take(head);
            self.state = State::Inflating(Inflater::new(Format::sniff(&head)));
            total += self.inflate(&head, &mut sink)?;
        }

        let State::Inflating(inflater) = &mut self.state else {
            return Err(DecodeError::Poisoned);
        };
        match inflater.finish(&mut sink) {
            Ok(drained) => {
                self.produced += drained as u64;
                Ok(total + drained)
            }
            Err(e) => {
                self.state = State::Poisoned;
                Err(e.into())
            }
        }
    }

    fn inflate<F>(&mut self, data: &[u8], mut sink: F) -> Result<usize, DecodeError>
    where
        F: FnMut(&[u8]),
    {
        let State::Inflating(inflater) = &mut self.state else {
            return Err(DecodeError::Poisoned);
        };

        // count what reached the sink even when inflation fails midway
        let mut total = 0;
        let result = inflater.inflate(data, &mut |chunk: &[u8]| {
            total += chunk.len();
            sink(chunk);
        });
        self.produced += total as u64;

        match result {
            Ok(_) => Ok(total),
            Err(e) => {
                self.state = State::Poisoned;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn sample_body() -> Vec<u8> {
        (0..20_000u32)
            .flat_map(|i| format!("line {} of the body\n", i).into_bytes())
            .collect()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode_all(pipeline: &mut DecodePipeline, input: &[u8], feed_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in input.chunks(feed_size) {
            pipeline
                .feed(piece, |chunk| out.extend_from_slice(chunk))
                .unwrap();
        }
        pipeline
            .finish(|chunk| out.extend_from_slice(chunk))
            .unwrap();
        out
    }

    #[test]
    fn test_content_encoding_from_header() {
        assert_eq!(ContentEncoding::from_header("gzip"), Some(ContentEncoding::Gzip));
        assert_eq!(ContentEncoding::from_header("GZIP"), Some(ContentEncoding::Gzip));
        assert_eq!(
            ContentEncoding::from_header("Deflate"),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(ContentEncoding::from_header("br"), None);
        assert_eq!(ContentEncoding::from_header("identity"), None);
    }

    #[test]
    fn test_gzip_round_trip() {
        let body = sample_body();
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        let out = decode_all(&mut pipeline, &gzip(&body), 1000);
        assert_eq!(out, body);
        assert_eq!(pipeline.produced(), body.len() as u64);
    }

    #[test]
    fn test_gzip_round_trip_single_byte_feeds() {
        let body = b"tiny body".to_vec();
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        assert_eq!(decode_all(&mut pipeline, &gzip(&body), 1), body);
    }

    #[test]
    fn test_zlib_wrapped_deflate() {
        let body = sample_body();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut pipeline = DecodePipeline::new(ContentEncoding::Deflate);
        assert_eq!(decode_all(&mut pipeline, &compressed, 3000), body);
    }

    #[test]
    fn test_raw_deflate() {
        let body = sample_body();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut pipeline = DecodePipeline::new(ContentEncoding::Deflate);
        assert_eq!(decode_all(&mut pipeline, &compressed, 5000), body);
    }

    #[test]
    fn test_chunks_are_bounded() {
        let body = vec![b'a'; 100_000];
        let compressed = gzip(&body);
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);

        let mut sizes = Vec::new();
        pipeline
            .feed(&compressed, |chunk| sizes.push(chunk.len()))
            .unwrap();
        pipeline.finish(|chunk| sizes.push(chunk.len())).unwrap();

        assert!(sizes.iter().all(|&n| n > 0 && n <= DECODE_CHUNK_SIZE));
        assert_eq!(sizes.iter().sum::<usize>(), body.len());
    }

    #[test]
    fn test_highly_compressed_body_streams_in_bounded_chunks() {
        let body = vec![0u8; 4 << 20];
        let compressed = gzip(&body);
        assert!(compressed.len() < 8192);

        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        let mut calls = 0usize;
        let mut largest = 0usize;
        let mut total = 0usize;
        let produced = pipeline
            .feed(&compressed, |chunk| {
                calls += 1;
                largest = largest.max(chunk.len());
                total += chunk.len();
                assert!(chunk.iter().all(|&b| b == 0));
            })
            .unwrap();
        pipeline.finish(|chunk| total += chunk.len()).unwrap();

        // one small input produced the whole body one buffer at a time
        assert_eq!(produced, body.len());
        assert_eq!(total, body.len());
        assert!(largest <= DECODE_CHUNK_SIZE);
        assert!(calls >= body.len() / DECODE_CHUNK_SIZE);
    }

    #[test]
    fn test_gzip_header_fields_are_skipped() {
        let body = sample_body();
        let mut encoder = GzBuilder::new()
            .filename("page.html")
            .comment("served compressed")
            .extra(vec![1, 2, 3, 4])
            .write(Vec::new(), Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        // byte-at-a-time feeds split every header field
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        assert_eq!(decode_all(&mut pipeline, &compressed, 1), body);
    }

    #[test]
    fn test_gzip_trailer_mismatch_fails_at_finish() {
        let mut compressed = gzip(b"checked body");
        let len = compressed.len();
        compressed[len - 8] ^= 0xff;

        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        let mut out = Vec::new();
        pipeline
            .feed(&compressed, |chunk| out.extend_from_slice(chunk))
            .unwrap();
        assert_eq!(out, b"checked body");
        assert!(matches!(pipeline.finish(|_| {}), Err(DecodeError::Inflate(_))));
        assert!(pipeline.is_poisoned());
    }

    #[test]
    fn test_gzip_header_length_needs_complete_fields() {
        let header = [0x1f, 0x8b, 8, GZIP_FNAME, 0, 0, 0, 0, 0, 0xff, b'a', b'b'];
        assert_eq!(gzip_header_len(&header[..9]).unwrap(), None);
        assert_eq!(gzip_header_len(&header).unwrap(), None);

        let mut complete = header.to_vec();
        complete.push(0);
        assert_eq!(gzip_header_len(&complete).unwrap(), Some(13));

        assert!(gzip_header_len(&[0x1f, 0x8b, 7, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_corrupt_payload_poisons_pipeline() {
        let mut compressed = gzip(&sample_body());
        // reserved block type right after the 10-byte gzip header
        for byte in compressed.iter_mut().skip(10).take(32) {
            *byte = 0xff;
        }

        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        let result = pipeline.feed(&compressed, |_| {});
        assert!(matches!(result, Err(DecodeError::Inflate(_))));
        assert!(pipeline.is_poisoned());
        assert!(matches!(
            pipeline.feed(b"more", |_| {}),
            Err(DecodeError::Poisoned)
        ));
    }

    #[test]
    fn test_corruption_is_per_pipeline() {
        let body = sample_body();
        let good = gzip(&body);
        let mut bad = good.clone();
        for byte in bad.iter_mut().skip(10).take(32) {
            *byte = 0xff;
        }

        let mut healthy = DecodePipeline::new(ContentEncoding::Gzip);
        let mut broken = DecodePipeline::new(ContentEncoding::Gzip);
        let mut out = Vec::new();

        let half = good.len() / 2;
        healthy
            .feed(&good[..half], |c| out.extend_from_slice(c))
            .unwrap();
        assert!(broken.feed(&bad, |_| {}).is_err());
        healthy
            .feed(&good[half..], |c| out.extend_from_slice(c))
            .unwrap();
        healthy.finish(|c| out.extend_from_slice(c)).unwrap();

        assert_eq!(out, body);
    }

    #[test]
    fn test_truncated_stream_fails_at_finish() {
        let compressed = gzip(&sample_body());
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        pipeline
            .feed(&compressed[..compressed.len() / 2], |_| {})
            .unwrap();
        assert!(pipeline.finish(|_| {}).is_err());
    }

    #[test]
    fn test_empty_body_finishes_cleanly() {
        let mut pipeline = DecodePipeline::new(ContentEncoding::Gzip);
        assert_eq!(pipeline.finish(|_| {}).unwrap(), 0);
    }

    #[test]
    fn test_zlib_header_detection() {
        assert!(is_zlib_header(&[0x78, 0x9c]));
        assert!(is_zlib_header(&[0x78, 0x01]));
        assert!(!is_zlib_header(&[0x1f, 0x8b]));
        assert!(!is_zlib_header(&[0x78]));
    }
}
