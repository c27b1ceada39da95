//! `multipart/mixed` envelope decoding.
//!
//! # Envelope Layout
//!
//! ```text
//! --batch_7f3c                          ← delimiter line
//! Content-Type: application/http        ← MIME part headers (discarded)
//!                                       ← blank line
//! GET /api/values/1 HTTP/1.1            ← nested start line
//! Accept: application/json              ← nested headers → SubRequest headers
//!                                       ← blank line
//! <body bytes>                          ← SubRequest body
//! --batch_7f3c--                        ← close delimiter
//! ```
//!
//! Input is line oriented and accepts both CRLF and bare LF. The line break
//! that precedes a delimiter belongs to the delimiter, not to the body.
//!
//! Decoding is incremental: [`EnvelopeCodec`] is a [`Decoder`] that yields one
//! message per part and only holds the bytes of the part currently being
//! decoded. [`request_stream`] drives it over a body chunk stream; the
//! `parse_*_envelope` helpers decode an in-memory envelope eagerly.

use crate::error::ParseError;
use crate::message::{SubRequest, SubResponse, parse_version};
use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;

/// Media type of batch envelopes.
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// Media type of each envelope part.
pub const APPLICATION_HTTP: &str = "application/http";

/// Longest boundary RFC 2046 allows.
const MAX_BOUNDARY_LEN: usize = 70;

/// Extract the boundary from a batch request's `Content-Type` header.
///
/// The media type must be `multipart/mixed` (case-insensitive) and carry a
/// `boundary` parameter of 1 to 70 characters. Quoted boundaries are unquoted.
///
/// # Errors
///
/// - [`ParseError::InvalidContentType`] when the header is absent or names
///   another media type.
/// - [`ParseError::MissingBoundary`] when the boundary parameter is absent,
///   empty, too long, or contains line breaks.
pub fn parse_boundary(content_type: Option<&str>) -> Result<String, ParseError> {
    let content_type = content_type.unwrap_or_default();
    let mut params = split_params(content_type).into_iter();

    let media_type = params.next().unwrap_or_default();
    if !media_type.trim().eq_ignore_ascii_case(MULTIPART_MIXED) {
        return Err(ParseError::InvalidContentType(content_type.to_string()));
    }

    let boundary = params
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .ok_or(ParseError::MissingBoundary)?;

    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LEN
        || boundary.contains(['\r', '\n'])
    {
        return Err(ParseError::MissingBoundary);
    }

    Ok(boundary)
}

/// Split a header value on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

/// Remove surrounding quotes and backslash escapes from a parameter value.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

/// A nested HTTP message that can be decoded from an envelope part.
pub trait EnvelopeMessage: Sized {
    /// Build the message from its start line, headers and body.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the start line is invalid.
    fn from_parts(start_line: &str, headers: HeaderMap, body: Bytes) -> Result<Self, String>;
}

impl EnvelopeMessage for SubRequest {
    fn from_parts(start_line: &str, headers: HeaderMap, body: Bytes) -> Result<Self, String> {
        let mut tokens = start_line.split_ascii_whitespace();
        let (Some(method), Some(target)) = (tokens.next(), tokens.next()) else {
            return Err(format!("invalid request line '{start_line}'"));
        };

        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| format!("invalid method '{method}'"))?;
        let uri = target
            .parse::<Uri>()
            .map_err(|_| format!("invalid request target '{target}'"))?;
        let version = match tokens.next() {
            Some(token) => {
                parse_version(token).ok_or_else(|| format!("unsupported HTTP version '{token}'"))?
            }
            None => Version::HTTP_11,
        };
        if tokens.next().is_some() {
            return Err(format!("invalid request line '{start_line}'"));
        }

        Ok(Self {
            method,
            uri,
            version,
            headers,
            body,
        })
    }
}

impl EnvelopeMessage for SubResponse {
    fn from_parts(start_line: &str, headers: HeaderMap, body: Bytes) -> Result<Self, String> {
        let mut tokens = start_line.splitn(3, ' ');
        let (Some(version), Some(code)) = (tokens.next(), tokens.next()) else {
            return Err(format!("invalid status line '{start_line}'"));
        };

        let version =
            parse_version(version).ok_or_else(|| format!("unsupported HTTP version '{version}'"))?;
        let status = StatusCode::from_bytes(code.trim().as_bytes())
            .map_err(|_| format!("invalid status code '{code}'"))?;
        let reason = tokens
            .next()
            .map(str::trim)
            .filter(|reason| !reason.is_empty() && Some(*reason) != status.canonical_reason())
            .map(str::to_string);

        Ok(Self {
            status,
            reason,
            version,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Skipping bytes before the first delimiter.
    Preamble,
    /// Buffer starts with a delimiter line.
    Delimiter,
    /// Buffer starts with part content.
    Part,
    /// Close delimiter seen; everything else is epilogue.
    Done,
}

/// Outcome of searching for the next delimiter.
enum Search {
    /// Delimiter found; the index is where its line starts.
    Found(usize),
    /// Not (yet) found; resume scanning at the index once more data arrives.
    NeedMore(usize),
}

/// Incremental decoder for batch envelopes.
///
/// `T` selects the nested message kind: [`SubRequest`] for incoming batches,
/// [`SubResponse`] for batch responses.
#[derive(Debug)]
pub struct EnvelopeCodec<T> {
    /// `--` + boundary
    delimiter: Vec<u8>,
    /// `\n--` + boundary
    pattern: Vec<u8>,
    state: State,
    /// Absolute envelope offset of the first buffered byte
    consumed: usize,
    /// Resume point for the delimiter search
    scan_from: usize,
    message: PhantomData<fn() -> T>,
}

impl<T: EnvelopeMessage> EnvelopeCodec<T> {
    /// Create a codec for the given boundary.
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());

        let mut pattern = Vec::with_capacity(delimiter.len() + 1);
        pattern.push(b'\n');
        pattern.extend_from_slice(&delimiter);

        Self {
            delimiter,
            pattern,
            state: State::Preamble,
            consumed: 0,
            scan_from: 0,
            message: PhantomData,
        }
    }

    /// Whether the close delimiter has been reached.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn advance(&mut self, buf: &mut BytesMut, count: usize) {
        buf.advance(count);
        self.consumed += count;
        self.scan_from = 0;
    }

    fn decode_inner(&mut self, buf: &mut BytesMut, eof: bool) -> Result<Option<T>, ParseError> {
        loop {
            match self.state {
                State::Preamble => {
                    let start = if self.delimiter_at(buf, 0, eof) == Some(true) {
                        Some(0)
                    } else {
                        match self.find_delimiter(buf, eof) {
                            Search::Found(newline) => Some(newline + 1),
                            Search::NeedMore(resume) => {
                                self.scan_from = resume;
                                None
                            }
                        }
                    };

                    match start {
                        Some(start) => {
                            self.advance(buf, start);
                            self.state = State::Delimiter;
                        }
                        None if !eof => return Ok(None),
                        None if buf.iter().all(u8::is_ascii_whitespace) => {
                            self.state = State::Done;
                        }
                        None => {
                            return Err(ParseError::malformed(
                                self.consumed,
                                "missing opening boundary delimiter",
                            ));
                        }
                    }
                }
                State::Delimiter => match self.delimiter_line(buf, eof)? {
                    None => return Ok(None),
                    Some(DelimiterLine::Close) => self.state = State::Done,
                    Some(DelimiterLine::Open(len)) => {
                        self.advance(buf, len);
                        self.state = State::Part;
                    }
                },
                State::Part => {
                    if self.delimiter_at(buf, 0, eof) == Some(true) {
                        return Err(ParseError::malformed(self.consumed, "empty part"));
                    }

                    match self.find_delimiter(buf, eof) {
                        Search::Found(newline) => {
                            let end = if newline > 0 && buf[newline - 1] == b'\r' {
                                newline - 1
                            } else {
                                newline
                            };
                            let offset = self.consumed;
                            let part = buf.split_to(end).freeze();
                            self.consumed += end;
                            self.advance(buf, newline + 1 - end);
                            self.state = State::Delimiter;
                            return decode_part(&part, offset).map(Some);
                        }
                        Search::NeedMore(_) if eof => {
                            return Err(ParseError::malformed(
                                self.consumed + buf.len(),
                                "missing closing boundary delimiter",
                            ));
                        }
                        Search::NeedMore(resume) => {
                            self.scan_from = resume;
                            return Ok(None);
                        }
                    }
                }
                State::Done => {
                    self.consumed += buf.len();
                    buf.clear();
                    return Ok(None);
                }
            }
        }
    }

    /// Find the next `\n--boundary` that forms a real delimiter.
    fn find_delimiter(&self, buf: &[u8], eof: bool) -> Search {
        let mut from = self.scan_from;
        while let Some(found) = find(&buf[from.min(buf.len())..], &self.pattern) {
            let newline = from + found;
            match self.delimiter_at(buf, newline + 1, eof) {
                Some(true) => return Search::Found(newline),
                Some(false) => from = newline + 1,
                None => return Search::NeedMore(newline),
            }
        }
        Search::NeedMore(buf.len().saturating_sub(self.delimiter.len()))
    }

    /// Whether a delimiter starts at `at`.
    ///
    /// `None` means more input is needed to tell (e.g. `--boundary` followed by
    /// a single `-` at the end of the buffer).
    fn delimiter_at(&self, buf: &[u8], at: usize, eof: bool) -> Option<bool> {
        let rest = buf.get(at..)?;
        if rest.len() < self.delimiter.len() {
            return if !eof && self.delimiter.starts_with(rest) {
                None
            } else {
                Some(false)
            };
        }
        if !rest.starts_with(&self.delimiter) {
            return Some(false);
        }

        match rest.get(self.delimiter.len()..self.delimiter.len() + 2) {
            Some([b'-', b'-']) => Some(true),
            Some([b'-', _]) => Some(false),
            Some([b' ' | b'\t' | b'\r' | b'\n', _]) => Some(true),
            Some(_) => Some(false),
            None => match rest.get(self.delimiter.len()) {
                None | Some(b'-') if !eof => None,
                None | Some(b' ' | b'\t' | b'\r' | b'\n') => Some(true),
                _ => Some(false),
            },
        }
    }

    /// Classify the delimiter line at the start of the buffer.
    fn delimiter_line(&self, buf: &[u8], eof: bool) -> Result<Option<DelimiterLine>, ParseError> {
        let rest = &buf[self.delimiter.len().min(buf.len())..];
        if rest.starts_with(b"--") {
            return Ok(Some(DelimiterLine::Close));
        }

        let padding = rest
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t'))
            .count();
        let line_len = match &rest[padding..] {
            [b'\n', ..] => padding + 1,
            [b'\r', b'\n', ..] => padding + 2,
            [] | [b'\r'] | [b'-'] if !eof => return Ok(None),
            [] | [b'\r'] | [b'-'] => {
                return Err(ParseError::malformed(
                    self.consumed,
                    "unterminated boundary delimiter",
                ));
            }
            _ => {
                return Err(ParseError::malformed(
                    self.consumed + self.delimiter.len() + padding,
                    "unexpected bytes after boundary delimiter",
                ));
            }
        };

        Ok(Some(DelimiterLine::Open(self.delimiter.len() + line_len)))
    }
}

enum DelimiterLine {
    /// `--boundary` followed by a line break; the length covers the whole line.
    Open(usize),
    /// `--boundary--`
    Close,
}

impl<T: EnvelopeMessage> Decoder for EnvelopeCodec<T> {
    type Item = T;
    type Error = ParseError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<T>, ParseError> {
        self.decode_inner(buf, false)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<T>, ParseError> {
        self.decode_inner(buf, true)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Iterator over the lines of a part, yielding `(offset, line)` without terminators.
struct Lines<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Offset of the first byte not yet returned.
    const fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<&'a [u8]> {
        let rest = self.bytes.get(self.pos..).filter(|rest| !rest.is_empty())?;
        let end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
        Some(rest[..end].strip_suffix(b"\r").unwrap_or(&rest[..end]))
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.pos..).filter(|rest| !rest.is_empty())?;
        let start = self.pos;
        let (line, advance) = match rest.iter().position(|b| *b == b'\n') {
            Some(newline) => (&rest[..newline], newline + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        Some((start, line.strip_suffix(b"\r").unwrap_or(line)))
    }
}

/// Whether a line looks like `Name: value` (no whitespace before the colon).
fn is_header_line(line: &[u8]) -> bool {
    line.iter()
        .position(|b| *b == b':')
        .is_some_and(|colon| colon > 0 && !line[..colon].iter().any(u8::is_ascii_whitespace))
}

/// Decode one part: MIME headers, nested start line, nested headers, body.
fn decode_part<T: EnvelopeMessage>(part: &Bytes, offset: usize) -> Result<T, ParseError> {
    let mut lines = Lines::new(part);

    // MIME part headers, unless the part starts directly with the nested message.
    if lines.peek().is_some_and(|line| line.is_empty() || is_header_line(line)) {
        loop {
            let Some((at, line)) = lines.next() else {
                return Err(ParseError::malformed(offset, "unterminated part header block"));
            };
            if line.is_empty() {
                break;
            }
            let (name, value) = split_header(line, offset + at)?;
            if name.eq_ignore_ascii_case(b"content-type") {
                let media_type = value.split(|b| *b == b';').next().unwrap_or_default();
                if !media_type
                    .trim_ascii()
                    .eq_ignore_ascii_case(APPLICATION_HTTP.as_bytes())
                {
                    return Err(ParseError::malformed(
                        offset + at,
                        "part content type must be application/http",
                    ));
                }
            }
        }
    }

    let (at, start_line) = loop {
        match lines.next() {
            Some((_, [])) => {}
            Some(line) => break line,
            None => return Err(ParseError::malformed(offset, "missing nested start line")),
        }
    };
    let start_line = std::str::from_utf8(start_line)
        .map_err(|_| ParseError::malformed(offset + at, "start line is not valid UTF-8"))?;

    let mut raw_headers: Vec<(usize, &[u8], Vec<u8>)> = Vec::new();
    for (line_at, line) in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        if matches!(line.first(), Some(b' ' | b'\t')) {
            // obs-fold continuation
            let Some((_, _, value)) = raw_headers.last_mut() else {
                return Err(ParseError::malformed(
                    offset + line_at,
                    "header continuation without a header",
                ));
            };
            value.push(b' ');
            value.extend_from_slice(line.trim_ascii());
            continue;
        }
        let (name, value) = split_header(line, offset + line_at)?;
        raw_headers.push((offset + line_at, name, value.to_vec()));
    }

    let mut headers = HeaderMap::with_capacity(raw_headers.len());
    for (line_at, name, value) in raw_headers {
        let name = HeaderName::from_bytes(name)
            .map_err(|_| ParseError::malformed(line_at, "invalid header name"))?;
        let value = HeaderValue::from_bytes(&value)
            .map_err(|_| ParseError::malformed(line_at, "invalid header value"))?;
        headers.append(name, value);
    }

    let body = part.slice(lines.position().min(part.len())..);
    T::from_parts(start_line.trim(), headers, body)
        .map_err(|reason| ParseError::malformed(offset + at, reason))
}

fn split_header(line: &[u8], at: usize) -> Result<(&[u8], &[u8]), ParseError> {
    if !is_header_line(line) {
        return Err(ParseError::malformed(at, "invalid header line"));
    }
    let colon = line.iter().position(|b| *b == b':').unwrap_or_default();
    Ok((&line[..colon], line[colon + 1..].trim_ascii()))
}

/// Stream of decoded sub-requests over a body chunk stream.
pub type SubRequestStream<S> = FramedRead<StreamReader<S, Bytes>, EnvelopeCodec<SubRequest>>;

/// Decode sub-requests lazily from a body chunk stream.
///
/// Only the part currently being decoded is buffered. Dropping the returned
/// stream releases the underlying body.
pub fn request_stream<S>(boundary: &str, body: S) -> SubRequestStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    FramedRead::new(StreamReader::new(body), EnvelopeCodec::new(boundary))
}

/// Decode every part of an in-memory envelope.
fn decode_all<T: EnvelopeMessage>(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<T>, ParseError> {
    let boundary = parse_boundary(content_type)?;
    let mut codec = EnvelopeCodec::<T>::new(&boundary);
    let mut buf = BytesMut::from(body);
    let mut messages = Vec::new();
    while let Some(message) = codec.decode_eof(&mut buf)? {
        messages.push(message);
    }
    Ok(messages)
}

/// Parse a complete batch request envelope held in memory.
///
/// # Errors
///
/// Returns the content-type errors of [`parse_boundary`] or
/// [`ParseError::MalformedBody`] for a corrupt body.
pub fn parse_request_envelope(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<SubRequest>, ParseError> {
    decode_all(content_type, body)
}

/// Parse a complete batch response envelope held in memory.
///
/// # Errors
///
/// Returns the content-type errors of [`parse_boundary`] or
/// [`ParseError::MalformedBody`] for a corrupt body.
pub fn parse_response_envelope(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<SubResponse>, ParseError> {
    decode_all(content_type, body)
}
