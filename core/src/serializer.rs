//! `multipart/mixed` envelope encoding.
//!
//! The serializer mirrors the parser: every part is an `application/http`
//! MIME part wrapping a complete nested HTTP message. Feeding its output back
//! through [`parse_response_envelope`](crate::parse_response_envelope)
//! reproduces each status code, header set and body.
//!
//! ```text
//! --batch_5d0e…
//! Content-Type: application/http; msgtype=response
//! Content-Transfer-Encoding: binary
//!
//! HTTP/1.1 200 OK
//! Content-Type: application/json
//!
//! {"id":1}
//! --batch_5d0e…--
//! ```

use crate::message::{SubRequest, SubResponse, version_str};
use crate::parser::{APPLICATION_HTTP, MULTIPART_MIXED};
use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderMap;
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";

/// An encoded envelope together with the boundary that frames it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBatch {
    boundary: String,
    body: Bytes,
}

impl SerializedBatch {
    /// The boundary token used for this envelope.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The encoded envelope.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume into the encoded envelope.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// `Content-Type` header value announcing this envelope.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("{MULTIPART_MIXED}; boundary=\"{}\"", self.boundary)
    }
}

/// Generate a fresh boundary token.
#[must_use]
pub fn new_boundary() -> String {
    format!("batch_{}", Uuid::new_v4())
}

/// Encode sub-responses under a freshly generated boundary.
///
/// Order is preserved; nothing is merged or deduplicated.
#[must_use]
pub fn serialize_responses(responses: &[SubResponse]) -> SerializedBatch {
    let boundary = new_boundary();
    let body = encode_responses(responses, &boundary);
    SerializedBatch { boundary, body }
}

/// Encode sub-responses under the given boundary.
#[must_use]
pub fn encode_responses(responses: &[SubResponse], boundary: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(estimate(responses.iter().map(|r| r.body.len())));
    for response in responses {
        open_part(&mut buf, boundary, "response");
        buf.put_slice(version_str(http::Version::HTTP_11).as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(response.status.as_str().as_bytes());
        let reason = response.reason_phrase();
        if !reason.is_empty() {
            buf.put_u8(b' ');
            buf.put_slice(reason.as_bytes());
        }
        buf.put_slice(CRLF);
        close_part(&mut buf, &response.headers, &response.body);
    }
    close_envelope(&mut buf, boundary);
    buf.freeze()
}

/// Encode sub-requests under a freshly generated boundary.
///
/// Produces request envelopes with the same framing the parser accepts,
/// for clients assembling batches.
#[must_use]
pub fn serialize_requests(requests: &[SubRequest]) -> SerializedBatch {
    let boundary = new_boundary();
    let mut buf = BytesMut::with_capacity(estimate(requests.iter().map(|r| r.body.len())));
    for request in requests {
        open_part(&mut buf, &boundary, "request");
        buf.put_slice(request.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(request.uri.to_string().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(version_str(request.version).as_bytes());
        buf.put_slice(CRLF);
        close_part(&mut buf, &request.headers, &request.body);
    }
    close_envelope(&mut buf, &boundary);
    SerializedBatch {
        boundary,
        body: buf.freeze(),
    }
}

fn estimate(bodies: impl Iterator<Item = usize>) -> usize {
    bodies.map(|len| len + 256).sum::<usize>() + 128
}

fn open_part(buf: &mut BytesMut, boundary: &str, msgtype: &str) {
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(APPLICATION_HTTP.as_bytes());
    buf.put_slice(b"; msgtype=");
    buf.put_slice(msgtype.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(b"Content-Transfer-Encoding: binary");
    buf.put_slice(CRLF);
    buf.put_slice(CRLF);
}

fn close_part(buf: &mut BytesMut, headers: &HeaderMap, body: &[u8]) {
    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(CRLF);
    }
    buf.put_slice(CRLF);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

fn close_envelope(buf: &mut BytesMut, boundary: &str) {
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"--");
    buf.put_slice(CRLF);
}
