//! Batch envelope fixtures.
//!
//! [`EnvelopeBuilder`] assembles request envelopes by hand, including the
//! irregular ones real clients produce (bare LF line endings, preambles,
//! missing close delimiters). The `*_stream` helpers turn an envelope into the
//! chunk stream [`BatchExecutor::execute`](http_batch_core::BatchExecutor::execute)
//! consumes.

use bytes::Bytes;
use futures::Stream;
use futures::stream;
use std::io;

/// Default boundary used by [`EnvelopeBuilder::new`].
pub const DEFAULT_BOUNDARY: &str = "batch_test";

/// Hand-assembled `multipart/mixed` request envelope.
///
/// # Example
///
/// ```
/// use http_batch_testing::EnvelopeBuilder;
///
/// let envelope = EnvelopeBuilder::new()
///     .get("/api/values/1")
///     .request("POST", "/api/values", &[("Content-Type", "text/plain")], "hello")
///     .build();
///
/// let text = String::from_utf8(envelope.to_vec()).unwrap();
/// assert!(text.starts_with("--batch_test\r\n"));
/// assert!(text.ends_with("--batch_test--\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    boundary: String,
    newline: &'static str,
    preamble: Option<String>,
    epilogue: Option<String>,
    parts: Vec<String>,
    close: bool,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder {
    /// Builder using [`DEFAULT_BOUNDARY`] and CRLF line endings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(DEFAULT_BOUNDARY)
    }

    /// Builder using a custom boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            newline: "\r\n",
            preamble: None,
            epilogue: None,
            parts: Vec::new(),
            close: true,
        }
    }

    /// Use bare LF line endings throughout.
    #[must_use]
    pub const fn lf(mut self) -> Self {
        self.newline = "\n";
        self
    }

    /// Text placed before the first delimiter.
    #[must_use]
    pub fn preamble(mut self, text: impl Into<String>) -> Self {
        self.preamble = Some(text.into());
        self
    }

    /// Text placed after the close delimiter.
    #[must_use]
    pub fn epilogue(mut self, text: impl Into<String>) -> Self {
        self.epilogue = Some(text.into());
        self
    }

    /// Leave out the close delimiter.
    #[must_use]
    pub const fn unterminated(mut self) -> Self {
        self.close = false;
        self
    }

    /// Append a `GET` part with no headers and no body.
    #[must_use]
    pub fn get(self, path: &str) -> Self {
        self.request("GET", path, &[], "")
    }

    /// Append a request part wrapped in `Content-Type: application/http`.
    #[must_use]
    pub fn request(self, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Self {
        let nl = self.newline;
        let mut part = format!("Content-Type: application/http{nl}{nl}{method} {path} HTTP/1.1{nl}");
        for (name, value) in headers {
            part.push_str(&format!("{name}: {value}{nl}"));
        }
        part.push_str(nl);
        part.push_str(body);
        self.raw_part(part)
    }

    /// Append a part verbatim; it is framed by delimiters but otherwise untouched.
    #[must_use]
    pub fn raw_part(mut self, part: impl Into<String>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// `Content-Type` header value announcing this envelope.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.boundary)
    }

    /// Number of parts added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether no part was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the envelope.
    #[must_use]
    pub fn build(&self) -> Bytes {
        let nl = self.newline;
        let boundary = &self.boundary;
        let mut out = String::new();

        if let Some(preamble) = &self.preamble {
            out.push_str(preamble);
            out.push_str(nl);
        }
        for part in &self.parts {
            out.push_str(&format!("--{boundary}{nl}"));
            out.push_str(part);
            out.push_str(nl);
        }
        if self.close {
            out.push_str(&format!("--{boundary}--{nl}"));
        }
        if let Some(epilogue) = &self.epilogue {
            out.push_str(epilogue);
        }

        Bytes::from(out)
    }
}

/// The whole envelope as a single chunk.
pub fn body_stream(
    envelope: impl Into<Bytes>,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static {
    stream::iter([Ok(envelope.into())])
}

/// The envelope split into chunks of at most `chunk_size` bytes.
///
/// Small chunk sizes exercise delimiters and header lines split across reads.
pub fn chunked_body_stream(
    envelope: impl Into<Bytes>,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static {
    let envelope = envelope.into();
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<_> = (0..envelope.len())
        .step_by(chunk_size)
        .map(|start| Ok(envelope.slice(start..(start + chunk_size).min(envelope.len()))))
        .collect();
    stream::iter(chunks)
}

/// A stream that yields `prefix` and then fails, as a dropped connection would.
pub fn failing_body_stream(
    prefix: impl Into<Bytes>,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static {
    stream::iter([
        Ok(prefix.into()),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_lf_envelope() {
        let envelope = EnvelopeBuilder::with_boundary("b").lf().get("/a").build();
        assert_eq!(
            envelope,
            "--b\nContent-Type: application/http\n\nGET /a HTTP/1.1\n\n\n--b--\n"
        );
    }

    #[test]
    fn test_unterminated_with_preamble() {
        let envelope = EnvelopeBuilder::with_boundary("b")
            .preamble("ignored")
            .raw_part("junk")
            .unterminated()
            .build();
        assert_eq!(envelope, "ignored\r\n--b\r\njunk\r\n");
    }

    #[tokio::test]
    async fn test_chunked_stream_reassembles() {
        let envelope = EnvelopeBuilder::new().get("/a").get("/b").build();
        let chunks: Vec<Bytes> = chunked_body_stream(envelope.clone(), 7)
            .map(|chunk| chunk.unwrap_or_default())
            .collect()
            .await;

        assert!(chunks.iter().all(|chunk| chunk.len() <= 7));
        assert_eq!(chunks.concat(), envelope.to_vec());
    }
}
