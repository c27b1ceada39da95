//! Sub-request and sub-response messages carried inside batch envelopes.
//!
//! Each part of an envelope holds a complete nested HTTP message. On the way
//! in that message is a [`SubRequest`]; on the way out it is a [`SubResponse`].
//! Bodies are [`Bytes`] slices of the part they were decoded from, so handing a
//! body to a handler or to the serializer never copies it.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

/// One decoded unit of a batch envelope.
///
/// Headers are an ordered multi-map: repeated header names keep every value
/// in the order they appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequest {
    /// Request method
    pub method: Method,
    /// Request target (origin-form path or absolute URI)
    pub uri: Uri,
    /// HTTP version from the request line
    pub version: Version,
    /// Inner request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl SubRequest {
    /// Create a sub-request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header, keeping any existing values for the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Synthesize the inner request handed to the handler.
    #[must_use]
    pub fn into_http(self) -> Request<Bytes> {
        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        request
    }
}

impl From<Request<Bytes>> for SubRequest {
    fn from(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }
}

/// The result of executing one [`SubRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubResponse {
    /// Status code
    pub status: StatusCode,
    /// Custom reason phrase; `None` means the standard text for `status`
    pub reason: Option<String>,
    /// HTTP version reported by the handler
    pub version: Version,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl SubResponse {
    /// Create a response with no headers and an empty body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header, keeping any existing values for the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a custom reason phrase.
    ///
    /// A phrase equal to the status code's canonical reason is stored as
    /// `None`, matching what the envelope parser produces.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = (Some(reason.as_str()) != self.status.canonical_reason()).then_some(reason);
        self
    }

    /// The reason phrase written on the status line.
    #[must_use]
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// Whether the status code is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Convert back into an [`http::Response`]; the reason phrase is dropped.
    #[must_use]
    pub fn into_http(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }
}

impl From<Response<Bytes>> for SubResponse {
    fn from(response: Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            reason: None,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }
}

/// Textual form of an HTTP version as written on start lines.
pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

/// Parse the version token of a start line.
pub(crate) fn parse_version(token: &str) -> Option<Version> {
    match token.to_ascii_uppercase().as_str() {
        "HTTP/1.1" => Some(Version::HTTP_11),
        "HTTP/1.0" => Some(Version::HTTP_10),
        "HTTP/2" | "HTTP/2.0" => Some(Version::HTTP_2),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use http::header::{ACCEPT, CONTENT_TYPE};

    #[test]
    fn test_reason_phrase_defaults_to_canonical() {
        let response = SubResponse::new(StatusCode::NOT_FOUND);
        assert_eq!(response.reason_phrase(), "Not Found");

        let custom = response.with_reason("Nothing Here");
        assert_eq!(custom.reason_phrase(), "Nothing Here");
    }

    #[test]
    fn test_canonical_reason_is_normalised() {
        let response = SubResponse::new(StatusCode::OK).with_reason("OK");
        assert_eq!(response.reason, None);
        assert_eq!(response, SubResponse::new(StatusCode::OK));
        assert_eq!(response.reason_phrase(), "OK");
    }

    #[test]
    fn test_into_http_keeps_duplicate_headers() {
        let request = SubRequest::new(Method::GET, Uri::from_static("/api/values"))
            .with_header(ACCEPT, HeaderValue::from_static("text/plain"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));

        let http = request.into_http();
        let values: Vec<_> = http.headers().get_all(ACCEPT).iter().collect();
        assert_eq!(values, ["text/plain", "application/json"]);
        assert_eq!(http.method(), Method::GET);
        assert_eq!(http.uri().path(), "/api/values");
    }

    #[test]
    fn test_response_from_http() {
        let http = Response::builder()
            .status(StatusCode::CREATED)
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{}"))
            .unwrap();

        let response = SubResponse::from(http);
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        assert_eq!(response.body, Bytes::from_static(b"{}"));
        assert!(response.is_success());
    }

    #[test]
    fn test_version_tokens() {
        assert_eq!(parse_version("HTTP/1.1"), Some(Version::HTTP_11));
        assert_eq!(parse_version("http/1.0"), Some(Version::HTTP_10));
        assert_eq!(parse_version("HTTP/2.0"), Some(Version::HTTP_2));
        assert_eq!(parse_version("HTTP/9"), None);
        assert_eq!(version_str(Version::HTTP_11), "HTTP/1.1");
    }
}
