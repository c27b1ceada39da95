//! `proptest` strategies for envelope messages.
//!
//! Generated values survive a trip through the serializer and parser
//! unchanged: header values carry no surrounding whitespace and bodies are
//! arbitrary bytes.

#![allow(clippy::unwrap_used)] // Generated inputs are valid by construction

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_batch_core::{SubRequest, SubResponse};
use proptest::collection::vec;
use proptest::prelude::*;

/// A common request method.
pub fn arb_method() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::GET),
        Just(Method::POST),
        Just(Method::PUT),
        Just(Method::PATCH),
        Just(Method::DELETE),
    ]
}

/// An origin-form URI with an optional query.
pub fn arb_uri() -> impl Strategy<Value = Uri> {
    (vec("[a-z0-9_]{1,8}", 1..4), proptest::option::of("[a-z]{1,5}=[0-9]{1,3}"))
        .prop_map(|(segments, query)| {
            let mut uri = format!("/{}", segments.join("/"));
            if let Some(query) = query {
                uri.push('?');
                uri.push_str(&query);
            }
            uri.parse().unwrap()
        })
}

/// Up to four headers, repeated names allowed.
pub fn arb_headers() -> impl Strategy<Value = HeaderMap> {
    vec(("x-[a-z]{1,6}", "[A-Za-z0-9][A-Za-z0-9 ,;=/.-]{0,18}[A-Za-z0-9]"), 0..4).prop_map(
        |pairs| {
            let mut headers = HeaderMap::new();
            for (name, value) in pairs {
                headers.append(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_str(&value).unwrap(),
                );
            }
            headers
        },
    )
}

/// Arbitrary body bytes.
pub fn arb_body() -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 0..256)
}

/// A status code between 100 and 599.
pub fn arb_status() -> impl Strategy<Value = StatusCode> {
    (100_u16..600).prop_map(|code| StatusCode::from_u16(code).unwrap())
}

/// A complete sub-request.
pub fn arb_sub_request() -> impl Strategy<Value = SubRequest> {
    (arb_method(), arb_uri(), arb_headers(), arb_body()).prop_map(
        |(method, uri, headers, body)| {
            let mut request = SubRequest::new(method, uri).with_body(body);
            request.headers = headers;
            request
        },
    )
}

/// A complete sub-response.
pub fn arb_sub_response() -> impl Strategy<Value = SubResponse> {
    (arb_status(), arb_headers(), arb_body()).prop_map(|(status, headers, body)| {
        let mut response = SubResponse::new(status).with_body(body);
        response.headers = headers;
        response
    })
}
