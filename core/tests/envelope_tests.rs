//! Parser and serializer properties over generated envelopes.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use bytes::Bytes;
use futures::TryStreamExt;
use http_batch_core::{
    SubRequest, parse_request_envelope, parse_response_envelope, request_stream,
    serialize_requests, serialize_responses,
};
use http_batch_testing::strategies::{arb_sub_request, arb_sub_response};
use http_batch_testing::{EnvelopeBuilder, chunked_body_stream};
use proptest::collection::vec;
use proptest::prelude::*;

fn decode_chunked(boundary: &str, envelope: Bytes, chunk_size: usize) -> Vec<SubRequest> {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(
            request_stream(boundary, chunked_body_stream(envelope, chunk_size))
                .try_collect::<Vec<_>>(),
        )
        .unwrap()
}

proptest! {
    #[test]
    fn prop_responses_survive_round_trip(responses in vec(arb_sub_response(), 0..6)) {
        let batch = serialize_responses(&responses);
        let parsed = parse_response_envelope(Some(&batch.content_type()), batch.body()).unwrap();
        prop_assert_eq!(parsed, responses);
    }

    #[test]
    fn prop_request_parsing_is_idempotent(requests in vec(arb_sub_request(), 0..6)) {
        let batch = serialize_requests(&requests);
        let content_type = batch.content_type();

        let first = parse_request_envelope(Some(&content_type), batch.body()).unwrap();
        let second = parse_request_envelope(Some(&content_type), batch.body()).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, requests);
    }

    #[test]
    fn prop_chunking_does_not_change_result(
        requests in vec(arb_sub_request(), 1..5),
        chunk_size in 1_usize..48,
    ) {
        let batch = serialize_requests(&requests);
        let streamed = decode_chunked(batch.boundary(), batch.body().clone(), chunk_size);
        prop_assert_eq!(streamed, requests);
    }
}

#[test]
fn test_boundary_open_and_close_markers_agree() {
    let batch = serialize_responses(&[http_batch_core::SubResponse::new(http::StatusCode::OK)]);
    let text = String::from_utf8(batch.body().to_vec()).unwrap();

    assert!(text.starts_with(&format!("--{}\r\n", batch.boundary())));
    assert!(text.ends_with(&format!("--{}--\r\n", batch.boundary())));
}

#[test]
fn test_lf_and_crlf_envelopes_parse_identically() {
    let build = |builder: EnvelopeBuilder| {
        builder
            .request("POST", "/items", &[("Content-Type", "application/json")], "{\"a\":1}")
            .get("/items/1")
    };
    let crlf = build(EnvelopeBuilder::new());
    let lf = build(EnvelopeBuilder::new().lf());

    let from_crlf = parse_request_envelope(Some(&crlf.content_type()), &crlf.build()).unwrap();
    let from_lf = parse_request_envelope(Some(&lf.content_type()), &lf.build()).unwrap();

    assert_eq!(from_crlf, from_lf);
    assert_eq!(from_crlf[0].body, "{\"a\":1}");
}

#[test]
fn test_preamble_and_epilogue_are_ignored() {
    let envelope = EnvelopeBuilder::new()
        .preamble("This is a multi-part message in MIME format.")
        .get("/a")
        .epilogue("trailing noise");

    let parsed = parse_request_envelope(Some(&envelope.content_type()), &envelope.build()).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].uri, "/a");
}

#[test]
fn test_canonical_reason_round_trips_to_equal_value() {
    use http::StatusCode;
    use http_batch_core::SubResponse;

    let responses = [
        SubResponse::new(StatusCode::OK).with_reason("OK"),
        SubResponse::new(StatusCode::IM_A_TEAPOT).with_reason("Short And Stout"),
    ];
    let batch = serialize_responses(&responses);
    let parsed = parse_response_envelope(Some(&batch.content_type()), batch.body()).unwrap();

    assert_eq!(parsed, responses);
    assert_eq!(parsed[0].reason, None);
}
