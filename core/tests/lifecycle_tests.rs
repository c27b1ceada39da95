//! Batch lifecycle tests: hook counts, abort, failure and rendering.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use bytes::Bytes;
use futures::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_batch_core::pipeline::ready;
use http_batch_core::{
    AbortReason, BatchConfig, BatchContext, BatchError, BatchEventPipeline, BatchExecutor,
    BatchHooks, BatchOutcome, BatchRun, BoxError, CancellationToken, FailureBodyPolicy, HookFuture,
    HookPoint, OuterRequest, ParseError, SubRequest, SubResponse, parse_response_envelope,
};
use http_batch_testing::{
    AbortOnFailureHooks, CountingHooks, EnvelopeBuilder, FailingHooks, HandledErrorHooks,
    HookCountSnapshot, SERVED_PATH_HEADER, ScriptedHandler, body_stream, chunked_body_stream,
    failing_body_stream, init_tracing,
};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::Notify;

fn executor(pipeline: BatchEventPipeline) -> BatchExecutor {
    BatchExecutor::new(BatchConfig::default(), pipeline)
}

fn four_parts() -> EnvelopeBuilder {
    EnvelopeBuilder::new()
        .get("/p1")
        .get("/p2")
        .get("/p3")
        .get("/p4")
}

async fn run(
    executor: &BatchExecutor,
    envelope: &EnvelopeBuilder,
    handler: &ScriptedHandler,
) -> BatchRun {
    init_tracing();
    executor
        .execute(
            OuterRequest::with_content_type(&envelope.content_type()),
            body_stream(envelope.build()),
            handler,
        )
        .await
        .expect("OnBatchEnd should not fail")
}

fn served_paths(responses: &[SubResponse]) -> Vec<String> {
    responses
        .iter()
        .map(|response| {
            response.headers[SERVED_PATH_HEADER]
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_all_parts_succeed() {
    let counts = CountingHooks::new();
    let executor = executor(BatchEventPipeline::new().with_hook(counts.clone()));
    let handler = ScriptedHandler::new();

    let run = run(&executor, &four_parts(), &handler).await;

    assert!(run.outcome.is_completed());
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(4));
    assert_eq!(counts.outcomes(), vec![("completed", 4)]);

    let response = run.render(executor.config());
    assert_eq!(response.status, StatusCode::OK);

    let text = String::from_utf8_lossy(&response.body).to_string();
    assert_eq!(text.matches("Content-Type: application/http").count(), 4);

    let parts = parse_response_envelope(response.content_type(), &response.body).unwrap();
    assert_eq!(served_paths(&parts), vec!["/p1", "/p2", "/p3", "/p4"]);
    assert_eq!(parts[0].body, "GET /p1");
}

#[tokio::test]
async fn test_abort_on_failed_sub_request() {
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(AbortOnFailureHooks),
    );
    let handler = ScriptedHandler::new().status("/p2", StatusCode::INTERNAL_SERVER_ERROR);

    let run = run(&executor, &four_parts(), &handler).await;

    match &run.outcome {
        BatchOutcome::Aborted { responses, reason } => {
            assert_eq!(served_paths(responses), vec!["/p1", "/p2"]);
            assert_eq!(
                *reason,
                AbortReason::Requested(Some("sub-request 1 returned 500".to_string()))
            );
        }
        other => panic!("expected aborted outcome, got {other:?}"),
    }
    assert_eq!(handler.paths(), vec!["/p1", "/p2"]);
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(2));
    assert_eq!(counts.outcomes(), vec![("aborted", 2)]);

    let response = run.render(executor.config());
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_abort_with_completed_parts_in_body() {
    let config = BatchConfig::default().with_failure_body(FailureBodyPolicy::IncludeCompleted);
    let executor = BatchExecutor::new(
        config,
        BatchEventPipeline::new().with_hook(AbortOnFailureHooks),
    );
    let handler = ScriptedHandler::new().status("/p2", StatusCode::BAD_GATEWAY);

    let response = run(&executor, &four_parts(), &handler)
        .await
        .render(executor.config());

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let parts = parse_response_envelope(response.content_type(), &response.body).unwrap();
    assert_eq!(served_paths(&parts), vec!["/p1", "/p2"]);
    assert_eq!(parts[1].status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_hook_raising_on_third_executing_call() {
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(FailingHooks::new(HookPoint::SubRequestExecuting, 3)),
    );
    let handler = ScriptedHandler::new();

    let run = run(&executor, &four_parts(), &handler).await;

    assert_eq!(
        counts.snapshot(),
        HookCountSnapshot {
            batch_start: 1,
            preparation: 3,
            executing: 3,
            executed: 2,
            batch_end: 1,
        }
    );
    assert_eq!(handler.call_count(), 2);
    assert!(matches!(
        run.outcome.error(),
        Some(BatchError::Hook {
            hook: HookPoint::SubRequestExecuting,
            index: Some(2),
            ..
        })
    ));
    assert_eq!(
        run.render(executor.config()).status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_hook_raising_on_second_executed_call() {
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(FailingHooks::new(HookPoint::SubRequestExecuted, 2)),
    );
    let handler = ScriptedHandler::new();

    let run = run(&executor, &four_parts(), &handler).await;

    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(2));
    assert_eq!(handler.paths(), vec!["/p1", "/p2"]);
    // The handler already ran for /p2, so its response is kept.
    assert_eq!(served_paths(run.outcome.responses()), vec!["/p1", "/p2"]);
    assert_eq!(counts.outcomes(), vec![("failed", 2)]);
    assert_eq!(run.outcome.error().unwrap().index(), Some(1));
    assert_eq!(
        run.render(executor.config()).status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

struct RaiseOnSecondExecuted {
    seen: AtomicUsize,
    set_on_context: bool,
}

impl BatchHooks for RaiseOnSecondExecuted {
    fn on_sub_request_executed<'a>(
        &'a self,
        context: &'a mut BatchContext,
        _request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 != 2 {
            return ready(Ok(()));
        }
        if self.set_on_context {
            context.set_exception("boom");
            ready(Ok(()))
        } else {
            ready(Err("boom".into()))
        }
    }
}

#[tokio::test]
async fn test_executed_failure_keeps_response_however_signalled() {
    let config = BatchConfig::default().with_failure_body(FailureBodyPolicy::IncludeCompleted);

    for set_on_context in [false, true] {
        let executor = BatchExecutor::new(
            config.clone(),
            BatchEventPipeline::new().with_hook(RaiseOnSecondExecuted {
                seen: AtomicUsize::new(0),
                set_on_context,
            }),
        );
        let handler = ScriptedHandler::new();

        let run = run(&executor, &four_parts(), &handler).await;

        assert_eq!(handler.call_count(), 2, "set_on_context={set_on_context}");
        assert!(run.outcome.is_failed());
        assert_eq!(
            served_paths(run.outcome.responses()),
            vec!["/p1", "/p2"],
            "set_on_context={set_on_context}"
        );

        let response = run.render(executor.config());
        let parts = parse_response_envelope(response.content_type(), &response.body).unwrap();
        assert_eq!(served_paths(&parts), vec!["/p1", "/p2"]);
    }
}

#[tokio::test]
async fn test_unrecognised_envelopes_fire_no_hooks() {
    let counts = CountingHooks::new();
    let executor = executor(BatchEventPipeline::new().with_hook(counts.clone()));
    let handler = ScriptedHandler::new();

    for content_type in ["application/json", "multipart/mixed", "multipart/mixed; boundary=\"\""] {
        let run = executor
            .execute(
                OuterRequest::with_content_type(content_type),
                body_stream(four_parts().build()),
                &handler,
            )
            .await
            .unwrap();

        assert!(run.outcome.is_rejected(), "{content_type}");
        assert_eq!(run.render(executor.config()).status, StatusCode::BAD_REQUEST);
    }

    assert_eq!(counts.snapshot(), HookCountSnapshot::default());
    assert_eq!(handler.call_count(), 0);
}

#[tokio::test]
async fn test_empty_envelope_completes() {
    let counts = CountingHooks::new();
    let executor = executor(BatchEventPipeline::new().with_hook(counts.clone()));

    let run = run(&executor, &EnvelopeBuilder::new(), &ScriptedHandler::new()).await;

    assert!(run.outcome.is_completed());
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(0));
    let response = run.render(executor.config());
    assert_eq!(response.status, StatusCode::OK);
    let parts = parse_response_envelope(response.content_type(), &response.body).unwrap();
    assert!(parts.is_empty());
}

struct PathLog;

impl BatchHooks for PathLog {
    fn on_batch_start<'a>(&'a self, context: &'a mut BatchContext) -> HookFuture<'a> {
        context.set_state(Vec::<String>::new());
        ready(Ok(()))
    }

    fn on_sub_request_executed<'a>(
        &'a self,
        context: &'a mut BatchContext,
        request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        Box::pin(async move {
            let paths = context
                .state_mut::<Vec<String>>()
                .ok_or("state slot not initialised")?;
            paths.push(request.uri.path().to_string());
            Ok::<(), BoxError>(())
        })
    }

    fn on_batch_end<'a>(
        &'a self,
        context: &'a mut BatchContext,
        _outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        let joined = context
            .take_state::<Vec<String>>()
            .unwrap_or_default()
            .join(",");
        context.response_mut().headers.insert(
            HeaderName::from_static("x-paths"),
            HeaderValue::from_str(&joined).unwrap(),
        );
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_state_slot_threads_through_hooks() {
    let executor = executor(BatchEventPipeline::new().with_hook(PathLog));

    let response = run(&executor, &four_parts(), &ScriptedHandler::new())
        .await
        .render(executor.config());

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["x-paths"], "/p1,/p2,/p3,/p4");
}

#[tokio::test]
async fn test_handled_response_skips_default_rendering() {
    let executor = executor(BatchEventPipeline::new().with_hook(HandledErrorHooks::default()));
    let handler = ScriptedHandler::new().fail_on("/p3");

    let run = run(&executor, &four_parts(), &handler).await;
    assert!(run.handled);
    assert!(matches!(
        run.outcome.error(),
        Some(BatchError::Handler { index: 2, .. })
    ));

    let response = run.render(executor.config());
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.body,
        "batch failed: Sub-request 2 failed: scripted failure for /p3"
    );
    assert_eq!(handler.paths(), vec!["/p1", "/p2", "/p3"]);
}

#[tokio::test]
async fn test_batch_start_failure_skips_every_sub_request() {
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(FailingHooks::new(HookPoint::BatchStart, 1)),
    );
    let handler = ScriptedHandler::new();

    let run = run(&executor, &four_parts(), &handler).await;

    assert_eq!(
        counts.snapshot(),
        HookCountSnapshot {
            batch_start: 1,
            batch_end: 1,
            ..HookCountSnapshot::default()
        }
    );
    assert_eq!(handler.call_count(), 0);
    assert!(matches!(
        run.outcome.error(),
        Some(BatchError::Hook {
            hook: HookPoint::BatchStart,
            index: None,
            ..
        })
    ));
}

#[tokio::test]
async fn test_batch_end_failure_is_fatal() {
    let executor = executor(
        BatchEventPipeline::new().with_hook(FailingHooks::new(HookPoint::BatchEnd, 1)),
    );
    let envelope = four_parts();

    let err = executor
        .execute(
            OuterRequest::with_content_type(&envelope.content_type()),
            body_stream(envelope.build()),
            &ScriptedHandler::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BatchError::Hook {
            hook: HookPoint::BatchEnd,
            ..
        }
    ));
}

#[tokio::test]
async fn test_malformed_part_fails_after_earlier_parts() {
    let counts = CountingHooks::new();
    let executor = executor(BatchEventPipeline::new().with_hook(counts.clone()));
    let envelope = EnvelopeBuilder::new()
        .get("/p1")
        .raw_part("Content-Type: text/plain\r\n\r\nGET /p2 HTTP/1.1\r\n")
        .get("/p3");
    let handler = ScriptedHandler::new();

    let run = run(&executor, &envelope, &handler).await;

    assert!(matches!(
        run.outcome.error(),
        Some(BatchError::Parse(ParseError::MalformedBody { .. }))
    ));
    assert_eq!(served_paths(run.outcome.responses()), vec!["/p1"]);
    assert_eq!(handler.paths(), vec!["/p1"]);
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(1));
}

#[tokio::test]
async fn test_missing_close_delimiter_fails_batch() {
    let executor = BatchExecutor::default();
    let envelope = EnvelopeBuilder::new().get("/p1").get("/p2").unterminated();

    let run = run(&executor, &envelope, &ScriptedHandler::new()).await;

    match run.outcome.error() {
        Some(BatchError::Parse(ParseError::MalformedBody { reason, .. })) => {
            assert_eq!(reason, "missing closing boundary delimiter");
        }
        other => panic!("expected malformed body, got {other:?}"),
    }
    assert_eq!(served_paths(run.outcome.responses()), vec!["/p1"]);
}

#[tokio::test]
async fn test_body_read_error_fails_batch() {
    let executor = BatchExecutor::default();
    let envelope = EnvelopeBuilder::new().get("/p1").get("/p2").unterminated();
    let handler = ScriptedHandler::new();

    let run = executor
        .execute(
            OuterRequest::with_content_type(&envelope.content_type()),
            failing_body_stream(envelope.build()),
            &handler,
        )
        .await
        .unwrap();

    assert!(matches!(
        run.outcome.error(),
        Some(BatchError::Parse(ParseError::Io(_)))
    ));
    assert_eq!(handler.paths(), vec!["/p1"]);
}

struct CancelAfterFirst(CancellationToken);

impl BatchHooks for CancelAfterFirst {
    fn on_sub_request_executed<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _request: &'a SubRequest,
        _response: &'a SubResponse,
    ) -> HookFuture<'a> {
        self.0.cancel();
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_cancellation_stops_between_sub_requests() {
    let cancel = CancellationToken::new();
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(CancelAfterFirst(cancel.clone())),
    );
    let envelope = four_parts();
    let handler = ScriptedHandler::new();

    let run = executor
        .execute_with_cancellation(
            OuterRequest::with_content_type(&envelope.content_type()),
            body_stream(envelope.build()),
            &handler,
            cancel,
        )
        .await
        .unwrap();

    assert!(matches!(
        run.outcome,
        BatchOutcome::Aborted {
            reason: AbortReason::Cancelled,
            ..
        }
    ));
    assert_eq!(served_paths(run.outcome.responses()), vec!["/p1"]);
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(1));
    assert_eq!(counts.outcomes(), vec![("aborted", 1)]);
}

#[tokio::test]
async fn test_cancellation_waits_for_in_flight_sub_request() {
    let cancel = CancellationToken::new();
    let counts = CountingHooks::new();
    let executor = executor(BatchEventPipeline::new().with_hook(counts.clone()));
    let envelope = four_parts();

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));
    let handler = {
        let (started, release, finished) =
            (Arc::clone(&started), Arc::clone(&release), Arc::clone(&finished));
        move |request: Request<Bytes>| {
            let (started, release, finished) =
                (Arc::clone(&started), Arc::clone(&release), Arc::clone(&finished));
            async move {
                started.notify_one();
                release.notified().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(Response::new(Bytes::from(request.uri().path().to_string())))
            }
        }
    };

    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            started.notified().await;
            cancel.cancel();
            release.notify_one();
        }
    });

    let run = executor
        .execute_with_cancellation(
            OuterRequest::with_content_type(&envelope.content_type()),
            body_stream(envelope.build()),
            &handler,
            cancel,
        )
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(counts.snapshot(), HookCountSnapshot::uniform(1));
    match &run.outcome {
        BatchOutcome::Aborted {
            responses,
            reason: AbortReason::Cancelled,
        } => {
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].body, "/p1");
        }
        other => panic!("expected cancelled outcome, got {other:?}"),
    }
}

/// Body stream that flags when it is dropped.
struct Guarded {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>,
    dropped: Arc<AtomicBool>,
}

impl Stream for Guarded {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Records, at `OnBatchEnd`, whether the body stream was already released.
struct ReleasedAtEnd {
    dropped: Arc<AtomicBool>,
    seen: Arc<Mutex<Option<bool>>>,
}

impl BatchHooks for ReleasedAtEnd {
    fn on_batch_end<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        _outcome: &'a BatchOutcome,
    ) -> HookFuture<'a> {
        *self.seen.lock().unwrap() = Some(self.dropped.load(Ordering::SeqCst));
        ready(Ok(()))
    }
}

async fn released_before_batch_end(
    pipeline: BatchEventPipeline,
    handler: &ScriptedHandler,
) -> (bool, &'static str) {
    let dropped = Arc::new(AtomicBool::new(false));
    let seen = Arc::new(Mutex::new(None));
    let executor = executor(pipeline.with_hook(ReleasedAtEnd {
        dropped: Arc::clone(&dropped),
        seen: Arc::clone(&seen),
    }));
    let envelope = four_parts();
    let body = Guarded {
        inner: Box::pin(body_stream(envelope.build())),
        dropped,
    };

    let run = executor
        .execute(OuterRequest::with_content_type(&envelope.content_type()), body, handler)
        .await
        .unwrap();

    let released = seen.lock().unwrap().expect("OnBatchEnd should run");
    (released, run.outcome.kind())
}

#[tokio::test]
async fn test_body_stream_released_on_every_exit_path() {
    init_tracing();

    let completed =
        released_before_batch_end(BatchEventPipeline::new(), &ScriptedHandler::new()).await;
    assert_eq!(completed, (true, "completed"));

    let aborted = released_before_batch_end(
        BatchEventPipeline::new().with_hook(AbortOnFailureHooks),
        &ScriptedHandler::new().status("/p1", StatusCode::BAD_REQUEST),
    )
    .await;
    assert_eq!(aborted, (true, "aborted"));

    let hook_error = released_before_batch_end(
        BatchEventPipeline::new().with_hook(FailingHooks::new(HookPoint::SubRequestExecuting, 2)),
        &ScriptedHandler::new(),
    )
    .await;
    assert_eq!(hook_error, (true, "failed"));

    let handler_error = released_before_batch_end(
        BatchEventPipeline::new(),
        &ScriptedHandler::new().fail_on("/p2"),
    )
    .await;
    assert_eq!(handler_error, (true, "failed"));

    let start_error = released_before_batch_end(
        BatchEventPipeline::new().with_hook(FailingHooks::new(HookPoint::BatchStart, 1)),
        &ScriptedHandler::new(),
    )
    .await;
    assert_eq!(start_error, (true, "failed"));
}

struct Rewrite;

impl BatchHooks for Rewrite {
    fn on_sub_request_preparation<'a>(
        &'a self,
        _context: &'a mut BatchContext,
        request: &'a mut SubRequest,
    ) -> HookFuture<'a> {
        request.uri = format!("/v2{}", request.uri.path()).parse().unwrap();
        request.headers.insert(
            HeaderName::from_static("x-rewritten"),
            HeaderValue::from_static("yes"),
        );
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_preparation_hook_rewrites_sub_request() {
    let executor = executor(BatchEventPipeline::new().with_hook(Rewrite));
    let handler = ScriptedHandler::new();

    run(&executor, &EnvelopeBuilder::new().get("/a"), &handler).await;

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/v2/a");
    assert_eq!(calls[0].headers["x-rewritten"], "yes");
}

struct AbortBefore(&'static str);

impl BatchHooks for AbortBefore {
    fn on_sub_request_preparation<'a>(
        &'a self,
        context: &'a mut BatchContext,
        request: &'a mut SubRequest,
    ) -> HookFuture<'a> {
        if request.uri.path() == self.0 {
            context.abort_with("vetoed");
        }
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_abort_during_preparation_skips_that_sub_request() {
    let counts = CountingHooks::new();
    let executor = executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(AbortBefore("/p2")),
    );
    let handler = ScriptedHandler::new();

    let run = run(&executor, &four_parts(), &handler).await;

    assert_eq!(
        counts.snapshot(),
        HookCountSnapshot {
            batch_start: 1,
            preparation: 2,
            executing: 1,
            executed: 1,
            batch_end: 1,
        }
    );
    assert_eq!(handler.paths(), vec!["/p1"]);
    assert!(matches!(
        &run.outcome,
        BatchOutcome::Aborted {
            reason: AbortReason::Requested(Some(reason)),
            ..
        } if reason == "vetoed"
    ));
}

struct RaiseOnNotFound;

impl BatchHooks for RaiseOnNotFound {
    fn on_sub_request_executed<'a>(
        &'a self,
        context: &'a mut BatchContext,
        _request: &'a SubRequest,
        response: &'a SubResponse,
    ) -> HookFuture<'a> {
        if response.status == StatusCode::NOT_FOUND {
            context.set_exception("resource vanished");
        }
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_exception_set_on_context_fails_batch() {
    let executor = executor(BatchEventPipeline::new().with_hook(RaiseOnNotFound));
    let handler = ScriptedHandler::new().status("/p3", StatusCode::NOT_FOUND);

    let run = run(&executor, &four_parts(), &handler).await;

    assert_eq!(
        run.outcome.error().unwrap().to_string(),
        "Batch failed: resource vanished"
    );
    assert_eq!(served_paths(run.outcome.responses()), vec!["/p1", "/p2", "/p3"]);
    assert_eq!(handler.call_count(), 3);
}

#[tokio::test]
async fn test_chunked_body_matches_single_chunk() {
    let envelope = EnvelopeBuilder::new()
        .request(
            "POST",
            "/notes",
            &[("Content-Type", "text/plain"), ("X-Trace", "a"), ("X-Trace", "b")],
            "line one\n--batch_tester\nline three",
        )
        .get("/p2")
        .request("PUT", "/notes/1", &[], "--");
    let executor = BatchExecutor::default();

    let expected = run(&executor, &envelope, &ScriptedHandler::new())
        .await
        .outcome
        .responses()
        .to_vec();
    assert_eq!(expected.len(), 3);
    assert_eq!(expected[0].body, "line one\n--batch_tester\nline three");

    for chunk_size in [1, 2, 5, 13, 64] {
        let handler = ScriptedHandler::new();
        let run = executor
            .execute(
                OuterRequest::with_content_type(&envelope.content_type()),
                chunked_body_stream(envelope.build(), chunk_size),
                &handler,
            )
            .await
            .unwrap();

        assert_eq!(run.outcome.responses(), expected.as_slice(), "chunk size {chunk_size}");
        let calls = handler.calls();
        assert_eq!(
            calls[0]
                .headers
                .get_all("x-trace")
                .iter()
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}

#[tokio::test]
async fn test_concurrent_batches_share_nothing() {
    let counts = CountingHooks::new();
    let executor = std::sync::Arc::new(executor(
        BatchEventPipeline::new()
            .with_hook(counts.clone())
            .with_hook(PathLog),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let executor = std::sync::Arc::clone(&executor);
            tokio::spawn(async move {
                let envelope = EnvelopeBuilder::new()
                    .get(&format!("/batch{i}/a"))
                    .get(&format!("/batch{i}/b"));
                let response = run(&executor, &envelope, &ScriptedHandler::new())
                    .await
                    .render(executor.config());
                (i, response)
            })
        })
        .collect();

    for task in tasks {
        let (i, response) = task.await.unwrap();
        assert_eq!(response.headers["x-paths"], format!("/batch{i}/a,/batch{i}/b"));
    }
    assert_eq!(counts.snapshot().batch_end, 8);
    assert_eq!(counts.snapshot().executed, 16);
}
