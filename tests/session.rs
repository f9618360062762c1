use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;

use canopy::auth::{
    AuthenticationMethod, Challenge, Credential, Disposition, PinnedCertificates, ServerTrust,
};
use canopy::task::{TaskMetrics, TaskState};
use canopy::transport::mock::{ok, status, MockTransport};
use canopy::transport::ByteCounters;
use canopy::{ErrorCode, Request, Session};

fn request() -> Request {
    Request::get("https://api.example.com/items").unwrap()
}

#[derive(Debug, Default, Clone)]
struct Calls {
    successes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl Calls {
    fn consume(&self, task: &canopy::Task) {
        let successes = self.successes.clone();
        let failures = self.failures.clone();
        task.consume(
            move |_| {
                successes.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            },
        );
    }

    fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[test]
fn fetch_resolves_with_response() {
    let transport = MockTransport::new();
    transport.push(ok("hello"));
    let session = Session::builder().with_transport(transport.clone()).build();

    let task = session.fetch_task(&request());
    assert_eq!(task.state(), TaskState::Suspended);
    assert_eq!(transport.submissions(), 1);

    let response = task.blocking_consume().unwrap();
    assert_eq!(response.text().unwrap(), "hello");
    assert_eq!(response.status(), Some(StatusCode::OK));
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.progress().completed_unit_count(), 5);

    let id = response.task_id().unwrap();
    assert_eq!(session.task(id), Some(task.clone()));
    assert_eq!(transport.last().unwrap().calls(), vec!["resume"]);
}

#[test]
fn second_consumer_has_no_effect() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let task = session.fetch_task(&request());

    let first = Calls::default();
    let second = Calls::default();
    first.consume(&task);
    second.consume(&task);
    assert_eq!(task.state(), TaskState::Running);

    transport.last().unwrap().finish();
    assert_eq!(first.successes(), 1);
    assert_eq!(second.successes() + second.failures(), 0);

    let response = task.blocking_consume().unwrap();
    assert_eq!(response.status(), Some(StatusCode::OK));
}

#[test]
fn retries_keep_the_task_identity() {
    let transport = MockTransport::new();
    for _ in 0..3 {
        transport.push(status(StatusCode::INTERNAL_SERVER_ERROR));
    }
    transport.push(ok("done"));
    let session = Session::builder().with_transport(transport.clone()).build();

    let task = session.fetch_task(&request());
    let id = task.id();
    task.retry(|_, error, _| error.is_some());

    let response = task.blocking_consume().unwrap();
    assert_eq!(response.text().unwrap(), "done");
    assert_eq!(task.retry_count(), 3);
    assert_eq!(task.id(), id);
    assert_eq!(response.task_id(), Some(id));
    assert_eq!(transport.submissions(), 4);
}

#[test]
fn service_unavailable_retried_twice() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MockTransport::new();
    for _ in 0..3 {
        transport.push(status(StatusCode::SERVICE_UNAVAILABLE));
    }
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_retry_policy(|_, error, count| error.is_some() && count < 2)
        .build();

    let task = session.fetch_task(&request());
    let last_error = Arc::new(Mutex::new(None));
    let calls = Calls::default();
    {
        let failures = calls.failures.clone();
        let last_error = last_error.clone();
        task.consume(
            |_| panic!("a 503 must not succeed"),
            move |error| {
                failures.fetch_add(1, Ordering::SeqCst);
                *last_error.lock() = Some(error);
            },
        );
    }

    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.retry_count(), 2);
    assert_eq!(calls.failures(), 1);
    assert_eq!(transport.submissions(), 3);

    let error = last_error.lock().take().unwrap();
    assert!(error.is_transport());
    assert_eq!(error.code(), Some(ErrorCode::Status(503)));
    assert!(task.response().is_none());
}

#[test]
fn task_policy_is_asked_before_session_policy() {
    let transport = MockTransport::new();
    transport.push(status(StatusCode::BAD_GATEWAY));
    transport.push(ok(""));
    let asked = Arc::new(AtomicUsize::new(0));
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_retry_policy(|_, _, count| count < 1)
        .build();

    let task = session.fetch_task(&request());
    let counter = asked.clone();
    task.retry(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    });

    assert!(task.blocking_consume().is_ok());
    assert_eq!(task.retry_count(), 1);
    assert_eq!(asked.load(Ordering::SeqCst), 2);
}

#[test]
fn tasks_without_requests_are_not_retried() {
    let transport = MockTransport::new();
    transport.push(status(StatusCode::SERVICE_UNAVAILABLE));
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_retry_policy(|_, _, _| true)
        .build();

    let task = session.download_task_resuming(Bytes::from_static(b"resume"));
    assert!(task.request().is_none());
    assert!(task.blocking_consume().is_err());
    assert_eq!(task.retry_count(), 0);
    assert_eq!(transport.last().unwrap().kind(), "resume-download");
}

#[test]
fn blocking_consume_hangs_until_resolved() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let task = session.fetch_task(&request());

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let task = task.clone();
        std::thread::spawn(move || {
            let _ = tx.send(task.blocking_consume());
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    while transport.last().map_or(true, |h| h.calls().is_empty()) {
        std::thread::yield_now();
    }
    transport.last().unwrap().finish();

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(result.is_ok());
    waiter.join().unwrap();
}

#[test]
fn blocking_consume_timeout_leaves_task_running() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let task = session.fetch_task(&request());

    let error = task
        .blocking_consume_timeout(Duration::from_millis(20))
        .unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::TimedOut));
    assert_eq!(task.state(), TaskState::Running);

    transport.last().unwrap().finish();
    assert_eq!(task.state(), TaskState::Completed);
}

#[test]
fn interceptors_rewrite_requests_and_responses() {
    let transport = MockTransport::new();
    transport.push(ok("{}"));
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_request_interceptor(|mut builder| {
            builder.add_header("x-trace", "one");
            builder
        })
        .build();
    session.add_request_interceptor(|mut builder| {
        builder.add_header("x-order", "second");
        builder
    });
    session.add_response_interceptor(|mut builder| {
        builder.set_status_description(Some("intercepted".into()));
        builder
    });

    let original = request();
    let task = session.fetch_task(&original);
    let response = task.blocking_consume().unwrap();
    assert_eq!(response.status_description(), Some("intercepted"));

    let handle = transport.last().unwrap();
    let parts = handle.request().unwrap();
    assert_eq!(parts.headers["x-trace"], "one");
    assert_eq!(parts.headers["x-order"], "second");
    assert!(task.request().unwrap().headers().get("x-trace").is_none());
}

#[test]
fn progress_controls_reach_the_transfer() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let task = session.download_task(&request());

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        task.on_progress(move |progress| seen.lock().push(progress.fraction_completed()));
    }
    Calls::default().consume(&task);

    let handle = transport.last().unwrap();
    handle.emit_progress(
        ByteCounters {
            received: 50,
            expected_to_receive: Some(100),
            ..Default::default()
        },
        None,
    );
    assert_eq!(*seen.lock(), vec![Some(0.5)]);

    let progress = task.progress();
    progress.pause();
    assert_eq!(task.state(), TaskState::Suspended);
    progress.resume();
    assert_eq!(task.state(), TaskState::Running);
    assert_eq!(handle.calls(), vec!["resume", "suspend", "resume"]);

    handle.finish();
    assert!(handle.is_released());
    assert_eq!(task.state(), TaskState::Completed);
}

#[test]
fn cancelled_transfers_fail_without_retry() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MockTransport::holding();
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_retry_policy(|_, _, _| true)
        .build();
    let task = session.fetch_task(&request());
    let calls = Calls::default();
    calls.consume(&task);

    task.cancel();
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.error().and_then(|e| e.code()), Some(ErrorCode::Cancelled));
    assert_eq!(task.retry_count(), 0);
    assert_eq!(calls.failures(), 1);
    assert_eq!(transport.submissions(), 1);
}

#[test]
fn waiting_for_connectivity_and_metrics() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let task = session.fetch_task(&request());
    Calls::default().consume(&task);

    let handle = transport.last().unwrap();
    handle.emit_waiting_for_connectivity();
    assert_eq!(task.state(), TaskState::WaitingForConnectivity);

    handle.emit_metrics(TaskMetrics {
        redirect_count: 2,
        ..Default::default()
    });
    handle.finish();
    assert_eq!(task.metrics().map(|m| m.redirect_count), Some(2));
    assert_eq!(task.state(), TaskState::Completed);
}

#[test]
fn default_challenge_handling() {
    let transport = MockTransport::holding();
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_server_trust(
            "pinned.example",
            PinnedCertificates(vec![Bytes::from_static(b"pin")]),
        )
        .build();

    let mut builder = request().to_builder();
    builder.set_basic_authorization("ada", "lovelace");
    let task = session.fetch_task(&builder.build());
    let handle = transport.last().unwrap();

    let basic = Challenge::new("api.example.com", 443, AuthenticationMethod::HttpBasic);
    assert_eq!(
        handle.challenge(&basic),
        Some((
            Disposition::UseCredential,
            Some(Credential::password("ada", "lovelace"))
        ))
    );

    let mut trust = Challenge::new("pinned.example", 443, AuthenticationMethod::ServerTrust);
    trust.server_trust = Some(ServerTrust::new(vec![Bytes::from_static(b"other")]));
    assert_eq!(
        handle.challenge(&trust).map(|answer| answer.0),
        Some(Disposition::CancelAuthenticationChallenge)
    );

    handle.finish();
    assert!(handle.challenge(&basic).is_none());
    drop(task);
}

#[test]
fn custom_challenge_handler_decides() {
    let transport = MockTransport::holding();
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_auth_challenge(|_| (Disposition::PerformDefaultHandling, None))
        .build();
    let _task = session.fetch_task(&request());

    let mut challenge = Challenge::new("api.example.com", 443, AuthenticationMethod::HttpBasic);
    challenge.previous_failure_count = 3;
    assert_eq!(
        transport.last().unwrap().challenge(&challenge),
        Some((Disposition::PerformDefaultHandling, None))
    );
}

#[test]
fn upload_and_stream_tasks_submit_their_kind() {
    let transport = MockTransport::new();
    let session = Session::builder().with_transport(transport.clone()).build();

    let upload = session
        .upload_bytes("https://api.example.com/items", "payload")
        .unwrap();
    assert!(upload.blocking_consume().is_ok());
    let handle = transport.last().unwrap();
    assert_eq!(handle.kind(), "upload");
    assert_eq!(handle.request().unwrap().method, http::Method::POST);

    let stream = session.stream_task("api.example.com", 8443);
    assert!(stream.blocking_consume().is_ok());
    assert_eq!(transport.last().unwrap().kind(), "stream");
}

#[tokio::test]
async fn resolve_awaits_outcome() {
    let transport = MockTransport::new();
    transport.push(ok("[1, 2, 3]"));
    let session = Session::builder().with_transport(transport).build();

    let task = session.fetch_task(&request());
    let response = task.resolve().await.unwrap();
    let values: Vec<u32> = response.json().unwrap();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn shared_session_is_not_connected_by_default() {
    let task = Session::shared()
        .fetch("https://api.example.com/items")
        .unwrap();
    let error = task.blocking_consume().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::NotConnected));
}

#[test]
fn unconsumed_tasks_are_freed() {
    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();

    let task = session.fetch_task(&request());
    let id = task.id();
    drop(task);
    assert!(session.task(id).is_none());

    let handle = transport.last().unwrap();
    handle.emit_progress(ByteCounters::default(), None);
    handle.finish();
}

#[test]
fn started_tasks_outlive_their_handles() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MockTransport::holding();
    let session = Session::builder().with_transport(transport.clone()).build();
    let calls = Calls::default();

    let task = session.fetch_task(&request());
    let id = task.id();
    calls.consume(&task);
    drop(task);
    assert!(session.task(id).is_some());

    transport.last().unwrap().finish();
    assert_eq!(calls.successes(), 1);
    assert!(session.task(id).is_none());
}

#[test]
fn superseded_attempts_are_ignored() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MockTransport::holding();
    let session = Session::builder()
        .with_transport(transport.clone())
        .with_retry_policy(|_, error, count| error.is_some() && count < 1)
        .build();

    let task = session.fetch_task(&request());
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        task.on_progress(move |progress| seen.lock().push(progress.completed_unit_count()));
    }
    let calls = Calls::default();
    calls.consume(&task);

    let first = transport.last().unwrap();
    let stale = first.listener().unwrap();
    first.complete(status(StatusCode::BAD_GATEWAY));
    assert_eq!(task.retry_count(), 1);
    assert_eq!(task.state(), TaskState::Running);
    assert_eq!(transport.submissions(), 2);

    stale.progress(
        ByteCounters {
            received: 900,
            expected_to_receive: Some(1000),
            ..Default::default()
        },
        None,
    );
    stale.waiting_for_connectivity();
    stale.metrics(TaskMetrics::default());
    stale.complete(ok("late"));
    assert!(seen.lock().is_empty());
    assert_eq!(task.state(), TaskState::Running);
    assert!(task.metrics().is_none());
    assert_eq!(calls.successes() + calls.failures(), 0);

    let second = transport.last().unwrap();
    second.emit_progress(
        ByteCounters {
            received: 5,
            expected_to_receive: Some(5),
            ..Default::default()
        },
        None,
    );
    second.complete(ok("fresh"));
    assert_eq!(*seen.lock(), vec![5]);
    assert_eq!(calls.successes(), 1);
    assert_eq!(task.response().unwrap().text().unwrap(), "fresh");
}
