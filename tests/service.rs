use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::Iter;
use http::StatusCode;
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};

use canopy::body::Body;
use canopy::transport::service::ServiceTransport;
use canopy::{ErrorCode, Payload, Request, Session};

async fn echo(request: http::Request<Body>) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let path = request.uri().path().to_owned();
    let method = request.method().clone();
    let trace = request
        .headers()
        .get("x-trace")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    let body = request.into_body().collect().await.unwrap().to_bytes();

    let response = match path.as_str() {
        "/missing" => http::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"missing"))),
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            http::Response::builder().body(Full::new(Bytes::new()))
        }
        "/compressed" => http::Response::builder()
            .header("x-uncompressed-content-length", "1000")
            .body(Full::new(Bytes::from_static(b"0123456789"))),
        _ => {
            let echo = serde_json::json!({
                "method": method.as_str(),
                "path": path,
                "trace": trace,
                "length": body.len(),
            });
            http::Response::builder()
                .header(http::header::CONTENT_TYPE, "application/json; charset=utf-8")
                .body(Full::new(Bytes::from(echo.to_string())))
        }
    };
    Ok(response.unwrap())
}

fn session() -> Session {
    let transport = ServiceTransport::new(
        tower::service_fn(echo),
        tokio::runtime::Handle::current(),
    );
    Session::builder().with_transport(transport).build()
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_end_to_end() {
    let _ = tracing_subscriber::fmt::try_init();

    let session = session();
    session.add_request_interceptor(|mut builder| {
        builder.add_header("x-trace", "abc");
        builder
    });

    let task = session.fetch("http://service.local/items").unwrap();
    let response = task.resolve().await.unwrap();

    assert_eq!(response.status(), Some(StatusCode::OK));
    assert_eq!(response.mime_type(), Some("application/json"));
    assert_eq!(response.text_encoding(), Some("utf-8"));

    let echo: serde_json::Value = response.json().unwrap();
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["path"], "/items");
    assert_eq!(echo["trace"], "abc");

    let metrics = task.metrics().unwrap();
    assert_eq!(metrics.transactions.len(), 1);
    assert_eq!(
        metrics.transactions[0].network_protocol_name.as_deref(),
        Some("http/1.1")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_bytes_and_file() {
    let session = session();

    let task = session
        .upload_bytes("http://service.local/upload", "twelve bytes")
        .unwrap();
    let echo: serde_json::Value = task.resolve().await.unwrap().json().unwrap();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["length"], 12);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.bin");
    std::fs::write(&path, vec![7u8; 300]).unwrap();

    let task = session
        .upload_file("http://service.local/upload", &path)
        .unwrap();
    let echo: serde_json::Value = task.resolve().await.unwrap().json().unwrap();
    assert_eq!(echo["length"], 300);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_writes_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ServiceTransport::new(
        tower::service_fn(echo),
        tokio::runtime::Handle::current(),
    )
    .with_download_dir(dir.path());
    let session = Session::builder().with_transport(transport).build();

    let response = session
        .download("http://service.local/report.json")
        .unwrap()
        .resolve()
        .await
        .unwrap();

    let Some(Payload::File(path)) = response.payload() else {
        panic!("expected a file payload, got {:?}", response.payload());
    };
    assert!(path.starts_with(dir.path()));
    assert_eq!(response.filename(), Some("report.json"));

    let echo: serde_json::Value = response.json().unwrap();
    assert_eq!(echo["path"], "/report.json");
}

#[tokio::test(flavor = "multi_thread")]
async fn error_status_fails_with_body() {
    let task = session().fetch("http://service.local/missing").unwrap();
    let error = task.resolve().await.unwrap_err();

    assert!(error.is_transport());
    assert_eq!(error.code(), Some(ErrorCode::Status(404)));
    assert_eq!(error.payload(), Some(&Payload::Bytes("missing".into())));
    assert!(error.headers().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn uncompressed_length_sets_progress_total() {
    let task = session().fetch("http://service.local/compressed").unwrap();
    task.resolve().await.unwrap();

    let progress = task.progress();
    assert_eq!(progress.total_unit_count(), Some(1000));
    assert_eq!(progress.completed_unit_count(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn request_timeout() {
    let mut builder = Request::builder("http://service.local/slow".parse().unwrap());
    builder.set_timeout(Duration::from_millis(50));

    let task = session().fetch_task(&builder.build());
    let error = task.resolve().await.unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::TimedOut));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_in_flight() {
    let _ = tracing_subscriber::fmt::try_init();

    let task = session().fetch("http://service.local/slow").unwrap();

    let resolving = {
        let task = task.clone();
        tokio::spawn(async move { task.resolve().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.cancel();

    let error = resolving.await.unwrap().unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_are_unsupported() {
    let task = session().stream_task("service.local", 9000);
    let error = task.resolve().await.unwrap_err();
    assert_eq!(error.code(), Some(ErrorCode::Unsupported));
}

type Chunks = StreamBody<Iter<std::vec::IntoIter<Result<Frame<Bytes>, std::io::Error>>>>;

async fn chunked(_: http::Request<Body>) -> Result<http::Response<Chunks>, Infallible> {
    let frames = vec![
        Ok(Frame::data(Bytes::from_static(b"leaf "))),
        Ok(Frame::data(Bytes::from_static(b"and "))),
        Ok(Frame::data(Bytes::from_static(b"branch"))),
    ];
    Ok(http::Response::new(StreamBody::new(futures_util::stream::iter(
        frames,
    ))))
}

#[tokio::test(flavor = "multi_thread")]
async fn streamed_body_is_collected() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = ServiceTransport::new(
        tower::service_fn(chunked),
        tokio::runtime::Handle::current(),
    );
    let session = Session::builder().with_transport(transport).build();

    let task = session.fetch("http://service.local/chunks").unwrap();
    let response = task.resolve().await.unwrap();
    assert_eq!(response.text().unwrap(), "leaf and branch");
    assert_eq!(task.progress().completed_unit_count(), 15);
}
