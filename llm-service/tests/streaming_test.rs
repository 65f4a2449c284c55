//! Streamed generation relayed over a chunked HTTP body.

mod common;

use common::{eventually, TestApp};
use futures::StreamExt;
use llm_service::services::providers::MockProvider;
use std::time::Duration;

#[tokio::test]
async fn fragments_arrive_in_order_and_session_is_removed() {
    let mock = MockProvider::new().with_fragments(["Hello", " world", "!"]);
    let app = TestApp::spawn(&mock).await;

    let response = app.post_stream("abc123", "greet me").await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));

    let text = response.text().await.expect("Failed to read body");
    assert_eq!(text, "Hello world!");

    assert!(
        eventually(Duration::from_secs(2), || !app.gateway.replies().contains("abc123")).await
    );
    assert_eq!(mock.released_streams(), 1);
}

#[tokio::test]
async fn concatenated_stream_matches_one_shot_reply() {
    let mock = MockProvider::new()
        .with_reply("The answer is 42.")
        .with_fragments(["The ", "answer ", "is ", "42."]);
    let app = TestApp::spawn(&mock).await;

    let streamed = app.post_stream("same", "q").await.text().await.unwrap();
    let one_shot: llm_service::models::Response<String> =
        app.post_query("q").await.json().await.unwrap();

    assert_eq!(streamed, one_shot.payload.unwrap());
}

#[tokio::test]
async fn duplicate_request_id_is_rejected_while_first_is_open() {
    let mock = MockProvider::new().with_fragments(["tick"]).hanging();
    let app = TestApp::spawn(&mock).await;

    let first = app.post_stream("dup-id", "ctx").await;
    assert_eq!(first.status().as_u16(), 200);
    let mut first_body = first.bytes_stream();
    let chunk = first_body.next().await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"tick");

    let second = app.post_stream("dup-id", "ctx").await;
    assert_eq!(second.status().as_u16(), 409);
    assert!(second
        .headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(mock.opened_streams(), 1);

    drop(first_body);
    assert!(
        eventually(Duration::from_secs(2), || !app.gateway.replies().contains("dup-id")).await
    );
}

#[tokio::test]
async fn upstream_failure_aborts_body_and_removes_session() {
    let mock = MockProvider::new()
        .with_fragments(["partial", " never"])
        .failing_after(1);
    let app = TestApp::spawn(&mock).await;

    let response = app.post_stream("fails", "ctx").await;
    assert_eq!(response.status().as_u16(), 200);

    let mut body = response.bytes_stream();
    let mut received = Vec::new();
    let mut errored = false;
    while let Some(item) = body.next().await {
        match item {
            Ok(bytes) => received.extend_from_slice(&bytes),
            Err(_) => {
                errored = true;
                break;
            }
        }
    }

    assert!(errored, "body should end with a transport error");
    assert_eq!(received, b"partial");
    assert!(
        eventually(Duration::from_secs(2), || !app.gateway.replies().contains("fails")).await
    );
    assert_eq!(mock.released_streams(), 1);
}

#[tokio::test]
async fn client_disconnect_releases_upstream() {
    let mock = MockProvider::new().with_fragments(["first"]).hanging();
    let app = TestApp::spawn(&mock).await;

    let response = app.post_stream("abandoned", "ctx").await;
    let mut body = response.bytes_stream();
    assert!(body.next().await.unwrap().is_ok());
    assert!(app.gateway.replies().contains("abandoned"));

    drop(body);

    assert!(
        eventually(Duration::from_secs(5), || {
            !app.gateway.replies().contains("abandoned")
        })
        .await,
        "abandoned session should be removed"
    );
    assert!(eventually(Duration::from_secs(5), || mock.released_streams() == 1).await);
}

#[tokio::test]
async fn failed_open_answers_plain_text_and_registers_nothing() {
    let app = TestApp::spawn(&MockProvider::new().disabled()).await;

    let response = app.post_stream("nope", "ctx").await;
    assert_eq!(response.status().as_u16(), 503);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert!(app.gateway.replies().is_empty());
}

#[tokio::test]
async fn overlong_request_id_is_rejected() {
    let app = TestApp::spawn(&MockProvider::new()).await;

    let response = app.post_stream(&"x".repeat(129), "ctx").await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn independent_streams_run_concurrently() {
    let mock = MockProvider::new().with_fragments(["a", "b", "c"]);
    let app = TestApp::spawn(&mock).await;

    let bodies = futures::future::join_all((0..8).map(|i| {
        let app = &app;
        async move {
            app.post_stream(&format!("req-{}", i), "ctx")
                .await
                .text()
                .await
                .unwrap()
        }
    }))
    .await;

    assert!(bodies.iter().all(|b| b == "abc"));
    assert!(eventually(Duration::from_secs(2), || app.gateway.replies().is_empty()).await);
}
