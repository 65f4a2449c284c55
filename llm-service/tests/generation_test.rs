//! One-shot generation over HTTP.

mod common;

use common::TestApp;
use llm_service::models::Response;
use llm_service::services::providers::MockProvider;

#[tokio::test]
async fn one_shot_query_returns_reply_in_envelope() {
    let mock = MockProvider::new().with_reply("42");
    let app = TestApp::spawn(&mock).await;

    let response = app
        .post_query("What is the meaning of life, the universe, and everything?")
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Response<String> = response.json().await.expect("Failed to parse JSON");
    assert!(body.is_success);
    assert_eq!(body.code, 200);
    assert!(body.payload.unwrap().contains("42"));
}

#[tokio::test]
async fn empty_context_is_rejected() {
    let app = TestApp::spawn(&MockProvider::new()).await;

    let response = app.post_query("").await;
    assert_eq!(response.status().as_u16(), 400);

    let body: Response<String> = response.json().await.expect("Failed to parse JSON");
    assert!(!body.is_success);
    assert_eq!(body.code, 400);
    assert!(body.payload.is_none());
}

#[tokio::test]
async fn malformed_body_is_rejected_with_envelope() {
    let app = TestApp::spawn(&MockProvider::new()).await;

    let response = app
        .client
        .post(app.url("/llm/queries"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 400);

    let body: Response<String> = response.json().await.expect("Failed to parse JSON");
    assert!(!body.is_success);
}

#[tokio::test]
async fn provider_failure_maps_to_status() {
    let app = TestApp::spawn(&MockProvider::new().disabled()).await;

    let response = app.post_query("hello").await;
    assert_eq!(response.status().as_u16(), 503);

    let body: Response<String> = response.json().await.expect("Failed to parse JSON");
    assert!(!body.is_success);
    assert_eq!(body.code, 503);
}
