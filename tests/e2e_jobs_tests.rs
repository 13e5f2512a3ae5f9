//! End-to-end tests for image jobs
//!
//! Covers asynchronous job creation and polling, ownership checks and the
//! inline endpoints with their timeout.

mod common;

use common::{TestClient, TestServer, FAKE_IMAGE_URL, PIXEL_PNG_BASE64, SYNC_TIMEOUT_MS};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};

fn inline_png() -> String {
    format!("data:image/png;base64,{}", PIXEL_PNG_BASE64)
}

#[tokio::test]
async fn test_generate_job_is_accepted_then_completes() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let response = client.create_generate_job("a lighthouse at dusk").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["job"]["status"], "pending");
    assert_eq!(body["job"]["type"], "generate");
    assert_eq!(body["job"]["data"]["prompt"], "a lighthouse at dusk");
    assert!(body["job"].get("result").is_none());

    let job_id = body["job"]["id"].as_str().unwrap().to_string();
    let job = client.wait_for_job(&job_id).await;

    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"]["url"], FAKE_IMAGE_URL);
    assert_eq!(job["result"]["prompt"], "a lighthouse at dusk");
    assert!(job.get("error").is_none());
    assert!(job["updatedAt"].as_i64().unwrap() >= job["createdAt"].as_i64().unwrap());
}

#[tokio::test]
async fn test_inpaint_job_uploads_inline_images_to_storage() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let response = client
        .create_inpaint_job(&inline_png(), &inline_png(), "add a red hat")
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["job"]["type"], "inpaint");

    let job = client
        .wait_for_job(body["job"]["id"].as_str().unwrap())
        .await;
    assert_eq!(job["status"], "completed", "{job}");
    assert_eq!(job["result"]["type"], "inpainted");

    // Image and mask were both written before the prediction started.
    let uploaded: Vec<String> = std::fs::read_dir(server.media_file("temp"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded.iter().any(|name| name.ends_with("_mask.png")));

    let response = client
        .get_storage(&format!("temp/{}", uploaded[0]))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[1..4], b"PNG");
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let response = client.get_job("no-such-job").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_job_of_another_user_is_forbidden() {
    let server = TestServer::spawn().await;
    let alice = TestClient::authenticated(server.base_url.clone());
    let bob = TestClient::authenticated_other(server.base_url.clone());

    let body: Value = alice
        .create_generate_job("a secret garden")
        .await
        .json()
        .await
        .unwrap();
    let job_id = body["job"]["id"].as_str().unwrap();

    assert_eq!(bob.get_job(job_id).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(alice.get_job(job_id).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_jobs_get_distinct_ids() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let mut ids = std::collections::HashSet::new();
    for i in 0..5 {
        let body: Value = client
            .create_generate_job(&format!("prompt {}", i))
            .await
            .json()
            .await
            .unwrap();
        ids.insert(body["job"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_inline_generate_returns_image() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let response = client.generate_now("a quiet harbor").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["image"]["url"], FAKE_IMAGE_URL);
    assert_eq!(body["image"]["type"], "generated");
}

#[tokio::test]
async fn test_inline_inpaint_returns_image() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone());

    let response = client
        .inpaint_now("http://images.invalid/in.png", "http://images.invalid/mask.png", "blue sky")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["image"]["type"], "inpainted");
    assert_eq!(body["image"]["prompt"], "blue sky");
}

#[tokio::test]
async fn test_inline_request_times_out_and_cancels_prediction() {
    let server = TestServer::spawn().await;
    server.upstream.set_predictions_hang(true);
    let client = TestClient::authenticated(server.base_url.clone());

    let start = Instant::now();
    let response = client.generate_now("never finishes").await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(start.elapsed() >= Duration::from_millis(SYNC_TIMEOUT_MS));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    // The abandoned prediction is cancelled upstream shortly after.
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.upstream.predictions_cancelled() == 0 {
        assert!(Instant::now() < deadline, "prediction was never cancelled");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.upstream.predictions_created(), 1);
}
