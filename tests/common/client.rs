//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides one method per server endpoint. When API
//! routes or request formats change, update only this file.

use super::constants::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Response;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// HTTP test client, optionally carrying a bearer token.
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    /// Creates a client that sends no credentials.
    pub fn new(base_url: String) -> Self {
        Self::build(base_url, None)
    }

    /// Creates a client acting as `TEST_USER`.
    pub fn authenticated(base_url: String) -> Self {
        Self::build(base_url, Some(TEST_TOKEN))
    }

    /// Creates a client acting as `OTHER_USER`.
    pub fn authenticated_other(base_url: String) -> Self {
        Self::build(base_url, Some(OTHER_TOKEN))
    }

    /// Creates a client presenting an arbitrary token.
    pub fn with_token(base_url: String, token: &str) -> Self {
        Self::build(base_url, Some(token))
    }

    fn build(base_url: String, token: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).expect("Invalid token"),
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Server
    // ========================================================================

    /// GET /
    pub async fn get_stats(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Stats request failed")
    }

    /// GET /storage/{path}
    pub async fn get_storage(&self, path: &str) -> Response {
        self.client
            .get(format!("{}/storage/{}", self.base_url, path))
            .send()
            .await
            .expect("Storage request failed")
    }

    // ========================================================================
    // Image Jobs
    // ========================================================================

    /// POST /api/images/jobs/inpaint
    pub async fn create_inpaint_job(&self, image_url: &str, mask: &str, prompt: &str) -> Response {
        self.client
            .post(format!("{}/api/images/jobs/inpaint", self.base_url))
            .json(&json!({ "imageUrl": image_url, "mask": mask, "prompt": prompt }))
            .send()
            .await
            .expect("Create inpaint job request failed")
    }

    /// POST /api/images/jobs/generate
    pub async fn create_generate_job(&self, prompt: &str) -> Response {
        self.client
            .post(format!("{}/api/images/jobs/generate", self.base_url))
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .expect("Create generate job request failed")
    }

    /// GET /api/images/jobs/{job_id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/api/images/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// Polls GET /api/images/jobs/{job_id} until the job is completed or
    /// failed, returning the job object.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let start = Instant::now();
        loop {
            let body: Value = self
                .get_job(job_id)
                .await
                .json()
                .await
                .expect("Job response is not JSON");
            let status = body["job"]["status"].as_str().unwrap_or_default();
            if status == "completed" || status == "failed" {
                return body["job"].clone();
            }
            if start.elapsed() > Duration::from_millis(JOB_WAIT_TIMEOUT_MS) {
                panic!("Job {} still {} after {}ms", job_id, status, JOB_WAIT_TIMEOUT_MS);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// POST /api/images/inpaint
    pub async fn inpaint_now(&self, image_url: &str, mask: &str, prompt: &str) -> Response {
        self.client
            .post(format!("{}/api/images/inpaint", self.base_url))
            .json(&json!({ "imageUrl": image_url, "mask": mask, "prompt": prompt }))
            .send()
            .await
            .expect("Inpaint request failed")
    }

    /// POST /api/images/generate
    pub async fn generate_now(&self, prompt: &str) -> Response {
        self.client
            .post(format!("{}/api/images/generate", self.base_url))
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .expect("Generate request failed")
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// POST /api/chat/create
    pub async fn create_chat(&self, avatar_ids: &[&str], message: &str) -> Response {
        self.client
            .post(format!("{}/api/chat/create", self.base_url))
            .json(&json!({ "avatarIds": avatar_ids, "modelId": TEST_MODEL, "message": message }))
            .send()
            .await
            .expect("Create chat request failed")
    }

    /// Creates a chat and returns its id, asserting success.
    pub async fn create_chat_id(&self, avatar_id: &str) -> String {
        let response = self.create_chat(&[avatar_id], "").await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Chat is not JSON");
        body["id"].as_str().expect("Chat has no id").to_string()
    }

    /// GET /api/chat/list
    pub async fn list_chats(&self) -> Response {
        self.client
            .get(format!("{}/api/chat/list", self.base_url))
            .send()
            .await
            .expect("List chats request failed")
    }

    /// GET /api/chat/{chat_id}
    pub async fn get_chat(&self, chat_id: &str) -> Response {
        self.client
            .get(format!("{}/api/chat/{}", self.base_url, chat_id))
            .send()
            .await
            .expect("Get chat request failed")
    }

    /// DELETE /api/chat/{chat_id}
    pub async fn delete_chat(&self, chat_id: &str) -> Response {
        self.client
            .delete(format!("{}/api/chat/{}", self.base_url, chat_id))
            .send()
            .await
            .expect("Delete chat request failed")
    }

    /// POST /api/chat/{chat_id}/message
    pub async fn send_message(&self, chat_id: &str, message: &str) -> Response {
        self.client
            .post(format!("{}/api/chat/{}/message", self.base_url, chat_id))
            .json(&json!({ "message": message }))
            .send()
            .await
            .expect("Send message request failed")
    }

    /// POST /api/chat/{chat_id}/message/stream
    pub async fn send_message_stream(&self, chat_id: &str, message: &str) -> Response {
        self.client
            .post(format!("{}/api/chat/{}/message/stream", self.base_url, chat_id))
            .json(&json!({ "message": message }))
            .send()
            .await
            .expect("Stream message request failed")
    }

    // ========================================================================
    // Avatars
    // ========================================================================

    /// POST /api/avatars
    pub async fn create_avatar(&self, name: &str, is_public: bool) -> Response {
        self.client
            .post(format!("{}/api/avatars", self.base_url))
            .json(&json!({
                "name": name,
                "description": "A test avatar",
                "story": "Made for a test.",
                "persona": "Terse.",
                "isPublic": is_public,
            }))
            .send()
            .await
            .expect("Create avatar request failed")
    }

    /// GET /api/avatars
    pub async fn list_avatars(&self) -> Response {
        self.client
            .get(format!("{}/api/avatars", self.base_url))
            .send()
            .await
            .expect("List avatars request failed")
    }

    /// GET /api/avatars/{avatar_id}
    pub async fn get_avatar(&self, avatar_id: &str) -> Response {
        self.client
            .get(format!("{}/api/avatars/{}", self.base_url, avatar_id))
            .send()
            .await
            .expect("Get avatar request failed")
    }

    /// PUT /api/avatars/{avatar_id}
    pub async fn update_avatar(&self, avatar_id: &str, name: &str, is_public: bool) -> Response {
        self.client
            .put(format!("{}/api/avatars/{}", self.base_url, avatar_id))
            .json(&json!({
                "name": name,
                "description": "An edited avatar",
                "story": "Edited in a test.",
                "persona": "Terse.",
                "isPublic": is_public,
            }))
            .send()
            .await
            .expect("Update avatar request failed")
    }

    /// DELETE /api/avatars/{avatar_id}
    pub async fn delete_avatar(&self, avatar_id: &str) -> Response {
        self.client
            .delete(format!("{}/api/avatars/{}", self.base_url, avatar_id))
            .send()
            .await
            .expect("Delete avatar request failed")
    }

    // ========================================================================
    // Gallery
    // ========================================================================

    /// POST /api/images/gallery
    pub async fn save_to_gallery(&self, image_url: &str, prompt: &str, kind: &str) -> Response {
        self.client
            .post(format!("{}/api/images/gallery", self.base_url))
            .json(&json!({ "imageUrl": image_url, "prompt": prompt, "type": kind }))
            .send()
            .await
            .expect("Save to gallery request failed")
    }

    /// POST /api/images/upload
    pub async fn upload_image(&self, base64_image: &str, prompt: &str) -> Response {
        self.client
            .post(format!("{}/api/images/upload", self.base_url))
            .json(&json!({ "base64Image": base64_image, "prompt": prompt }))
            .send()
            .await
            .expect("Upload image request failed")
    }

    /// GET /api/images/gallery
    pub async fn get_gallery(&self) -> Response {
        self.client
            .get(format!("{}/api/images/gallery", self.base_url))
            .send()
            .await
            .expect("Get gallery request failed")
    }

    /// DELETE /api/images/gallery/{image_id}
    pub async fn delete_gallery_image(&self, image_id: &str) -> Response {
        self.client
            .delete(format!("{}/api/images/gallery/{}", self.base_url, image_id))
            .send()
            .await
            .expect("Delete gallery image request failed")
    }
}
