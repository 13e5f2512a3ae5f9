//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own conversation store, job
//! store, gallery, media directory and fake upstream.

use super::constants::*;
use super::upstream::FakeUpstream;
use persona_server::auth::StaticTokenResolver;
use persona_server::chat::{AvatarRequest, ChatService, ConversationStore, InMemoryConversationStore};
use persona_server::images::{GalleryService, ImageService, InMemoryGalleryStore};
use persona_server::jobs::{JobRunner, JobStore};
use persona_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use persona_server::storage::LocalImageStorage;
use persona_server::upstream::{OpenRouterClient, ReplicateClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance backed by a fake upstream.
///
/// When dropped, the server gracefully shuts down and temp resources are
/// cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Fake chat and image APIs the server talks to
    pub upstream: FakeUpstream,

    /// Conversation store for direct inspection in tests
    pub conversations: Arc<dyn ConversationStore>,

    /// Public avatar owned by `TEST_USER`
    pub avatar_id: String,

    /// Private avatar owned by `OTHER_USER`
    pub private_avatar_id: String,

    // Private fields - keep resources alive until drop
    temp_media_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if any part of the setup fails or the server doesn't become
    /// ready within `SERVER_READY_TIMEOUT_MS`.
    pub async fn spawn() -> Self {
        let upstream = FakeUpstream::spawn().await;
        let temp_media_dir = TempDir::new().expect("Failed to create media dir");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let shutdown = CancellationToken::new();

        let storage = Arc::new(LocalImageStorage::new(
            temp_media_dir.path(),
            format!("{}/storage", base_url),
        ));
        let generator = Arc::new(
            ReplicateClient::new(&upstream.base_url, Some("test-key".to_string())).with_polling(
                Duration::from_millis(PREDICTION_POLL_INTERVAL_MS),
                1_000,
            ),
        );
        let job_runner = JobRunner::new(
            Arc::new(JobStore::new()),
            Arc::new(ImageService::new(generator, storage.clone())),
            Duration::from_millis(SYNC_TIMEOUT_MS),
            shutdown.clone(),
        );

        let gallery = GalleryService::new(Arc::new(InMemoryGalleryStore::new()), storage);

        let conversations: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        let chat_service = ChatService::new(
            conversations.clone(),
            Arc::new(OpenRouterClient::new(&upstream.base_url, Some("test-key".to_string()))),
            TEST_MODEL,
            4,
        );

        let avatar_id = chat_service
            .create_avatar(TEST_USER, avatar_request("Ada", true))
            .expect("Failed to create avatar")
            .id;
        let private_avatar_id = chat_service
            .create_avatar(OTHER_USER, avatar_request("Grace", false))
            .expect("Failed to create avatar")
            .id;

        let tokens = HashMap::from([
            (TEST_TOKEN.to_string(), TEST_USER.to_string()),
            (OTHER_TOKEN.to_string(), OTHER_USER.to_string()),
        ]);

        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port,
                media_path: Some(temp_media_dir.path().to_path_buf()),
            },
            start_time: Instant::now(),
            job_runner: Arc::new(job_runner),
            chat_service: Arc::new(chat_service),
            gallery: Arc::new(gallery),
            resolver: Arc::new(StaticTokenResolver::new(tokens)),
            hash: "test".to_string(),
        };
        let app = make_app(state);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            upstream,
            conversations,
            avatar_id,
            private_avatar_id,
            temp_media_dir,
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Path where a file stored under `relative` lands on disk.
    pub fn media_file(&self, relative: &str) -> std::path::PathBuf {
        self.temp_media_dir.path().join(relative)
    }
}

fn avatar_request(name: &str, is_public: bool) -> AvatarRequest {
    AvatarRequest {
        name: name.to_string(),
        description: format!("{} is a test avatar", name),
        story: "Grew up in a test suite.".to_string(),
        persona: "Curious and precise.".to_string(),
        profile_image_url: String::new(),
        is_public,
        creator_nickname: "tester".to_string(),
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Stops the server and every background job it started.
        self.shutdown.cancel();
    }
}
