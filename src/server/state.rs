use axum::extract::FromRef;

use crate::auth::PrincipalResolver;
use crate::chat::ChatService;
use crate::images::GalleryService;
use crate::jobs::JobRunner;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedJobRunner = Arc<JobRunner>;
pub type GuardedChatService = Arc<ChatService>;
pub type GuardedGalleryService = Arc<GalleryService>;
pub type GuardedPrincipalResolver = Arc<dyn PrincipalResolver>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_runner: GuardedJobRunner,
    pub chat_service: GuardedChatService,
    pub gallery: GuardedGalleryService,
    pub resolver: GuardedPrincipalResolver,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedJobRunner {
    fn from_ref(input: &ServerState) -> Self {
        input.job_runner.clone()
    }
}

impl FromRef<ServerState> for GuardedChatService {
    fn from_ref(input: &ServerState) -> Self {
        input.chat_service.clone()
    }
}

impl FromRef<ServerState> for GuardedGalleryService {
    fn from_ref(input: &ServerState) -> Self {
        input.gallery.clone()
    }
}

impl FromRef<ServerState> for GuardedPrincipalResolver {
    fn from_ref(input: &ServerState) -> Self {
        input.resolver.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
