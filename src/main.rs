use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use persona_server::auth::StaticTokenResolver;
use persona_server::chat::{
    ChatService, ConversationStore, InMemoryConversationStore, SqliteConversationStore,
};
use persona_server::config::{AppConfig, CliConfig, FileConfig};
use persona_server::images::{
    GalleryService, GalleryStore, ImageService, InMemoryGalleryStore, SqliteGalleryStore,
};
use persona_server::jobs::{JobRetentionSweeper, JobRunner, JobStore};
use persona_server::server::{self, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use persona_server::storage::LocalImageStorage;
use persona_server::upstream::{OpenRouterClient, ReplicateClient};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the chat database. Conversations are kept in memory
    /// when omitted.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory for uploaded images, served under /storage.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Public URL of this server, used to build links to stored files.
    #[clap(long)]
    pub public_base_url: Option<String>,

    /// API key for the chat completion service.
    #[clap(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub chat_api_key: Option<String>,

    /// API key for the image generation service.
    #[clap(long, env = "REPLICATE_API_KEY", hide_env_values = true)]
    pub images_api_key: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            media_path: self.media_path.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            public_base_url: self.public_base_url.clone(),
            chat_api_key: self.chat_api_key.clone(),
            images_api_key: self.images_api_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let shutdown = CancellationToken::new();

    let conversations: Arc<dyn ConversationStore> = match config.chat_db_path() {
        Some(path) => {
            info!("Opening SQLite chat database at {:?}...", path);
            Arc::new(SqliteConversationStore::new(&path)?)
        }
        None => {
            info!("No db_dir configured, conversations are kept in memory");
            Arc::new(InMemoryConversationStore::new())
        }
    };

    std::fs::create_dir_all(&config.media_path)
        .with_context(|| format!("Failed to create media directory {:?}", config.media_path))?;
    let storage = Arc::new(LocalImageStorage::new(
        &config.media_path,
        config.storage_base_url(),
    ));

    if config.images.api_key.is_none() {
        warn!("No image API key configured, image requests will fail");
    }
    let generator = Arc::new(
        ReplicateClient::new(&config.images.base_url, config.images.api_key.clone())
            .with_polling(config.images.poll_interval, config.images.max_poll_attempts),
    );
    let images = Arc::new(ImageService::new(generator, storage.clone()));

    let gallery_store: Arc<dyn GalleryStore> = match config.gallery_db_path() {
        Some(path) => {
            info!("Opening SQLite gallery database at {:?}...", path);
            Arc::new(SqliteGalleryStore::new(&path)?)
        }
        None => Arc::new(InMemoryGalleryStore::new()),
    };
    let gallery = GalleryService::new(gallery_store, storage);

    let job_store = Arc::new(JobStore::new());
    let job_runner = JobRunner::new(
        job_store.clone(),
        images,
        config.jobs.sync_timeout,
        shutdown.clone(),
    );

    let sweeper = JobRetentionSweeper::new(
        job_store,
        config.jobs.sweep_interval,
        config.jobs.retention,
    );
    let sweeper_shutdown = shutdown.clone();
    tokio::spawn(async move { sweeper.run(sweeper_shutdown).await });

    if config.chat.api_key.is_none() {
        warn!("No chat API key configured, chat requests will fail");
    }
    let chat_client = Arc::new(
        OpenRouterClient::new(&config.chat.base_url, config.chat.api_key.clone())
            .with_timeout(config.chat.request_timeout),
    );
    let chat_service = ChatService::new(
        conversations,
        chat_client,
        config.chat.default_model.clone(),
        config.relay.channel_capacity,
    );

    let resolver = StaticTokenResolver::new(config.auth_tokens.clone());
    if resolver.is_empty() {
        warn!("No auth tokens configured, every API request will be rejected");
    } else {
        info!("Loaded {} auth tokens", resolver.len());
    }

    let state = ServerState {
        config: ServerConfig {
            requests_logging_level: config.logging_level.clone(),
            port: config.port,
            media_path: Some(config.media_path.clone()),
        },
        start_time: Instant::now(),
        job_runner: Arc::new(job_runner),
        chat_service: Arc::new(chat_service),
        gallery: Arc::new(gallery),
        resolver: Arc::new(resolver),
        hash: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal_shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    run_server(state, config.metrics_port, shutdown).await
}
