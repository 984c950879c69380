//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::socket::SocketGateway;
use crate::api::{ApiServer, AuthManager};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands, SystemCommands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::secret::SecretManager;
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::core::update;
use crate::data::cache::CacheService;
use crate::data::sqlite::SqliteStore;
use crate::data::streams::StreamFabric;
use crate::data::traits::{ConversationRepository, MessageRepository, UserProfileRepository};
use crate::domain::messaging::MessagingCore;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub secrets: SecretManager,
    pub store: Arc<SqliteStore>,
    pub streams: Arc<StreamFabric>,
    pub cache: Arc<CacheService>,
    pub auth: Arc<AuthManager>,
    pub messaging: MessagingCore,
    pub socket_gateway: SocketGateway,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::System(system_cmd)) => {
                return Self::handle_system_command(&cli_config, system_cmd);
            }
            Some(Commands::Prune { yes }) => {
                return Self::prune_data(yes);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;
        let secrets = SecretManager::init(&storage).await?;

        let cache = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {}", e))?,
        );
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let streams = Arc::new(
            StreamFabric::connect(&config.stream)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize stream fabric: {}", e))?,
        );

        let store = Arc::new(SqliteStore::init(&config.store.sqlite_path).await?);

        let shutdown = ShutdownService::new(streams.clone(), store.clone());

        let auth = Arc::new(AuthManager::init(&secrets, config.auth.enabled).await?);

        let (messaging, handles) =
            MessagingCore::new(&config, streams.clone(), store.clone(), cache.clone(), &shutdown.subscribe());
        for handle in handles {
            shutdown.register(handle).await;
        }
        shutdown.register(store.start_checkpoint_task(shutdown.subscribe())).await;

        let users: Arc<dyn UserProfileRepository> = store.clone();
        let messages: Arc<dyn MessageRepository> = store.clone();
        let conversations: Arc<dyn ConversationRepository> = store.clone();
        let socket_gateway = SocketGateway::new(
            auth.clone(),
            messaging.publisher.clone(),
            messaging.presence.clone(),
            messaging.session_sinks.clone(),
            messaging.delivery.pending.clone(),
            messaging.user_cache.clone(),
            users,
            messages,
            conversations,
            config.delivery.max_pending,
        );

        Ok(Self {
            config,
            storage,
            secrets,
            store,
            streams,
            cache,
            auth,
            shutdown,
            messaging,
            socket_gateway,
        })
    }

    fn handle_system_command(cli: &CliConfig, cmd: SystemCommands) -> Result<()> {
        match cmd {
            SystemCommands::Config => {
                let config = AppConfig::load(cli)?;
                println!("{config:#?}");
                Ok(())
            }
            SystemCommands::Status => {
                println!("chat-core v{}", update::current_version());
                println!("data dir: {}", AppStorage::resolve_data_dir().display());
                Ok(())
            }
        }
    }

    fn prune_data(skip_confirm: bool) -> Result<()> {
        let data_dir = AppStorage::resolve_data_dir();

        if !data_dir.exists() {
            println!(
                "Nothing to prune. Data directory does not exist: {}",
                data_dir.display()
            );
            return Ok(());
        }

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        println!("This will permanently delete the local data directory:");
        println!("  {}", data_dir.display());
        println!();
        println!(
            "Make sure the server is not running. \
             Deleting data while the server is running will cause data corruption."
        );

        if !skip_confirm {
            print!("\nContinue? [y/N] ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
                println!("Aborted.");
                return Ok(());
            }
        }

        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("Failed to delete data directory: {}", data_dir.display()))?;
        println!("Pruned: {}", data_dir.display());
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        if app.config.update.enabled {
            tracing::info!(version = update::current_version(), "chat-core starting");
        } else {
            tracing::debug!("Update check disabled by config");
        }

        banner::print_banner(
            &app.config.server.host,
            app.config.server.port,
            app.auth.is_enabled(),
            &app.storage.data_dir().display().to_string(),
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
