use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tailscale_router::api::{self, auth::Credentials, App};
use tailscale_router::config::{Config, DEFAULT_CONFIG_PATH};
use tailscale_router::platform::{self, CommandRunner};
use tailscale_router::preflight;
use tailscale_router::vpn::background::BackgroundTasks;
use tailscale_router::vpn::{
    restore_previous_mode, ExitNodeDirectory, InterfaceDetector, Mode, ModeError, ModeStore,
    RouterState, RoutingConfigurator,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tailscale-router")]
#[command(about = "Route a LAN through a Tailscale exit node or straight out the WAN")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the routing daemon and HTTP API (default)
    Serve,
    /// Show the saved mode and available exit nodes
    Status,
    /// Generate default config file
    Init,
    /// Switch mode once without starting the HTTP server
    SetMode {
        /// `direct`, or the display name of an exit node
        mode: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = Config::load_or_default(&cli.config)?.with_env_overrides();
            serve(config).await?;
        }
        Commands::Status => {
            let config = Config::load_or_default(&cli.config)?;
            let store = ModeStore::new(config.router.mode_file.clone());
            println!("Mode: {}", store.load());

            let runner = platform::system_runner(config.router.command_timeout());
            match ExitNodeDirectory::new(runner).list().await {
                Ok(nodes) => {
                    println!("Exit nodes: {}", nodes.len());
                    for node in nodes.values() {
                        let state = if node.active { "online" } else { "offline" };
                        println!("  {} ({}) {}", node.display_name, node.ip, state);
                    }
                }
                Err(e) => println!("Exit nodes unavailable: {}", e),
            }
        }
        Commands::Init => {
            if cli.config.exists() {
                error!("{} already exists, not overwriting", cli.config.display());
                std::process::exit(1);
            }
            Config::default().save(&cli.config)?;
            println!("Created default config: {}", cli.config.display());
        }
        Commands::SetMode { mode } => {
            let target = parse_target(&mode)?;
            let config = Config::load_or_default(&cli.config)?;
            let runner = checked_runner(&config).await;
            let state = build_state(&config, runner);
            match state.set_mode(target).await {
                Ok(mode) => println!("Switched to mode: {}", mode),
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runner = checked_runner(&config).await;
    let state = Arc::new(build_state(&config, runner));

    if !config.server.web_root.join("index.html").exists() {
        warn!(
            "No index.html under {}, the dashboard will return 404",
            config.server.web_root.display()
        );
    }

    let listener = match TcpListener::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to listen on {}: {}", config.server.listen, e);
            std::process::exit(1);
        }
    };

    // Re-apply the saved mode once the API is reachable
    let policy = config.router.restore_policy();
    let restore_state = Arc::clone(&state);
    tokio::spawn(async move {
        restore_previous_mode(&restore_state, policy).await;
    });

    let credentials = Credentials::new(config.auth.username.clone(), config.auth.password.clone());
    let app = Arc::new(App::new(state, credentials, config.server.web_root.clone()));

    tokio::select! {
        result = api::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

/// Run the preflight checks and return the system runner, exiting on failure
async fn checked_runner(config: &Config) -> Arc<dyn CommandRunner> {
    if let Err(e) = preflight::ensure_root() {
        error!("{}", e);
        std::process::exit(1);
    }
    let runner = platform::system_runner(config.router.command_timeout());
    if let Err(e) = preflight::ensure_tailscale(runner.as_ref()).await {
        error!("{}", e);
        std::process::exit(1);
    }
    runner
}

fn build_state(config: &Config, runner: Arc<dyn CommandRunner>) -> RouterState {
    let settings = config.router.routing_settings();
    let configurator = RoutingConfigurator::new(
        Arc::clone(&runner),
        ExitNodeDirectory::new(Arc::clone(&runner)),
        InterfaceDetector::new(Arc::clone(&runner), settings.vpn_interface.clone()),
        BackgroundTasks::new(Arc::clone(&runner), config.router.background_workers),
        settings,
    );
    RouterState::new(configurator, ModeStore::new(config.router.mode_file.clone()))
}

/// Accept `direct`, `tailscale:<name>` or a bare node name
fn parse_target(input: &str) -> Result<Mode, ModeError> {
    if input.is_empty() || input == "direct" || input.starts_with("tailscale:") {
        input.parse()
    } else {
        Ok(Mode::ExitNode(input.to_string()))
    }
}
