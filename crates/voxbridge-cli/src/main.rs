use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxbridge_core::config::{Config, GatewayConfig, LoggingConfig};
use voxbridge_gateway::GatewayState;
use voxbridge_gateway::numbers::{DEFAULT_COUNTRY, DEFAULT_LIMIT, search_available_numbers};

#[derive(Parser)]
#[command(
    name = "voxbridge",
    about = "Voice relay between a phone call, streaming speech-to-text and a chat-completions API",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,

        /// Host advertised to the telephony platform for media streams
        #[arg(long)]
        public_host: Option<String>,
    },

    /// List phone numbers available for purchase
    Numbers {
        /// ISO country code
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,

        /// Maximum number of results
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose common issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let directives = std::iter::once(level)
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",");

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (logging.format.as_str(), logging.output.as_str()) {
        ("json", "stdout") => builder.json().with_writer(std::io::stdout).init(),
        ("json", _) => builder.json().with_writer(std::io::stderr).init(),
        (_, "stdout") => builder.with_writer(std::io::stdout).init(),
        _ => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let mut config = Config::load(&config_path)?;
    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Serve { port, public_host } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if !errors.is_empty() {
                for e in &errors {
                    tracing::error!("{e}");
                }
                anyhow::bail!("Invalid configuration in {}", config_path.display());
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            if let Some(host) = public_host {
                config
                    .gateway
                    .get_or_insert_with(GatewayConfig::default)
                    .public_host = Some(host);
            }

            tracing::info!("Starting Voxbridge gateway on port {port}");
            let state = Arc::new(GatewayState::from_config(config));
            tracing::info!(
                completion = state.completion.id(),
                transcriber = %state.transcriber.config().url,
                "Relay configured"
            );
            voxbridge_gateway::start_gateway(state, port).await?;
        }
        Commands::Numbers { country, limit } => {
            let http = reqwest::Client::new();
            let numbers =
                search_available_numbers(&http, &config.telephony(), &country, limit).await?;
            if numbers.is_empty() {
                println!("No numbers available in {country}");
            }
            for number in numbers {
                println!("{number}");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
        },
        Commands::Doctor => {
            println!("Voxbridge v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Config: {}{}",
                config_path.display(),
                if config_path.exists() { "" } else { " (not found, using defaults)" }
            );
            println!("Gateway: {}:{}", config.bind_addr(), config.gateway_port());
            println!("Transcriber: {}", config.transcription().listen_url());
            println!("Completion: {} ({})", config.completion().base_url, config.completion().model);

            let (warnings, errors) = config.validate();
            for w in &warnings {
                println!("  warning: {w}");
            }
            for e in &errors {
                println!("  error: {e}");
            }
            if errors.is_empty() {
                println!("OK ({} warning(s))", warnings.len());
            } else {
                anyhow::bail!("{} configuration error(s)", errors.len());
            }
        }
    }

    Ok(())
}
