//! Chorus CLI
//!
//! Speak as your personas: runs the event intake and checks its setup.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chorus_http::PlatformClient;
use chorus_runtime::{Runtime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "chorus")]
#[command(author, version, about = "Chorus: tag-routed persona proxying", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,

    /// Bot token (or set CHORUS_BOT_TOKEN env var)
    #[arg(long, global = true, env = "CHORUS_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Hex ed25519 public key (or set CHORUS_PUBLIC_KEY env var)
    #[arg(long, global = true, env = "CHORUS_PUBLIC_KEY")]
    public_key: Option<String>,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the event intake until interrupted
    Serve {
        /// Listen address, overriding the config file
        #[arg(short, long, env = "CHORUS_BIND")]
        bind: Option<String>,
    },

    /// Check the bot credential against the platform
    Status,

    /// Validate the configuration without serving
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(log_level).init(),
    }

    let config = load_config(
        cli.config.as_deref(),
        cli.bot_token.as_deref(),
        cli.public_key.as_deref(),
    )?;

    match cli.command {
        Commands::Serve { bind } => {
            let config = match bind {
                Some(bind) => config.with_bind(&bind),
                None => config,
            };
            run_serve(config).await?;
        }
        Commands::Status => {
            check_status(&config).await?;
        }
        Commands::CheckConfig => {
            check_config(&config);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, bot_token: Option<&str>, public_key: Option<&str>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(token) = bot_token {
        config = config.with_bot_token(token);
    }
    if let Some(key) = public_key {
        config = config.with_public_key(key);
    }
    Ok(config)
}

async fn run_serve(config: RuntimeConfig) -> Result<()> {
    println!("🎭 Chorus starting on {}", config.bind);
    let runtime = Runtime::new(config)?;
    runtime.run().await?;
    println!("👋 Chorus stopped");
    Ok(())
}

async fn check_status(config: &RuntimeConfig) -> Result<()> {
    println!("🔌 Checking bot credential...\n");

    let client = PlatformClient::new(config.platform_config())?;
    match client.current_application(&config.token()).await {
        Ok(app) => {
            println!("✅ Credential accepted");
            println!("   Application: {} ({})", app.name, app.id);
            if app.verify_key.eq_ignore_ascii_case(config.public_key.trim()) {
                println!("✅ Public key matches the application");
            } else {
                println!("❌ Public key does not match the application's");
                println!("   Expected: {}", app.verify_key);
            }
        }
        Err(e) if e.is_stale_endpoint() => {
            println!("❌ Credential rejected by {}", config.api_base);
        }
        Err(e) => {
            println!("❌ Error checking credential: {}", e);
        }
    }

    Ok(())
}

fn check_config(config: &RuntimeConfig) {
    match config.validate() {
        Ok(()) => {
            println!("✅ Configuration is valid");
            println!("   Bind: {}", config.bind);
            if let Ok(id) = config.resolved_application_id() {
                println!("   Application: {}", id);
            }
            println!("   Replica: {}", config.replica_id);
        }
        Err(e) => {
            println!("❌ {}", e);
        }
    }
}
