use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

use relaygate_config::ConfigLoader;

/// Command-line interface for the gateway process.
#[derive(Parser)]
#[command(name = "relaygate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to relaygate.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the configured listen address (e.g. 0.0.0.0:8787)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Validate the configuration file and report warnings/errors without starting the gateway
    ValidateConfig,
    /// Show the resolved configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        // `completions` must work without touching the config file at all.
        if let Commands::Completions { shell } = self.command {
            return Self::cmd_completions(shell);
        }

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(config.logging.level.as_str())
        };

        Self::init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Serve { listen } => Self::cmd_serve(config, listen).await,
            Commands::ValidateConfig => Self::cmd_validate_config(config_loader.path()),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { .. } => unreachable!("handled above"),
        }
    }

    fn init_tracing(log_level: &str, format: &str) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
        if format == "json" {
            tracing_subscriber::fmt().with_env_filter(filter).json().with_target(true).init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
        }
    }

    async fn cmd_serve(
        mut config: relaygate_config::GatewayConfig,
        listen: Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(listen) = listen {
            config.server.listen = listen;
        }

        println!("relaygate v{}", env!("CARGO_PKG_VERSION"));
        println!("   listening on {}", config.server.listen);
        println!("   environment: {}", config.server.environment);
        println!();

        relaygate_server::start_server(config).await
    }

    /// Re-read and validate the config file directly (bypassing
    /// `ConfigLoader::load`'s own hard-error-on-load behavior) so this
    /// command reports problems instead of just refusing to run.
    fn cmd_validate_config(config_path: &std::path::Path) -> anyhow::Result<()> {
        println!("Validating {}", config_path.display());
        println!();

        let config: relaygate_config::GatewayConfig = if config_path.exists() {
            let raw = std::fs::read_to_string(config_path)?;
            toml::from_str(&raw)?
        } else {
            println!("  (file not found — validating default configuration)");
            relaygate_config::GatewayConfig::default()
        };

        match config.validate() {
            Ok(warnings) => {
                if warnings.is_empty() {
                    println!("  OK — no warnings");
                } else {
                    for w in &warnings {
                        println!("  {w}");
                    }
                }
                Ok(())
            }
            Err(e) => {
                println!("{e}");
                std::process::exit(1);
            }
        }
    }

    fn cmd_config(config: relaygate_config::GatewayConfig, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Ok(())
    }

    fn cmd_version() -> anyhow::Result<()> {
        println!("relaygate v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> anyhow::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "relaygate", &mut std::io::stdout());
        Ok(())
    }
}
