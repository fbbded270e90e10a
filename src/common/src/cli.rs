use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments shared by every promfed command
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only look at the configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("promfed Configuration:");
            println!("======================");
            println!("Cache reap interval: {:?}", config.cache.reap_interval);
            println!("Cache default TTL: {:?}", config.cache.default_ttl);
            println!("Cache wait timeout: {:?}", config.cache.wait_timeout);

            for (index, group) in config.server_groups.iter().enumerate() {
                println!();
                println!("Server group {index}:");
                println!("  Scheme: {}", group.scheme());
                println!("  Anti-affinity: {:?}", group.anti_affinity());
                println!("  Remote read: {}", group.remote_read);
                println!("  Ignore errors: {}", group.ignore_error);
                if !group.labels.is_empty() {
                    println!("  Labels: {}", group.labels);
                }
                match group.targets() {
                    Ok(targets) => {
                        for target in targets {
                            println!("  Target: {} {}", target.url, target.labels);
                        }
                    }
                    Err(e) => println!("  Targets: invalid ({e})"),
                }
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");

        config.validate().context("Invalid configuration")?;

        for (index, group) in config.server_groups.iter().enumerate() {
            let targets = group
                .targets()
                .with_context(|| format!("Invalid targets in server group {index}"))?;
            if targets.is_empty() {
                tracing::warn!(server_group = index, "Server group has no targets");
            }
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
