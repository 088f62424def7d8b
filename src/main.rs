mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use cb_core::config::Config;
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting coursebridge");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    cb_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "coursebridge=trace,cb_server=trace,cb_providers=trace,cb_db=debug,cb_core=debug,tower_http=debug".to_string()
        } else {
            "coursebridge=info,cb_server=info,cb_providers=info,cb_db=info,cb_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate { config: config_path } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("coursebridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let mut config = Config::from_json(&contents)?;
            config.apply_env();
            println!("Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.server.db_path.display());
    println!("  Job ceiling: {}s", config.jobs.ceiling_secs);
    println!("  Max concurrent jobs: {}", config.jobs.max_concurrent);
    println!("  Brightspace API: v{}", config.brightspace.api_version);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
