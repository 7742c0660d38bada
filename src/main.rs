//! TE Analyzer - transposable-element analysis API
//!
//! An HTTP service that accepts genome and transcriptome uploads and runs
//! RepeatMasker, Salmon, DESeq2, ViennaRNA and GO enrichment on them,
//! returning typed JSON results.
//!
//! Exit codes:
//!   0 - Clean shutdown, or all tools found with --check-tools
//!   1 - Startup error (bad config, bind failure, missing tools, etc.)

mod api;
mod cli;
mod config;
mod error;
mod models;
mod parsers;
mod pipeline;
mod report;
mod runner;
mod storage;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE};
use runner::{locate_executable, ProcessRunner};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("TE Analyzer v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if args.check_tools {
        let missing = check_tools(&config);
        std::process::exit(if missing == 0 { 0 } else { 1 });
    }

    if let Err(e) = serve(config).await {
        error!("Server failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .te-analyzer.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to point at your RepeatMasker, Salmon, R and ViennaRNA installs.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().as_str().to_lowercase()));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Print where each configured tool resolves to. Returns the number missing.
fn check_tools(config: &Config) -> usize {
    println!("🔎 Checking external tools...");

    let mut missing = 0;
    for (key, tool) in config.tools.executables() {
        match locate_executable(tool) {
            Some(path) => println!("   ✅ {:<14} {}", key, path.display()),
            None => {
                missing += 1;
                println!("   ❌ {:<14} {} (not found)", key, tool);
            }
        }
    }

    for (key, path) in [
        ("deseq2_script", &config.tools.deseq2_script),
        ("go_population", &config.tools.go_population),
        ("go_associations", &config.tools.go_associations),
        ("go_obo", &config.tools.go_obo),
    ] {
        if path.is_file() {
            println!("   ✅ {:<14} {}", key, path.display());
        } else {
            missing += 1;
            println!("   ❌ {:<14} {} (not found)", key, path.display());
        }
    }

    if missing > 0 {
        println!("\n⚠️  {} tool(s) or data file(s) missing", missing);
    }
    missing
}

/// Bind and serve until the process is stopped.
async fn serve(config: Config) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);

    println!("🧬 Starting TE Analyzer API");
    println!("   Uploads: {}", config.storage.upload_dir.display());
    println!("   Results: {}", config.storage.results_dir.display());
    println!("   Tool timeout: {}s", config.tools.timeout_seconds);
    println!("   Max attempts: {}", config.pipeline.max_attempts);

    let runner = Arc::new(ProcessRunner::new(config.tools.timeout()));
    let state = api::AppState::new(config, runner).context("Failed to initialise artifact store")?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("Listening on http://{}", address);
    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
