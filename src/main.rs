use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use stowbox::{validation, Backends, Config, Database, FsBlobStore, StorageService, StowError};

const USAGE: &str = "usage: stowbox <sweep|purge> <owner-uuid>";

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = stowbox::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        stowbox::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        std::process::exit(2);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&config, &args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Run one command. Returns whether it completed without critical errors.
async fn run(config: &Config, args: &[String]) -> stowbox::Result<bool> {
    let (command, owner) = match args {
        [command, owner] => (command.as_str(), validation::parse_id(owner)?),
        _ => return Err(StowError::Validation(USAGE.to_string())),
    };

    let db = Database::open(&config.database.path).await?;
    let blobs = Arc::new(FsBlobStore::new(&config.storage.blob_root)?);
    let service = StorageService::new(Backends::sqlite(&db, blobs), config);

    info!(command, owner = %owner, "Stowbox maintenance command");
    match command {
        "sweep" => {
            let response = service.sweep_expired(owner, Utc::now()).await?;
            print_json(&response);
            Ok(response.success)
        }
        "purge" => {
            let result = service.delete_account(owner).await;
            print_json(&result);
            Ok(result.success())
        }
        other => Err(StowError::Validation(format!(
            "unknown command '{other}'; {USAGE}"
        ))),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize result: {e}"),
    }
}
