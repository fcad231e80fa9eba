//! genpool: operator commands for pooled service accounts.

use std::path::PathBuf;

use genpool_accounts::JsonAccountStore;
use genpool_core::GenpoolConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod accounts;

fn resolve_data_dir() -> PathBuf {
    std::env::var("GENPOOL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn print_help() {
    println!("genpool: pooled service account maintenance");
    println!();
    println!("Usage: genpool <command>");
    println!();
    println!("Commands:");
    println!("  list <service>              List persisted accounts");
    println!("  show <service> <id>         Show one account with secrets redacted");
    println!("  unsuspend <service> <id>    Clear a quota suspension");
    println!("  help                        Show this help message");
}

fn open_store(config: &GenpoolConfig, service: &str) -> anyhow::Result<JsonAccountStore> {
    let dir = config.data_paths.service_accounts(service);
    let store = JsonAccountStore::open(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to open account store {}: {}", dir.display(), e))?;
    info!("Using account store {}", store.dir().display());
    Ok(store)
}

fn require<'a>(args: &'a [String], index: usize, usage: &str) -> &'a str {
    match args.get(index) {
        Some(arg) => arg,
        None => {
            eprintln!("Usage: genpool {}", usage);
            std::process::exit(1);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_help();
        return Ok(());
    };

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    let config = GenpoolConfig::from_env(&data_dir)?;
    let now = chrono::Utc::now().timestamp();

    match command.as_str() {
        "list" => {
            let service = require(&args, 2, "list <service>");
            let store = open_store(&config, service)?;
            for line in accounts::list(&store, now) {
                println!("{}", line);
            }
        }
        "show" => {
            let service = require(&args, 2, "show <service> <id>");
            let id = require(&args, 3, "show <service> <id>");
            let store = open_store(&config, service)?;
            println!("{}", accounts::show(&store, id)?);
        }
        "unsuspend" => {
            let service = require(&args, 2, "unsuspend <service> <id>");
            let id = require(&args, 3, "unsuspend <service> <id>");
            let store = open_store(&config, service)?;
            let record = accounts::unsuspend(&store, id)?;
            println!("{} is {}", record.id, if record.is_eligible(now) { "eligible" } else { "not eligible" });
        }
        "--help" | "-h" | "help" => print_help(),
        other => {
            eprintln!("Unknown command: {}. Use 'genpool help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
