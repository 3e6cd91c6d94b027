//! blockstore-upgrade CLI - Run the resource upgrade against a JSON store

use blockstore_upgrade::{
    check_invariants, upgrade_resources, Backup, Engine, JsonFileStore, JsonStoreConfig,
    ResourceCache, Result, UpgradeSummary, Volume,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockstore-upgrade")]
#[command(about = "Migrate block-storage control-plane resources", long_about = None)]
#[command(version)]
struct Cli {
    /// Namespace holding the resources
    #[arg(long, short, global = true, default_value = "blockstore-system")]
    namespace: String,

    /// Store directory (defaults to /var/lib/blockstore/resources)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check resources for broken invariants
    Check,

    /// Repair resources and write them back
    Upgrade {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

fn info(msg: &str) {
    println!("{} {}", "[INFO]".blue(), msg);
}

fn success(msg: &str) {
    println!("{} {}", "[OK]".green(), msg);
}

fn warn(msg: &str) {
    println!("{} {}", "[WARN]".yellow(), msg);
}

fn error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red(), msg);
}

fn print_summary(summary: &UpgradeSummary) {
    println!();
    println!("{:<28} {:<10} {}", "STEP", "PROCESSED", "CHANGED");
    println!("{:<28} {:<10} {}", "----", "---------", "-------");
    for step in &summary.steps {
        println!("{:<28} {:<10} {}", step.step, step.processed, step.changed);
    }
    println!();

    for volume in summary.unresolved_volumes() {
        warn(&format!(
            "Could not determine the active engine for volume '{}', repair it manually",
            volume
        ));
    }
}

/// Returns whether the namespace is consistent
fn cmd_check(store: &JsonFileStore, namespace: &str) -> Result<bool> {
    info(&format!("Checking resources in namespace '{}'...", namespace));

    let mut cache = ResourceCache::new();
    cache.list_and_cache::<Engine>(store, namespace)?;

    let violations = check_invariants(&cache);
    if violations.is_empty() {
        success(&format!(
            "{} engines checked, no violations",
            cache.len::<Engine>()
        ));
        return Ok(true);
    }

    for violation in &violations {
        warn(&violation.to_string());
    }
    error(&format!("{} violations found", violations.len()));
    Ok(false)
}

fn cmd_upgrade(store: &JsonFileStore, namespace: &str, dry_run: bool) -> Result<bool> {
    info(&format!("Upgrading resources in namespace '{}'...", namespace));

    let mut cache = ResourceCache::new();
    let summary = upgrade_resources(namespace, store, &mut cache)?;
    print_summary(&summary);

    let resolved = summary.is_complete();
    if dry_run {
        info(&format!(
            "Dry run: {} volumes, {} engines, {} backups left unwritten",
            cache.len::<Volume>(),
            cache.len::<Engine>(),
            cache.len::<Backup>()
        ));
        return Ok(resolved);
    }

    let written = cache.flush(store, namespace)?;
    success(&format!("Upgrade complete, {} resources written", written));
    Ok(resolved)
}

fn run() -> Result<bool> {
    let cli = Cli::parse();

    let mut config = JsonStoreConfig::default();
    if let Some(root) = cli.store_dir {
        config.root = root;
    }
    let store = JsonFileStore::with_config(config);

    match cli.command {
        None | Some(Commands::Check) => cmd_check(&store, &cli.namespace),
        Some(Commands::Upgrade { dry_run }) => cmd_upgrade(&store, &cli.namespace, dry_run),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
