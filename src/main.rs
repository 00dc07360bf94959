use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use customer_unify::{
    get_all_customers, list_batch_loads, run_batch, verify_count, with_connection, BatchConfig,
};

#[derive(Parser)]
#[command(name = "customer-unify", version, about = "Unify customer records from CSV/JSON/XML into SQLite")]
struct Cli {
    /// Batch configuration file
    #[arg(long, short, default_value = "config/customer_unify.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the batch once (default)
    Run,
    /// List customers already in the database
    Show,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.config),
        Command::Show => show(&cli.config),
    }
}

fn load_config(path: &Path) -> BatchConfig {
    match BatchConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => fail(&e),
    }
}

/// Print the failed stage and exit non-zero
fn fail(e: &customer_unify::PipelineError) -> ! {
    eprintln!("❌ Batch failed at stage '{}': {}", e.stage(), e);
    std::process::exit(1);
}

fn run(config_path: &Path) -> Result<()> {
    println!("🧩 Customer Unify - CSV + XML + JSON → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = load_config(config_path);

    let outcome = match run_batch(&config) {
        Ok(outcome) => outcome,
        Err(e) => fail(&e),
    };

    println!("\n📂 Sources");
    for fp in &outcome.report.fingerprints {
        println!("✓ {:<6} {} rows  ({})", fp.source, fp.rows, fp.path);
    }

    println!("\n🔗 Merge");
    for join in &outcome.report.joins {
        println!("✓ {}", join.summary());
    }

    println!("\n✏️  Corrections");
    for c in &outcome.report.corrections {
        println!("✓ {} on {}: {} row(s)", c.rule_id, c.source, c.matched_rows);
    }

    if !outcome.report.warnings.is_empty() {
        println!("\n⚠️  {} warning(s)", outcome.report.warnings.len());
        for w in &outcome.report.warnings {
            println!("   - {}", w);
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "🎉 Loaded {} unified customers (batch {})",
        outcome.inserted, outcome.stamp.batch_id
    );
    if let Some(path) = config.export_path() {
        println!("✓ Unified table written to {}", path.display());
    }

    Ok(())
}

fn show(config_path: &Path) -> Result<()> {
    let config = load_config(config_path);
    let db_path = config.database_path();

    if !db_path.exists() {
        eprintln!("❌ Database not found: {}", db_path.display());
        eprintln!("   Run: customer-unify run");
        std::process::exit(1);
    }

    let (count, customers, loads) = with_connection(&db_path, |conn| {
        Ok((verify_count(conn)?, get_all_customers(conn)?, list_batch_loads(conn)?))
    })
    .context("Failed to read customers")?;

    println!("📊 {} customers in {}\n", count, db_path.display());
    for c in &customers {
        println!(
            "{:<28} age {:>3}  {:<10} {}",
            c.full_name, c.age, c.address_postcode, c.iban
        );
    }

    println!("\n📜 Batch history");
    for load in &loads {
        println!(
            "✓ {}  {}  {} customers, {} warnings, {} sources",
            load.loaded_at.format("%Y-%m-%d %H:%M:%S"),
            load.batch_id,
            load.customers,
            load.warnings,
            load.sources.len()
        );
    }

    Ok(())
}
