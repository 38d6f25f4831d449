// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use apartment_finder::client::PublicDataClient;
use apartment_finder::config::Config;
use apartment_finder::db::{self, open_database};
use apartment_finder::grades::seed_grades_and_definitions;
use apartment_finder::importer::{
    purge_trades, seed_regions, seed_trades, ImportReport, RegionImportSettings, TradeImportSettings,
};
use apartment_finder::logging::{init_logging, LogTarget};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "apartment-finder", version, about = "Seed and browse Korean apartment trade data")]
struct Cli {
    /// TOML config file (defaults to ./apartment-finder.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Regions, then grades (the full base seed)
    Seed,
    /// Legal-dong region codes only
    SeedRegions,
    /// Grade master data and district grade definitions
    SeedGrades,
    /// Apartment trades for every graded district
    SeedTrades {
        /// Deal years to import, overrides config
        #[arg(long = "year")]
        years: Vec<i32>,

        /// Delete stored trades before importing
        #[arg(long)]
        fresh: bool,
    },
    /// Row counts per table
    Stats,
    /// Interactive terminal dashboard
    Dashboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = match cli.command {
        Command::Dashboard => LogTarget::FileOnly,
        _ => LogTarget::ConsoleAndFile,
    };
    let _guard = init_logging(target);

    let config = Config::load(cli.config.as_deref())?;
    let conn = open_database(&config.database.path)?;

    match cli.command {
        Command::Seed => {
            // A region failure is logged; grades do not depend on regions
            if let Err(e) = run_seed_regions(&conn, &config).await {
                error!("Region seeding failed: {:#}", e);
            }
            run_seed_grades(&conn)?;
        }
        Command::SeedRegions => run_seed_regions(&conn, &config).await?,
        Command::SeedGrades => run_seed_grades(&conn)?,
        Command::SeedTrades { years, fresh } => run_seed_trades(&conn, &config, years, fresh).await?,
        Command::Stats => print_stats(&conn)?,
        Command::Dashboard => run_dashboard(conn)?,
    }

    Ok(())
}

fn log_report(what: &str, report: &ImportReport) {
    info!(
        requests = report.requests,
        failed_requests = report.failed_requests,
        fetched = report.fetched,
        parsed = report.parsed,
        skipped = report.skipped_records,
        inserted = report.inserted,
        duplicates = report.duplicates,
        "{} finished",
        what
    );
}

async fn run_seed_regions(conn: &Connection, config: &Config) -> Result<()> {
    config.importer.require_legal_dong_key()?;
    let client = PublicDataClient::new(&config.importer)?;

    info!("Seeding region data");
    let report = seed_regions(conn, &client, &RegionImportSettings::from(&config.importer)).await?;
    log_report("Region seeding", &report);
    Ok(())
}

fn run_seed_grades(conn: &Connection) -> Result<()> {
    info!("Seeding grade data");
    let report = seed_grades_and_definitions(conn)?;
    info!(
        grades = report.grades,
        definitions = report.definitions_inserted,
        "Grade seeding finished"
    );
    Ok(())
}

async fn run_seed_trades(conn: &Connection, config: &Config, years: Vec<i32>, fresh: bool) -> Result<()> {
    config.importer.require_public_data_key()?;
    let client = Arc::new(PublicDataClient::new(&config.importer)?);

    let mut settings = TradeImportSettings::from_config(&config.importer);
    if !years.is_empty() {
        settings.years = years;
    }

    if fresh {
        purge_trades(conn)?;
    }

    info!(years = ?settings.years, "Seeding apartment trades");
    let report = seed_trades(conn, client, &settings).await?;
    log_report("Apartment trade seeding", &report);
    Ok(())
}

fn print_stats(conn: &Connection) -> Result<()> {
    println!("Regions:           {}", db::count_regions(conn)?);
    println!("Grades:            {}", db::list_grades(conn)?.len());
    println!("Grade definitions: {}", db::count_grade_definitions(conn)?);
    println!("Apartment trades:  {}", db::count_trades(conn)?);
    Ok(())
}

#[cfg(feature = "tui")]
fn run_dashboard(conn: Connection) -> Result<()> {
    if db::count_grade_definitions(&conn)? == 0 {
        eprintln!("No grade data found. Run `apartment-finder seed` first.");
        std::process::exit(1);
    }

    let mut app = ui::App::new(conn);
    ui::run_ui(&mut app)
}

#[cfg(not(feature = "tui"))]
fn run_dashboard(_conn: Connection) -> Result<()> {
    eprintln!("Dashboard not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin apartment-server --features server");
    std::process::exit(1);
}
