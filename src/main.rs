use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod evaluator;
mod models;
mod report;

use config::EvaluatorConfig;
use models::{format_month, parse_month, ProgressEntry};

#[derive(Parser)]
#[command(name = "site-progress-alerts")]
#[command(about = "Monthly progress evaluation and alerting for construction sites", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample project with sites and monthly entries
    Seed,
    /// Import monthly progress entries from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record one monthly entry for a site
    Record {
        #[arg(long)]
        site: Uuid,
        /// Month as YYYY-MM
        #[arg(long)]
        month: String,
        #[arg(long, allow_negative_numbers = true)]
        total_progress: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        target_rate: Option<f64>,
        #[arg(long)]
        observations: Option<String>,
    },
    /// Create an alert by hand
    Alert {
        #[arg(long)]
        project: Uuid,
        #[arg(long)]
        site: Option<Uuid>,
        /// data_entry_delay, problematic, critical, pre_demobilization or demobilization
        #[arg(long = "type")]
        alert_type: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Raise alerts for sites overdue for a monthly entry
    CheckDelays {
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        threshold_days: Option<u32>,
    },
    /// Print undispatched alerts as JSON lines
    PendingAlerts {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long, default_value_t = 3)]
        months: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = EvaluatorConfig::from_env().context("invalid evaluator configuration")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, &config).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv, &config).await?;
            println!(
                "Recorded {} entries from {} ({} alerts raised).",
                summary.records,
                csv.display(),
                summary.alerts
            );
            if summary.status_mismatches > 0 {
                println!(
                    "{} rows carried a status that disagreed with their progress; derived status was kept.",
                    summary.status_mismatches
                );
            }
        }
        Commands::Record {
            site,
            month,
            total_progress,
            target_rate,
            observations,
        } => {
            let entry = ProgressEntry {
                site_id: site,
                month: parse_month(&month)?,
                total_progress,
                target_rate,
                observations,
            };
            let outcome = db::record_progress(&pool, entry, &config).await?;
            let record = &outcome.record;

            match outcome.previous {
                Some(previous) if previous != record.status() => println!(
                    "{} {}: {} (was {})",
                    site,
                    format_month(record.month),
                    record.status(),
                    previous
                ),
                _ => println!("{} {}: {}", site, format_month(record.month), record.status()),
            }
            if let Some(delay) = record.delay_rate() {
                println!("Delay against baseline: {delay:+.1} pts");
            }
            for alert in &outcome.alerts {
                println!("- alert [{}] {}", alert.alert_type, alert.message);
            }
        }
        Commands::Alert {
            project,
            site,
            alert_type,
            message,
        } => {
            let target = db::fetch_project_target(&pool, project, site).await?;
            let alert = evaluator::manual_alert(&target, &alert_type, message.as_deref())?;
            let id = db::store_alert(&pool, &alert).await?;
            println!("Alert {id} [{}] queued for {} recipients.", alert.alert_type, alert.recipients.len());
        }
        Commands::CheckDelays {
            as_of,
            threshold_days,
        } => {
            if let Some(days) = threshold_days {
                config.data_entry_delay_days = days;
            }
            let reference = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let alerts = db::check_delays(&pool, reference, &config).await?;

            if alerts.is_empty() {
                println!("No sites overdue as of {reference}.");
                return Ok(());
            }

            println!("Sites overdue for data entry:");
            for alert in &alerts {
                println!("- {}", alert.message);
            }
        }
        Commands::PendingAlerts { limit } => {
            for alert in db::fetch_pending_alerts(&pool, limit).await? {
                println!("{}", serde_json::to_string(&alert)?);
            }
        }
        Commands::Report {
            project,
            months,
            out,
        } => {
            let reference = Utc::now().date_naive();
            let since_month = report::window_start(reference, months);
            let since = since_month
                .and_hms_opt(0, 0, 0)
                .context("invalid window start")?
                .and_utc();

            let scope = match project {
                Some(id) => Some(db::fetch_project_target(&pool, id, None).await?.label),
                None => None,
            };
            let snapshots = db::fetch_latest_snapshots(&pool, project, since_month).await?;
            let alerts = db::fetch_recent_alerts(&pool, project, since).await?;
            let activity = db::fetch_site_activity(&pool, project).await?;

            let report = report::build_report(
                &report::ReportInput {
                    scope: scope.as_deref(),
                    months,
                    since_month,
                    reference,
                    snapshots: &snapshots,
                    alerts: &alerts,
                    activity: &activity,
                },
                &config,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
