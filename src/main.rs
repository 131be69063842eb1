use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vigil::app_dirs::AppDirs;
use vigil::config::{ConfigStore, FileConfigStore};
use vigil::engine::StatisticsEngine;
use vigil::snapshot::{ComputeStatisticsInput, StatisticsSnapshot};
use vigil::store::{ChartRecord, ParameterSet, SqliteStore};

/// telemetry analytics backend for the hold-the-process simulation
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "Records hold-the-process gameplay telemetry into an embedded store and computes decision-quality statistics per user and parameter set."
)]
struct Cli {
    /// database file to operate on (defaults to the configured path)
    #[clap(long)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// load charts and their points from a JSON file
    Ingest {
        /// JSON file: {"charts": [{"user_id", "par_set_id", "is_training", "points": [..]}]}
        file: PathBuf,
    },
    /// recompute and persist the snapshot for one user and parameter set
    Compute {
        #[clap(short = 'u', long)]
        user: i64,

        #[clap(short = 'p', long)]
        par_set: i64,

        #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// print the stored snapshot for one user and parameter set
    Show {
        #[clap(short = 'u', long)]
        user: i64,

        #[clap(short = 'p', long)]
        par_set: i64,

        #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// set the running total score for one user and parameter set
    Score {
        #[clap(short = 'u', long)]
        user: i64,

        #[clap(short = 'p', long)]
        par_set: i64,

        value: i64,
    },
    /// register a parameter set and print its id
    AddParset {
        #[clap(long)]
        gain_coef: f64,

        #[clap(long)]
        time_const: f64,

        #[clap(long)]
        noise_coef: f64,

        #[clap(long)]
        false_warning_prob: f64,

        #[clap(long)]
        missing_danger_prob: f64,
    },
    /// list registered parameter sets
    Parsets,
}

#[derive(Debug, Copy, Clone, ValueEnum, strum_macros::Display)]
enum OutputFormat {
    Table,
    Json,
}

/// Shape of an ingest file.
#[derive(Debug, Deserialize)]
struct IngestFile {
    charts: Vec<ChartRecord>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let db_path = resolve_db_path(cli.db);

    match cli.command {
        Command::Ingest { file } => {
            let mut store = SqliteStore::open(&db_path)?;
            let data = fs::read_to_string(&file)?;
            let ingest: IngestFile = serde_json::from_str(&data)?;
            for chart in &ingest.charts {
                store.ingest_chart(chart)?;
            }
            println!(
                "ingested {} chart(s) into {}",
                ingest.charts.len(),
                db_path.display()
            );
        }
        Command::Compute {
            user,
            par_set,
            format,
        } => {
            let engine = StatisticsEngine::new(SqliteStore::open(&db_path)?);
            let snapshot = engine.compute_statistics(&ComputeStatisticsInput::new(user, par_set))?;
            render_snapshot(&snapshot, format)?;
        }
        Command::Show {
            user,
            par_set,
            format,
        } => {
            let engine = StatisticsEngine::new(SqliteStore::open(&db_path)?);
            let snapshot = engine.get_statistics(user, par_set)?;
            render_snapshot(&snapshot, format)?;
        }
        Command::Score {
            user,
            par_set,
            value,
        } => {
            let store = SqliteStore::open(&db_path)?;
            store.set_total_score(user, par_set, value)?;
            println!("total score for user {user} / parameter set {par_set} set to {value}");
        }
        Command::AddParset {
            gain_coef,
            time_const,
            noise_coef,
            false_warning_prob,
            missing_danger_prob,
        } => {
            let store = SqliteStore::open(&db_path)?;
            let id = store.create_parameter_set(&ParameterSet {
                gain_coef,
                time_const,
                noise_coef,
                false_warning_prob,
                missing_danger_prob,
            })?;
            println!("registered parameter set {id}");
        }
        Command::Parsets => {
            let store = SqliteStore::open(&db_path)?;
            for (id, ps) in store.list_parameter_sets()? {
                println!(
                    "{:>4}  gain {:.2}  tau {:.2}  noise {:.2}  false-warn {:.2}  miss {:.2}",
                    id,
                    ps.gain_coef,
                    ps.time_const,
                    ps.noise_coef,
                    ps.false_warning_prob,
                    ps.missing_danger_prob
                );
            }
        }
    }

    Ok(())
}

fn resolve_db_path(cli_db: Option<PathBuf>) -> PathBuf {
    cli_db
        .or_else(|| FileConfigStore::new().load().database_path)
        .or_else(AppDirs::db_path)
        .unwrap_or_else(|| PathBuf::from("vigil.db"))
}

fn render_snapshot(
    snapshot: &StatisticsSnapshot,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    debug!(format = %format, "rendering snapshot");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Table => {
            println!("games:   {}", snapshot.games_count);
            println!("stops:   {}", snapshot.stops_count);
            println!("crashes: {}", snapshot.crashes_count);
            println!("score:   {}", snapshot.total_score);
            println!();
            println!(
                "{:<24} {:>5} {:>10} {:>10}",
                "category", "count", "mean", "stdev"
            );
            for (label, stats) in [
                ("stop on signal", &snapshot.stop_on_signal),
                ("stop without signal", &snapshot.stop_without_signal),
                ("hint on signal", &snapshot.hint_on_signal),
                ("hint without signal", &snapshot.hint_without_signal),
                ("continue after signal", &snapshot.continue_after_signal),
            ] {
                println!(
                    "{:<24} {:>5} {:>10.3} {:>10.3}",
                    label, stats.count, stats.mean, stats.stdev
                );
            }
        }
    }
    Ok(())
}
