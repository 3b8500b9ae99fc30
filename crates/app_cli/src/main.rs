use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::{AppConfig, ConfigStore};
use core_types::{CheckIn, Entry, NewCheckIn, NewEntry, Record};
use gateway_http::{HttpDiaryGateway, Retrying};
use query_cache::{FetchOutcome, PaginatedQuery, QueryClient};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "daybook", version, about = "Diary and mood check-in client")]
struct Cli {
    /// Directory holding config.json (defaults to the platform config dir).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Overrides the API base URL from the config file.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List diary entries, newest first.
    Entries {
        #[arg(long)]
        limit: Option<NonZeroU32>,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Toggle the favorite flag of an entry.
    Favorite { id: i64 },
    /// Write a new diary entry.
    Write {
        #[arg(long)]
        date: Option<NaiveDate>,
        content: String,
    },
    /// List mood check-ins.
    CheckIns {
        #[arg(long)]
        limit: Option<NonZeroU32>,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Record a mood check-in.
    CheckIn {
        #[arg(long)]
        mood: String,
        #[arg(long)]
        intensity: u8,
        #[arg(long = "cause")]
        causes: Vec<String>,
        #[arg(long = "with")]
        companions: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    /// Print the resolved config file.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.push("daybook");
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let config_store = match &cli.config_dir {
        Some(dir) => ConfigStore::from_dir(dir),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = match config_store.load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err:#}");
            AppConfig::default()
        }
    };
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }

    if let Command::Config = cli.command {
        println!("{}", config_store.path().display());
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(run(cli.command, &config))
}

async fn run(command: Command, config: &AppConfig) -> Result<()> {
    let gateway = HttpDiaryGateway::new(&config.api)?;
    info!(base_url = gateway.base_url(), "gateway ready");
    let client = QueryClient::from_gateway(Arc::new(Retrying::new(gateway, config.retry.clone())));

    let result = match command {
        Command::Entries { limit, pages } => {
            let query = client.entries(limit.unwrap_or(config.pagination.entries_limit()));
            load_pages(&query, pages).await?;
            for entry in query.items() {
                println!("{}", format_entry(&entry));
            }
            print_footer(&query);
            Ok(())
        }
        Command::Favorite { id } => {
            let entry = client.toggle_favorite(id).await?;
            println!("{}", format_entry(&entry));
            Ok(())
        }
        Command::Write { date, content } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let entry = client.create_entry(&NewEntry::new(content, date)).await?;
            println!("{}", format_entry(&entry));
            Ok(())
        }
        Command::CheckIns { limit, pages } => {
            let query = client.check_ins(limit.unwrap_or(config.pagination.check_ins_limit()));
            load_pages(&query, pages).await?;
            for check_in in query.items() {
                println!("{}", format_check_in(&check_in));
            }
            print_footer(&query);
            Ok(())
        }
        Command::CheckIn {
            mood,
            intensity,
            causes,
            companions,
            notes,
            location,
        } => {
            let mut draft = NewCheckIn::new(mood, intensity)
                .with_causes(causes)
                .with_companions(companions);
            if let Some(notes) = notes {
                draft = draft.with_notes(notes);
            }
            if let Some(location) = location {
                draft = draft.with_location(location, None);
            }
            let check_in = client.create_check_in(&draft).await?;
            println!("{}", format_check_in(&check_in));
            Ok(())
        }
        Command::Config => Ok(()),
    };

    client.dispose();
    result
}

async fn load_pages<T: Record>(query: &PaginatedQuery<T>, pages: u32) -> Result<()> {
    for _ in 0..pages.max(1) {
        match query.fetch_next_page().await? {
            FetchOutcome::Appended { .. } => {}
            FetchOutcome::Exhausted | FetchOutcome::InFlight | FetchOutcome::Discarded => break,
        }
    }
    Ok(())
}

fn print_footer<T: Record>(query: &PaginatedQuery<T>) {
    let snapshot = query.snapshot();
    if snapshot.has_more {
        println!(
            "-- {} loaded, more from offset {}",
            snapshot.items.len(),
            snapshot.next_offset
        );
    } else {
        println!("-- {} loaded, end of list", snapshot.items.len());
    }
}

fn format_entry(entry: &Entry) -> String {
    let star = if entry.is_favorite { "*" } else { " " };
    let headline = entry
        .title
        .as_deref()
        .or_else(|| entry.content.lines().next())
        .unwrap_or_default();
    let mut line = match &entry.mood {
        Some(mood) => format!("{star} #{} {} [{mood}] {headline}", entry.id, entry.date),
        None => format!("{star} #{} {} {headline}", entry.id, entry.date),
    };
    let emotions = entry.emotion_list();
    if !emotions.is_empty() {
        line.push_str(&format!(" ({})", emotions.join(", ")));
    }
    line
}

fn format_check_in(check_in: &CheckIn) -> String {
    let mut line = format!(
        "#{} {} {} ({}/10)",
        check_in.id,
        check_in.created_at.format("%Y-%m-%d %H:%M"),
        check_in.mood,
        check_in.mood_intensity
    );
    if !check_in.mood_causes.is_empty() {
        line.push_str(&format!(" because {}", check_in.mood_causes.join(", ")));
    }
    if !check_in.companions.is_empty() {
        line.push_str(&format!(" with {}", check_in.companions.join(", ")));
    }
    if let Some(location) = &check_in.location {
        line.push_str(&format!(" at {location}"));
    }
    line
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "daybook.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,daybook=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
