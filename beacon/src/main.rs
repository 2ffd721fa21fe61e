//! beacon - CLI tool for the local event queue
//!
//! This tool provides commands for:
//! - Checking collector configuration and queue status
//! - Recording a one-off event
//! - Manually flushing pending events
//! - Inspecting and purging the pending queue
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/beacon/events.db (~/.local/share/beacon/events.db)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)

use anyhow::{bail, Context, Result};
use beacon_core::collector::FlushStats;
use beacon_core::config::CollectorConfig;
use beacon_core::{Collector, Config, EventStore, EventType};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Inspect and drive the local beacon event queue")]
#[command(version)]
struct Args {
    /// Write logs to the log directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show collector configuration and queue status
    Status,

    /// Record one event and attempt delivery
    Track {
        /// Event type: opened-app, login, viewed-link, shared-link or an integer code
        event_type: String,

        /// Link or loop the event refers to
        #[arg(short, long)]
        subject: Option<String>,

        /// Sub-classification of the subject
        #[arg(short, long)]
        channel: Option<String>,

        /// External properties as a JSON object
        #[arg(short, long)]
        properties: Option<String>,
    },

    /// Deliver pending events now
    Flush,

    /// List the oldest pending events
    Pending {
        /// Maximum number of events to show
        #[arg(
            short,
            long,
            default_value_t = 20,
            value_parser = RangedU64ValueParser::<usize>::new().range(1..)
        )]
        limit: usize,
    },

    /// Delete every pending event for the configured app key
    Purge,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Held until exit so buffered log lines are written
    let _log_guard = if args.verbose {
        Some(beacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Track {
            event_type,
            subject,
            channel,
            properties,
        } => cmd_track(
            &config,
            &event_type,
            subject.as_deref(),
            channel.as_deref(),
            properties.as_deref(),
        ),
        Command::Flush => cmd_flush(&config),
        Command::Pending { limit } => cmd_pending(&config, limit),
        Command::Purge => cmd_purge(&config),
    }
}

/// Open the pending queue, or `None` if nothing has been stored yet
fn open_store(collector: &CollectorConfig) -> Result<Option<EventStore>> {
    let Some(app_key) = collector.app_key.as_deref() else {
        println!("No app key configured. Run 'status' for details.");
        return Ok(None);
    };

    let db_path = collector.resolved_database_path();
    if !db_path.exists() {
        println!("Database not found at {}", db_path.display());
        return Ok(None);
    }

    let store = EventStore::open(&db_path, app_key).context("failed to open database")?;
    Ok(Some(store))
}

fn start_collector(config: &Config) -> Result<Option<Collector>> {
    if !config.collector.is_ready() {
        println!("Collector is not configured. Run 'status' for details.");
        return Ok(None);
    }

    let collector = Collector::from_config(&config.collector).context("failed to start collector")?;
    Ok(Some(collector))
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Beacon Collector Configuration");
    println!("==============================");
    println!();

    let collector = &config.collector;

    println!(
        "App Key:         {}",
        collector.app_key.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Server URL:      {}",
        collector.server_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Secret Key:      {}",
        if collector.secret_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Device Type:     {}", collector.device_type);
    println!("Min Batch Size:  {}", collector.min_batch_size);
    println!("Max Batch Size:  {}", collector.max_batch_size);
    println!("Timeout:         {}s", collector.timeout_secs);

    let db_path = collector.resolved_database_path();
    println!("Database:        {}", db_path.display());
    println!(
        "Logs:            {}.*",
        beacon_core::logging::log_file_path(&config.logging).display()
    );

    println!();
    match collector.validate() {
        Ok(()) => println!("Status: Ready to deliver"),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Configure the collector in {}:", Config::config_path().display());
            println!();
            println!("  [collector]");
            println!("  app_key = \"your-app-key\"");
            println!("  server_url = \"https://collector.example.com\"");
        }
    }

    if let (Some(app_key), true) = (collector.app_key.as_deref(), db_path.exists()) {
        let store = EventStore::open(&db_path, app_key).context("failed to open database")?;
        println!();
        println!("Pending Events:  {}", store.count()?);
    }

    Ok(())
}

fn cmd_track(
    config: &Config,
    event_type: &str,
    subject: Option<&str>,
    channel: Option<&str>,
    properties: Option<&str>,
) -> Result<()> {
    let Some(parsed_type) = EventType::parse(event_type) else {
        bail!("unknown event type '{}'", event_type);
    };

    let properties: Option<serde_json::Value> = properties
        .map(serde_json::from_str)
        .transpose()
        .context("--properties is not valid JSON")?;
    if let Some(value) = &properties {
        if !value.is_object() {
            bail!("--properties must be a JSON object");
        }
    }

    let Some(collector) = start_collector(config)? else {
        return Ok(());
    };

    collector.collect(parsed_type, subject, channel, properties.as_ref());
    collector.sync();

    let stats = collector.stats();
    let pending = collector.pending_count()?;
    collector.shutdown();

    if stats.events_appended == 0 {
        bail!("event was not stored (run with --verbose for details)");
    }

    println!("Recorded {} event", parsed_type);
    if stats.events_delivered > 0 {
        println!("Delivered {} event(s)", stats.events_delivered);
    }
    if pending > 0 {
        println!("{} event(s) pending delivery", pending);
    }
    print_stats(&stats);

    Ok(())
}

fn cmd_flush(config: &Config) -> Result<()> {
    let Some(collector) = start_collector(config)? else {
        return Ok(());
    };

    let pending = collector.pending_count()?;
    if pending == 0 {
        println!("No pending events to flush.");
        collector.shutdown();
        return Ok(());
    }

    println!("Flushing {} pending event(s)...", pending);

    // One flush sends at most max_batch_size; keep going while batches land.
    let mut remaining = pending;
    loop {
        collector.flush();
        collector.sync();
        let now = collector.pending_count()?;
        if now == 0 || now >= remaining {
            remaining = now;
            break;
        }
        remaining = now;
    }

    let stats = collector.stats();
    collector.shutdown();

    if stats.events_delivered > 0 {
        println!("Flushed {} event(s)", stats.events_delivered);
    } else {
        println!("No events flushed");
    }
    if remaining > 0 {
        println!("{} event(s) still pending", remaining);
    }
    print_stats(&stats);

    Ok(())
}

fn cmd_pending(config: &Config, limit: usize) -> Result<()> {
    let Some(store) = open_store(&config.collector)? else {
        return Ok(());
    };

    let total = store.count()?;
    let Some(batch) = store.peek(limit)? else {
        println!("No pending events.");
        return Ok(());
    };

    println!("Pending Events ({} total)", total);
    println!("==============");
    println!();
    println!(
        "{:<20} {:<14} {:<24} {:<12}",
        "Timestamp", "Type", "Subject", "Channel"
    );
    println!("{:-<72}", "");

    for event in &batch.events {
        let subject = event.subject.as_deref().unwrap_or("-");
        let subject = if subject.chars().count() > 22 {
            format!("{}...", subject.chars().take(19).collect::<String>())
        } else {
            subject.to_string()
        };

        println!(
            "{:<20} {:<14} {:<24} {:<12}",
            event.timestamp,
            event.event_type.to_string(),
            subject,
            event.channel.as_deref().unwrap_or("-")
        );
    }

    if total > batch.records {
        println!();
        println!("... and {} more", total - batch.records);
    }

    Ok(())
}

fn cmd_purge(config: &Config) -> Result<()> {
    let Some(store) = open_store(&config.collector)? else {
        return Ok(());
    };

    let removed = store.purge()?;
    println!("Removed {} pending event(s)", removed);

    Ok(())
}

fn print_stats(stats: &FlushStats) {
    if stats.flushes == 0 {
        return;
    }

    println!();
    println!("Stats:");
    println!("  Flushes:    {}", stats.flushes);
    println!("  Delivered:  {}", stats.events_delivered);
    println!("  Discarded:  {}", stats.events_discarded);
    println!("  Failures:   {}", stats.transient_failures);
}
