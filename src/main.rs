//! vibemq-retained - inspect and maintain VibeMQ retained message files
//!
//! Usage:
//!   vibemq-retained [OPTIONS] <COMMAND>
//!
//! Commands:
//!   dump     List the retained messages in a file
//!   check    Report the file version and message count
//!   upgrade  Rewrite a file in the current format
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   --print-metrics        Print Prometheus metrics after the command
//!   -h, --help             Print help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vibemq_core::config::Config;
use vibemq_core::persistence::{Checkpointer, RetainedMessagesDb};
use vibemq_core::retain::{RetainedMessage, RetainedTable};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// vibemq-retained - VibeMQ retained message file tool
#[derive(Parser, Debug)]
#[command(name = "vibemq-retained")]
#[command(author = "VibeMQ Contributors")]
#[command(version)]
#[command(about = "Inspect and upgrade VibeMQ retained message files")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Print Prometheus metrics to stdout after the command
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the retained messages in a file
    Dump {
        /// Retained file (default: the configured one)
        file: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Report the file version and message count
    Check {
        /// Retained file (default: the configured one)
        file: Option<PathBuf>,
    },
    /// Rewrite a file in the current format, dropping expired messages
    Upgrade {
        /// Retained file (default: the configured one)
        file: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct DumpEntry<'a> {
    topic: &'a str,
    qos: u8,
    age_secs: u64,
    expires_in_secs: Option<u64>,
    client_id: Option<&'a str>,
    username: Option<&'a str>,
    payload_len: usize,
}

impl<'a> DumpEntry<'a> {
    fn new(message: &'a RetainedMessage) -> Self {
        let publish = message.publish();
        Self {
            topic: &publish.topic,
            qos: publish.qos as u8,
            age_secs: publish.age().as_secs(),
            expires_in_secs: publish.remaining_expiry().map(|d| d.as_secs()),
            client_id: publish.client_id.as_deref(),
            username: publish.username.as_deref(),
            payload_len: publish.payload.len(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let mut config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .map_err(|e| format!("Error loading config: {}", e))?;

    // Setup logging - CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    match args.command {
        Command::Dump { file, json } => {
            point_at(&mut config, file);
            dump(&config, json)?;
        }
        Command::Check { file } => {
            point_at(&mut config, file);
            check(&config)?;
        }
        Command::Upgrade { file } => {
            point_at(&mut config, file);
            upgrade(&config)?;
        }
    }

    if args.print_metrics {
        if let Some(metrics) = vibemq_core::metrics::global() {
            print!("{}", metrics.render()?);
        }
    }

    Ok(())
}

/// Make the configured retained file `file`, when one was given
fn point_at(config: &mut Config, file: Option<PathBuf>) {
    let Some(file) = file else {
        return;
    };
    config.persistence.storage_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
    config.persistence.retained_file = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
}

fn open_db(config: &Config) -> RetainedMessagesDb {
    RetainedMessagesDb::new(config.persistence.retained_path())
        .with_max_file_size(config.persistence.max_file_size)
}

fn dump(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_db(config);
    db.open_read()?;
    let messages = db.load()?;
    db.close();

    let entries: Vec<_> = messages.iter().map(DumpEntry::new).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!(
        "{:<40} {:>3} {:>10} {:>10} {:<20} {:<16}",
        "TOPIC", "QOS", "AGE", "PAYLOAD", "CLIENT", "USERNAME"
    );
    for e in &entries {
        println!(
            "{:<40} {:>3} {:>9}s {:>10} {:<20} {:<16}",
            e.topic,
            e.qos,
            e.age_secs,
            e.payload_len,
            e.client_id.unwrap_or("-"),
            e.username.unwrap_or("-"),
        );
    }
    Ok(())
}

fn check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_db(config);
    let version = db.open_read()?;
    let messages = db.load()?;
    db.close();

    let bytes: usize = messages.iter().map(RetainedMessage::footprint).sum();
    let expired = messages.iter().filter(|m| m.publish().has_expired()).count();
    println!("file:     {}", config.persistence.retained_path().display());
    println!("version:  {}", version);
    if version.is_legacy() {
        println!("status:   legacy format, not readable");
    } else {
        println!("messages: {} ({} expired)", messages.len(), expired);
        println!("bytes:    {}", bytes);
    }
    Ok(())
}

fn upgrade(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let path = config.persistence.retained_path();

    let mut db = open_db(config);
    let version = db.open_read()?;
    db.close();
    if version.is_legacy() {
        return Err(format!(
            "'{}' is a {} development file and cannot be upgraded",
            path.display(),
            version
        )
        .into());
    }

    let checkpointer = Checkpointer::from_config(config, Arc::new(RetainedTable::new()));
    let loaded = checkpointer.load()?;
    let saved = checkpointer.save()?;
    println!(
        "upgraded {} from {} to {}: {} loaded, {} written",
        path.display(),
        version,
        vibemq_core::RetainedDbVersion::CURRENT,
        loaded,
        saved
    );
    Ok(())
}
