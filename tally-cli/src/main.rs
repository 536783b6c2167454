//! CLI for tally data directories.
//!
//! Provides commands for inspecting, querying, and compacting a node's data
//! directory without going through the HTTP server.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tally::compaction::{Compactor, DEFAULT_THRESHOLD};
use tally::{CounterStore, DEFAULT_DAYS, UsageKey};

/// tally: offline tools for usage counter data directories.
#[derive(Parser)]
#[command(name = "tally", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Print every app, environment, category, and key with its recent total.
    Tree {
        /// Path to the data directory.
        data_dir: PathBuf,

        /// Number of days the totals cover.
        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: u32,
    },

    /// Read the usages of one key.
    Query {
        /// Path to the data directory.
        data_dir: PathBuf,

        /// Application name.
        app: String,

        /// Environment name.
        env: String,

        /// Category name.
        category: String,

        /// Key name.
        key: String,

        /// Number of days back from today, today included.
        #[arg(long, default_value_t = DEFAULT_DAYS)]
        days: u32,

        /// Print one row per day instead of the total.
        #[arg(long)]
        by_date: bool,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Merge daily files into each key's compacted series.
    Compact {
        /// Path to the data directory.
        data_dir: PathBuf,

        /// Daily files a key needs before it is compacted.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: usize,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Tree { data_dir, days } => cmd_tree(&data_dir, days),
        Commands::Query {
            data_dir,
            app,
            env,
            category,
            key,
            days,
            by_date,
            format,
        } => UsageKey::new(app, env, category, key)
            .map_err(Into::into)
            .and_then(|key| cmd_query(&data_dir, &key, days, by_date, &format)),
        Commands::Compact {
            data_dir,
            threshold,
        } => cmd_compact(&data_dir, threshold),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn open(data_dir: &Path) -> Result<CounterStore, Box<dyn std::error::Error>> {
    if !data_dir.is_dir() {
        return Err(format!("No data directory at '{}'", data_dir.display()).into());
    }
    Ok(CounterStore::open(data_dir)?)
}

/// Implements `tally tree <data_dir>`.
fn cmd_tree(data_dir: &Path, days: u32) -> Result<(), Box<dyn std::error::Error>> {
    let store = open(data_dir)?;

    println!("Data directory: {}", data_dir.display());
    println!();

    let mut keys = 0usize;
    for app in store.list_apps()? {
        println!("{app}");
        for env in store.list_environments(&app)? {
            println!("  {env}");
            for category in store.list_categories(&app, &env)? {
                println!("    {category}");
                for name in store.list_keys(&app, &env, &category)? {
                    let key = UsageKey::new(app.as_str(), env.as_str(), category.as_str(), name.as_str())?;
                    let total = store.sum_usages(&key, days)?;
                    println!("      {name}: {total}");
                    keys += 1;
                }
            }
        }
    }

    println!();
    println!("Keys: {keys} (totals over {days} days)");
    let total_size = dir_size(data_dir)?;
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `tally query <data_dir> <app> <env> <category> <key>`.
fn cmd_query(
    data_dir: &Path,
    key: &UsageKey,
    days: u32,
    by_date: bool,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open(data_dir)?;

    if !by_date {
        let total = store.sum_usages(key, days)?;
        match format {
            OutputFormat::Csv => println!("{total}"),
            OutputFormat::Json => println!("{}", serde_json::json!({ "key": key.to_string(), "days": days, "total": total })),
        }
        return Ok(());
    }

    let rows = store.usages_by_date(key, days)?;
    match format {
        OutputFormat::Csv => {
            println!("# key={key}, days={days}");
            println!("date,count");
            for (date, count) in &rows {
                println!("{date},{count}");
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "key": key.to_string(),
                "days": days,
                "data": rows,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `tally compact <data_dir>`.
fn cmd_compact(data_dir: &Path, threshold: usize) -> Result<(), Box<dyn std::error::Error>> {
    let store = open(data_dir)?;
    let report = Compactor::new(&store).with_threshold(threshold).run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }

    #[test]
    fn test_query_args() {
        let cli = Cli::try_parse_from([
            "tally", "query", "/data", "app", "env", "cat", "key", "--days", "7", "--by-date",
        ])
        .unwrap();
        let Commands::Query { days, by_date, key, .. } = cli.command else {
            panic!("expected query");
        };
        assert_eq!(days, 7);
        assert!(by_date);
        assert_eq!(key, "key");
    }

    #[test]
    fn test_compact_and_dir_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::open(dir.path()).unwrap();
        let key = UsageKey::new("app", "env", "cat", "key").unwrap();
        store.record(&key, 3).unwrap();

        assert!(dir_size(dir.path()).unwrap() > 0);
        assert!(cmd_compact(dir.path(), 1).is_ok());
        assert_eq!(store.sum_usages(&key, 1).unwrap(), 3);
    }
}
