//! Replays extracted aggTrades archives into the candle database.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use footprint_backfill::{
    day_start_ms, gap_report, init_logging, log_stored_ranges, rebuild_htf, BackfillReplay,
    BackfillWindow,
};
use footprint_core::{Config, Interval};
use footprint_ingestion::{archive_file_name, read_archive_file};
use footprint_store::{CandleStore, SqliteCandleStore};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "footprint-backfill", about = "Backfill footprint candles from trade archives")]
struct Cli {
    #[arg(long, value_name = "FILE", help = "JSON config file (defaults apply when omitted)")]
    config: Option<PathBuf>,
    #[arg(long, default_value = "footprint.db", value_name = "FILE")]
    db: PathBuf,
    #[arg(long, value_name = "SYMBOL", help = "Only process this symbol")]
    symbol: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay archives day by day.
    Run {
        #[arg(long, value_name = "DIR")]
        archive_dir: Option<PathBuf>,
        #[arg(long, value_name = "YYYY-MM-DD", help = "First day (UTC) to replay")]
        start: Option<NaiveDate>,
        #[arg(long, value_name = "YYYY-MM-DD", help = "Last day (UTC) to replay")]
        end: Option<NaiveDate>,
    },
    /// Report gaps in stored candles.
    Gaps,
    /// Rebuild one higher-interval candle from stored candles.
    Rebuild {
        #[arg(long, value_name = "INTERVAL", help = "Target interval, e.g. \"4h\" or \"1d\"")]
        interval: Interval,
        #[arg(long, value_name = "YYYY-MM-DD", help = "Day (UTC) inside the target candle")]
        day: NaiveDate,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("unable to load config {}", path.display()))?,
        None => Config::default(),
    };
    let symbols = match &cli.symbol {
        Some(symbol) => vec![symbol.clone()],
        None => config.symbols.clone(),
    };
    let mut store = SqliteCandleStore::open(&cli.db)
        .with_context(|| format!("unable to open database {}", cli.db.display()))?;

    match cli.command {
        Command::Run {
            archive_dir,
            start,
            end,
        } => {
            let archive_dir = archive_dir.unwrap_or_else(|| config.backfill.archive_dir.clone());
            let (Some(start), Some(end)) = (
                start.or(config.backfill.start_day),
                end.or(config.backfill.end_day),
            ) else {
                bail!(
                    "backfill needs --start and --end (or backfill.start_day/end_day in the config)"
                );
            };
            let requested = BackfillWindow::new(start, end)?;

            for symbol in &symbols {
                store = backfill_symbol(&config, symbol, store, requested, &archive_dir)?;
            }
        }
        Command::Gaps => {
            for symbol in &symbols {
                gap_report(&store, &config.exchange, symbol)?;
            }
        }
        Command::Rebuild { interval, day } => {
            for symbol in &symbols {
                let open_ms = day_start_ms(day);
                let candle = rebuild_htf(&store, &config.exchange, symbol, interval, open_ms)?;
                info!(
                    symbol = %symbol,
                    %interval,
                    open_time_ms = candle.open_time_ms,
                    volume = %candle.volume,
                    "Rebuilt candle"
                );
                store.upsert_candles(&[candle])?;
            }
        }
    }

    Ok(())
}

fn backfill_symbol(
    config: &Config,
    symbol: &str,
    store: SqliteCandleStore,
    requested: BackfillWindow,
    archive_dir: &std::path::Path,
) -> Result<SqliteCandleStore> {
    gap_report(&store, &config.exchange, symbol)?;

    let ranges = store.timestamp_range(&config.exchange, symbol)?;
    log_stored_ranges(symbol, &ranges);

    let Some(window) = requested.clamp(ranges.get(&config.base_interval).copied()) else {
        warn!(symbol, "Nothing left to backfill");
        return Ok(store);
    };

    let mut replay = BackfillReplay::new(config, symbol, store)?;
    replay.seed_from_store(&window)?;

    let exchange = config.exchange.clone();
    let summary = replay.run(window, |day| {
        let path = archive_dir.join(archive_file_name(symbol, day));
        read_archive_file(path, &exchange, symbol)
    });

    if !summary.failed_days.is_empty() {
        warn!(
            symbol,
            failed = summary.failed_days.len(),
            "Some days could not be replayed, rerun to fill the gaps"
        );
    }
    Ok(replay.into_store())
}
