//! tracker
//!
//! Scores every ticker of a profile sheet with the technical indicators and
//! stage classifiers, prints the ranked snapshot and optionally writes it back
//! to the sheet directory and mails the day's signals.
//!
//! Usage:
//!   tracker -p T212 -l                 # latest row per ticker, ranked by RSI
//!   tracker -p Dividend -e non-us -u   # foreign listings, update the sheet
//!   tracker -l --cache --alert         # reuse a fresh cache, mail signals
//!   tracker -t VOD.L -tp 1y            # one ticker's table

mod cli;
mod config;
mod sheet;

use std::sync::Arc;
use std::time::Instant;

use analysis_core::{MarketSnapshot, SnapshotMode};
use anyhow::Context;
use market_scanner::{MarketScanner, ScanOptions, ScanReport, SnapshotCache};
use notification_service::{Alert, AlertFormatter, NotificationConfig, NotificationService};
use polygon_client::PolygonClient;
use technical_analysis::TickerAnalyzer;

use cli::CliArgs;
use config::TrackerConfig;
use sheet::CsvSheetStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = TrackerConfig::from_env()?;
    init_tracing(config.log_json);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match CliArgs::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!();
            eprintln!("{}", cli::usage());
            std::process::exit(2);
        }
    };
    if cli.help {
        println!("{}", cli::usage());
        return Ok(());
    }

    let started = Instant::now();

    let api_key = config
        .polygon_api_key
        .clone()
        .context("POLYGON_API_KEY must be set")?;
    let polygon = PolygonClient::with_rate_limit(api_key, config.polygon_rate_limit);
    let analyzer = TickerAnalyzer::new(Arc::new(polygon)).with_fetch_timeout(config.fetch_timeout());

    if let Some(ticker) = &cli.ticker {
        let table = analyzer
            .analyze(ticker, &cli.period)
            .await
            .with_context(|| format!("Ticker {} failed", ticker))?;
        let snapshot = MarketSnapshot::new(SnapshotMode::Full, table.rows);
        println!("{}", AlertFormatter::render_table(&snapshot.to_table()));
        return Ok(());
    }

    let store = CsvSheetStore::new(&config.sheets_dir);
    let tickers = store.read_tickers(&cli.profile)?;

    let concurrency = cli.concurrency.unwrap_or(config.scan_concurrency);
    tracing::info!(
        "tracker: profile={}, {} tickers, last_day_only={}, exchange={:?}, cache={}, concurrency={}",
        cli.profile, tickers.len(), cli.last_day_only, cli.exchange, cli.use_cache, concurrency
    );

    let scanner = MarketScanner::new(analyzer).with_concurrency(concurrency);
    let options = ScanOptions {
        latest_only: cli.last_day_only,
        exchange: cli.exchange.clone(),
        period: cli.period,
    };

    let report = if cli.use_cache {
        let cache = SnapshotCache::new(&config.snapshot_cache_path).with_max_age(config.snapshot_max_age());
        scanner.scan_cached(&cache, &tickers, &options).await
    } else {
        scanner.scan(&tickers, &options).await
    };

    if !report.failed.is_empty() {
        tracing::warn!("{} tickers failed: {}", report.failed.len(), report.failed.join(", "));
    }

    let table = report.snapshot.to_table();
    println!("{}", AlertFormatter::render_table(&table));

    if cli.update_worksheet {
        store.write_table(&cli.profile, &table)?;
    }

    if cli.alert {
        send_alerts(&report).await;
    }

    tracing::info!("Computation took: {:.2} seconds", started.elapsed().as_secs_f64());
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tracker=info,market_scanner=info,polygon_client=warn".into());

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Mail the flagged tickers, their messages and their latest rows
async fn send_alerts(report: &ScanReport) {
    if report.alerts.is_empty() {
        tracing::info!("No signals today, nothing to send");
        return;
    }

    let flagged_rows = report
        .alerts
        .flagged_tickers()
        .into_iter()
        .filter_map(|ticker| report.snapshot.row(ticker).cloned())
        .collect();
    let flagged = MarketSnapshot::new(SnapshotMode::LatestOnly, flagged_rows);
    let table = flagged.to_table();
    let body = AlertFormatter::render(&report.alerts, Some(table.as_slice()));

    let service = NotificationService::new(&NotificationConfig::from_env());
    if !service.has_channels() {
        println!("{}", body);
        return;
    }

    let delivered = service.send_alert(&Alert::market_signals(body)).await;
    tracing::info!("Signals sent via {} channel(s)", delivered);
}
