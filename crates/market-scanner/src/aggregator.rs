//! Market Aggregator
//!
//! Fans the ticker universe out to the per-ticker analyzer and folds the
//! successful tables into one ranked snapshot.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use analysis_core::{
    AlertBatch, AnalysisError, IndicatorRow, LookbackPeriod, MarketSnapshot, SnapshotMode,
};
use technical_analysis::{TickerAnalyzer, TickerTable};
use tokio::sync::Semaphore;

use crate::cache::{SnapshotCache, SnapshotKey};

/// Max concurrent ticker fetches
pub const DEFAULT_CONCURRENCY: usize = 8;

const US_MARKET: &str = "us";
const NON_US: &str = "non-us";

/// Which market tags survive into the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeFilter {
    /// Rows whose market tag equals the code
    Named(String),
    /// Rows tagged with any market other than `us`
    NonUs,
}

impl ExchangeFilter {
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        let code = raw.trim().to_ascii_lowercase();
        match code.as_str() {
            "" => Err(AnalysisError::InvalidData("Empty exchange code".to_string())),
            NON_US => Ok(ExchangeFilter::NonUs),
            _ => Ok(ExchangeFilter::Named(code)),
        }
    }

    pub fn matches(&self, market: Option<&str>) -> bool {
        let Some(market) = market.map(|m| m.trim().to_ascii_lowercase()) else {
            return false;
        };

        match self {
            ExchangeFilter::Named(code) => market == *code,
            ExchangeFilter::NonUs => !market.is_empty() && market != US_MARKET && market != NON_US,
        }
    }

    /// Keep only the rows whose market passes the filter, preserving order
    pub fn apply(&self, snapshot: &mut MarketSnapshot) {
        snapshot.rows.retain(|r| self.matches(r.market.as_deref()));
    }
}

/// Options for one scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Keep only each ticker's most recent row, ranked by RSI
    pub latest_only: bool,
    pub exchange: Option<ExchangeFilter>,
    pub period: LookbackPeriod,
}

impl ScanOptions {
    pub fn mode(&self) -> SnapshotMode {
        if self.latest_only {
            SnapshotMode::LatestOnly
        } else {
            SnapshotMode::Full
        }
    }
}

/// Outcome of one scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub snapshot: MarketSnapshot,
    /// Alerts of every ticker that was analyzed, in input order
    pub alerts: AlertBatch,
    /// Tickers that produced no table, in input order
    pub failed: Vec<String>,
}

impl ScanReport {
    fn empty(mode: SnapshotMode) -> Self {
        Self {
            snapshot: MarketSnapshot::empty(mode),
            alerts: AlertBatch::default(),
            failed: Vec::new(),
        }
    }
}

/// Runs a [`TickerAnalyzer`] over a ticker universe on a bounded worker pool
pub struct MarketScanner {
    analyzer: Arc<TickerAnalyzer>,
    concurrency: usize,
}

impl MarketScanner {
    pub fn new(analyzer: TickerAnalyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Analyze every ticker and aggregate the successful ones.
    ///
    /// Failed tickers are logged and listed in [`ScanReport::failed`]; a batch
    /// where every ticker fails yields an empty snapshot.
    pub async fn scan(&self, tickers: &[String], options: &ScanOptions) -> ScanReport {
        let mut report = self.scan_unfiltered(tickers, options).await;
        if let Some(filter) = &options.exchange {
            filter.apply(&mut report.snapshot);
        }
        report
    }

    /// Serve a fresh cached snapshot when there is one, otherwise scan and
    /// refresh the cache.
    ///
    /// The cache holds the unfiltered snapshot; the exchange filter is applied
    /// on the way out in both cases. A file written by a scan with another
    /// mode, period or ticker list is never served. A cache hit carries no
    /// alerts.
    pub async fn scan_cached(
        &self,
        cache: &SnapshotCache,
        tickers: &[String],
        options: &ScanOptions,
    ) -> ScanReport {
        let mode = options.mode();
        let key = SnapshotKey::new(mode, &options.period, tickers);

        let mut report = match cache.load_fresh(&key).await {
            Ok(Some(snapshot)) => {
                tracing::info!("Using cached snapshot {} ({} rows)", cache.path().display(), snapshot.len());
                ScanReport {
                    snapshot,
                    ..ScanReport::empty(mode)
                }
            }
            Ok(None) => self.scan_and_store(cache, &key, tickers, options).await,
            Err(e) => {
                tracing::warn!("Ignoring unreadable snapshot cache: {}", e);
                self.scan_and_store(cache, &key, tickers, options).await
            }
        };

        if let Some(filter) = &options.exchange {
            filter.apply(&mut report.snapshot);
        }
        report
    }

    async fn scan_and_store(
        &self,
        cache: &SnapshotCache,
        key: &SnapshotKey,
        tickers: &[String],
        options: &ScanOptions,
    ) -> ScanReport {
        let report = self.scan_unfiltered(tickers, options).await;
        if let Err(e) = cache.store(&report.snapshot, key).await {
            tracing::warn!("Failed to write snapshot cache: {}", e);
        }
        report
    }

    async fn scan_unfiltered(&self, tickers: &[String], options: &ScanOptions) -> ScanReport {
        let mode = options.mode();
        let tickers = unique_tickers(tickers);
        let total = tickers.len();
        if total == 0 {
            return ScanReport::empty(mode);
        }

        tracing::info!("Scanning {} tickers (concurrency {}, period {})", total, self.concurrency, options.period);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for (index, ticker) in tickers.iter().enumerate() {
            let analyzer = Arc::clone(&self.analyzer);
            let semaphore = Arc::clone(&semaphore);
            let ticker = ticker.clone();
            let period = options.period;

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AnalysisError::fetch(&ticker, e))?;
                analyzer.analyze(&ticker, &period).await
            });
            handles.push((index, handle));
        }

        // Slot results by input index so completion order never leaks out
        let mut tables: Vec<Option<TickerTable>> = vec![None; total];
        let mut failed = Vec::new();

        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(table)) => tables[index] = Some(table),
                Ok(Err(_)) => failed.push(tickers[index].clone()),
                Err(e) => {
                    tracing::warn!("Worker for {} aborted: {}", tickers[index], e);
                    failed.push(tickers[index].clone());
                }
            }
        }

        let tables: Vec<TickerTable> = tables.into_iter().flatten().collect();

        let mut alerts = AlertBatch::default();
        for table in &tables {
            alerts.extend(table.alerts());
        }

        let rows: Vec<IndicatorRow> = if options.latest_only {
            let mut latest: Vec<IndicatorRow> = tables.into_iter().filter_map(|t| t.into_latest()).collect();
            latest.sort_by(compare_rsi);
            latest
        } else {
            tables.into_iter().flat_map(|t| t.rows).collect()
        };

        tracing::info!(
            "Scan finished: {} rows from {} tickers ({} failed, {} alerts)",
            rows.len(),
            total - failed.len(),
            failed.len(),
            alerts.len()
        );

        ScanReport {
            snapshot: MarketSnapshot::new(mode, rows),
            alerts,
            failed,
        }
    }
}

/// Trimmed tickers without blanks or repeats, first occurrence wins
pub(crate) fn unique_tickers(tickers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

/// Ascending RSI with undefined values last
fn compare_rsi(a: &IndicatorRow, b: &IndicatorRow) -> Ordering {
    match (a.rsi, b.rsi) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
