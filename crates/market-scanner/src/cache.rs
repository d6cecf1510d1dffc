//! Snapshot Cache
//!
//! One CSV file holding the last aggregated snapshot, plus a small JSON
//! manifest next to it recording which scan produced it. A file younger than
//! `max_age` whose manifest matches the requested scan is served instead of
//! re-fetching the whole universe.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use analysis_core::{AnalysisError, IndicatorRow, LookbackPeriod, MarketSnapshot, SnapshotMode};
use serde::{Deserialize, Serialize};

use crate::aggregator::unique_tickers;

pub const DEFAULT_CACHE_PATH: &str = "last_day.csv";
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(12 * 3600);

const MANIFEST_SUFFIX: &str = ".meta.json";

/// What a cached snapshot was computed from. A cached file is only served to
/// a scan with an equal key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub mode: SnapshotMode,
    pub period: String,
    /// Trimmed, de-duplicated, in scan order
    pub tickers: Vec<String>,
}

impl SnapshotKey {
    pub fn new(mode: SnapshotMode, period: &LookbackPeriod, tickers: &[String]) -> Self {
        Self {
            mode,
            period: period.to_string(),
            tickers: unique_tickers(tickers),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
    max_age: Duration,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH)
    }
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar manifest path: the cache path with `.meta.json` appended
    pub fn manifest_path(&self) -> PathBuf {
        let mut path = OsString::from(self.path.as_os_str());
        path.push(MANIFEST_SUFFIX);
        PathBuf::from(path)
    }

    /// The cached snapshot, if the file exists, was written less than
    /// `max_age` ago and was stored under the same key
    pub async fn load_fresh(&self, key: &SnapshotKey) -> Result<Option<MarketSnapshot>, AnalysisError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AnalysisError::CacheError(e.to_string())),
        };

        let modified = metadata
            .modified()
            .map_err(|e| AnalysisError::CacheError(e.to_string()))?;
        // A timestamp in the future counts as just written
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= self.max_age {
            tracing::debug!("Snapshot cache {} is stale ({}s old)", self.path.display(), age.as_secs());
            return Ok(None);
        }

        match self.read_manifest().await? {
            Some(stored) if stored == *key => {}
            Some(_) => {
                tracing::debug!("Snapshot cache {} was built for another scan", self.path.display());
                return Ok(None);
            }
            None => {
                tracing::debug!("Snapshot cache {} has no usable manifest", self.path.display());
                return Ok(None);
            }
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AnalysisError::CacheError(e.to_string()))?;
        let rows = rows_from_csv(&contents)?;

        tracing::debug!("Snapshot cache hit: {} ({} rows)", self.path.display(), rows.len());
        Ok(Some(MarketSnapshot::new(key.mode, rows)))
    }

    /// Overwrite the cache file with `snapshot` and record `key` beside it.
    /// Empty snapshots are skipped.
    pub async fn store(&self, snapshot: &MarketSnapshot, key: &SnapshotKey) -> Result<(), AnalysisError> {
        if snapshot.is_empty() {
            tracing::debug!("Not caching an empty snapshot");
            return Ok(());
        }

        let contents = to_csv_string(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AnalysisError::CacheError(e.to_string()))?;
        }
        // Drop the old manifest first and write the new one after the rows,
        // so a half-finished store always reads as a miss
        let manifest_path = self.manifest_path();
        match tokio::fs::remove_file(&manifest_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AnalysisError::CacheError(e.to_string())),
        }
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| AnalysisError::CacheError(e.to_string()))?;

        let manifest = serde_json::to_string(key).map_err(|e| AnalysisError::CacheError(e.to_string()))?;
        tokio::fs::write(&manifest_path, manifest)
            .await
            .map_err(|e| AnalysisError::CacheError(e.to_string()))?;

        tracing::info!("Wrote {} rows to {}", snapshot.len(), self.path.display());
        Ok(())
    }

    /// `None` when the manifest is missing or malformed
    async fn read_manifest(&self) -> Result<Option<SnapshotKey>, AnalysisError> {
        let contents = match tokio::fs::read_to_string(self.manifest_path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AnalysisError::CacheError(e.to_string())),
        };

        Ok(serde_json::from_str(&contents).ok())
    }
}

/// CSV rendering of a snapshot: a header row, then one line per row
pub fn to_csv_string(snapshot: &MarketSnapshot) -> Result<String, AnalysisError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &snapshot.rows {
        writer
            .serialize(row)
            .map_err(|e| AnalysisError::CacheError(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AnalysisError::CacheError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AnalysisError::CacheError(e.to_string()))
}

fn rows_from_csv(contents: &str) -> Result<Vec<IndicatorRow>, AnalysisError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(contents.as_bytes());

    reader
        .deserialize()
        .collect::<Result<Vec<IndicatorRow>, _>>()
        .map_err(|e| AnalysisError::CacheError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{Break20, BoxState, Stage, Trend};
    use chrono::NaiveDate;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir().join(format!("snapshot-cache-{}.csv", uuid::Uuid::new_v4()))
    }

    fn cleanup(cache: &SnapshotCache) {
        let _ = std::fs::remove_file(cache.path());
        let _ = std::fs::remove_file(cache.manifest_path());
    }

    fn key(mode: SnapshotMode, list: &[&str]) -> SnapshotKey {
        let list: Vec<String> = list.iter().map(|t| t.to_string()).collect();
        SnapshotKey::new(mode, &LookbackPeriod::Max, &list)
    }

    fn latest_key() -> SnapshotKey {
        key(SnapshotMode::LatestOnly, &["AAPL", "VOD.L"])
    }

    fn row(ticker: &str, market: Option<&str>, rsi: Option<f64>, break_20: Option<Break20>) -> IndicatorRow {
        IndicatorRow {
            ticker: ticker.to_string(),
            market: market.map(|m| m.to_string()),
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            open: 10.25,
            high: 10.8,
            low: 10.1,
            close: 10.6,
            volume: 123_456,
            dividend: 0.0,
            split_ratio: 1.0,
            ema_5: 10.41,
            ema_10: 10.3,
            sma_20: Some(10.02),
            sma_200: None,
            rsi,
            macd: -0.015,
            trend: Trend::Up,
            box_state: BoxState::In,
            break_20,
            stage: Stage::Three,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::new(
            SnapshotMode::LatestOnly,
            vec![
                row("AAPL", Some("us"), Some(41.27), Some(Break20::CrossUp)),
                row("VOD.L", None, None, None),
            ],
        )
    }

    #[tokio::test]
    async fn test_store_then_load_fresh() {
        let cache = SnapshotCache::new(temp_cache_path());
        let snapshot = snapshot();

        cache.store(&snapshot, &latest_key()).await.unwrap();
        let loaded = cache.load_fresh(&latest_key()).await.unwrap();

        assert_eq!(loaded, Some(snapshot));
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_miss() {
        let cache = SnapshotCache::new(temp_cache_path());
        assert!(cache.load_fresh(&key(SnapshotMode::Full, &["AAPL"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_file_is_a_miss() {
        let cache = SnapshotCache::new(temp_cache_path()).with_max_age(Duration::ZERO);

        cache.store(&snapshot(), &latest_key()).await.unwrap();
        assert!(cache.load_fresh(&latest_key()).await.unwrap().is_none());
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_other_mode_is_a_miss() {
        let cache = SnapshotCache::new(temp_cache_path());

        cache.store(&snapshot(), &key(SnapshotMode::Full, &["AAPL", "VOD.L"])).await.unwrap();

        assert!(cache.load_fresh(&latest_key()).await.unwrap().is_none());
        assert!(cache
            .load_fresh(&key(SnapshotMode::Full, &["AAPL", "VOD.L"]))
            .await
            .unwrap()
            .is_some());
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_other_tickers_or_period_is_a_miss() {
        let cache = SnapshotCache::new(temp_cache_path());
        cache.store(&snapshot(), &latest_key()).await.unwrap();

        let fewer = key(SnapshotMode::LatestOnly, &["AAPL"]);
        assert!(cache.load_fresh(&fewer).await.unwrap().is_none());

        let list = vec!["AAPL".to_string(), "VOD.L".to_string()];
        let shorter = SnapshotKey::new(SnapshotMode::LatestOnly, &LookbackPeriod::Years(1), &list);
        assert!(cache.load_fresh(&shorter).await.unwrap().is_none());

        // Blanks and repeats do not change the key
        let padded = key(SnapshotMode::LatestOnly, &[" AAPL ", "", "VOD.L", "AAPL"]);
        assert!(cache.load_fresh(&padded).await.unwrap().is_some());
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_manifest_is_a_miss() {
        let cache = SnapshotCache::new(temp_cache_path());
        cache.store(&snapshot(), &latest_key()).await.unwrap();

        std::fs::write(cache.manifest_path(), "not json").unwrap();
        assert!(cache.load_fresh(&latest_key()).await.unwrap().is_none());

        std::fs::remove_file(cache.manifest_path()).unwrap();
        assert!(cache.load_fresh(&latest_key()).await.unwrap().is_none());
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_store_overwrites_previous_snapshot() {
        let cache = SnapshotCache::new(temp_cache_path());

        cache.store(&snapshot(), &latest_key()).await.unwrap();
        let newer = MarketSnapshot::new(
            SnapshotMode::LatestOnly,
            vec![row("MSFT", Some("us"), Some(63.0), Some(Break20::None))],
        );
        let msft = key(SnapshotMode::LatestOnly, &["MSFT"]);
        cache.store(&newer, &msft).await.unwrap();

        assert!(cache.load_fresh(&latest_key()).await.unwrap().is_none());
        let loaded = cache.load_fresh(&msft).await.unwrap().unwrap();
        assert_eq!(loaded.tickers(), vec!["MSFT"]);
        cleanup(&cache);
    }

    #[tokio::test]
    async fn test_empty_snapshot_not_persisted() {
        let cache = SnapshotCache::new(temp_cache_path());

        cache
            .store(&MarketSnapshot::empty(SnapshotMode::Full), &key(SnapshotMode::Full, &["AAPL"]))
            .await
            .unwrap();
        assert!(!cache.path().exists());
        assert!(!cache.manifest_path().exists());
    }

    #[test]
    fn test_manifest_sits_next_to_cache_file() {
        let cache = SnapshotCache::new("data/last_day.csv");
        assert_eq!(cache.manifest_path(), PathBuf::from("data/last_day.csv.meta.json"));
    }

    #[test]
    fn test_csv_rendering_is_deterministic() {
        let first = to_csv_string(&snapshot()).unwrap();
        let second = to_csv_string(&snapshot()).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("ticker,market,date,"));
        assert_eq!(first.lines().count(), 3);
    }
}
