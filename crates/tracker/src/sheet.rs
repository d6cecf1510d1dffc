use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

const TICKER_COLUMN: &str = "Ticker";

/// Profile sheets kept as CSV files in one directory.
///
/// `<dir>/<profile>.csv` holds the ticker list in its `Ticker` column and the
/// snapshot of a run is written to `<dir>/<profile>_snapshot.csv`.
#[derive(Debug, Clone)]
pub struct CsvSheetStore {
    dir: PathBuf,
}

impl CsvSheetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn sheet_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", profile))
    }

    pub fn snapshot_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{}_snapshot.csv", profile))
    }

    /// Non-empty values of the `Ticker` column, in sheet order
    pub fn read_tickers(&self, profile: &str) -> Result<Vec<String>> {
        let path = self.sheet_path(profile);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open sheet {}", path.display()))?;

        let column = reader
            .headers()?
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(TICKER_COLUMN))
            .ok_or_else(|| anyhow!("Sheet {} has no {} column", path.display(), TICKER_COLUMN))?;

        let mut tickers = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
            if let Some(ticker) = record.get(column).map(str::trim).filter(|t| !t.is_empty()) {
                tickers.push(ticker.to_string());
            }
        }

        tracing::info!("Loaded {} tickers from {}", tickers.len(), path.display());
        Ok(tickers)
    }

    /// Replace the profile's snapshot sheet with `table` (header row first)
    pub fn write_table(&self, profile: &str, table: &[Vec<String>]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.snapshot_path(profile);
        write_rows(&path, table).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("Updated worksheet {} ({} rows)", path.display(), table.len().saturating_sub(1));
        Ok(path)
    }
}

fn write_rows(path: &Path, table: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    for row in table {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}
