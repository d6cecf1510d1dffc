use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AnalysisError;

/// One trading-day observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Cash dividend going ex on this date, 0.0 when none
    #[serde(default)]
    pub dividend: f64,
    /// Split ratio effective on this date, 1.0 when none
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f64,
}

fn default_split_ratio() -> f64 {
    1.0
}

impl PricePoint {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            dividend: 0.0,
            split_ratio: 1.0,
        }
    }
}

/// Daily history for one ticker, ascending by date with no duplicate dates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series from raw provider points.
    ///
    /// Points are sorted by date, later duplicates of a date are dropped and
    /// points without a usable close (non-finite or not positive) are skipped.
    pub fn from_points(mut points: Vec<PricePoint>) -> Self {
        points.retain(|p| p.close.is_finite() && p.close > 0.0);
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Provider response for one ticker: its series plus optional exchange metadata
#[derive(Debug, Clone, Default)]
pub struct FetchedHistory {
    pub series: PriceSeries,
    /// Lower-case market tag such as `us`, `gb` or `de`
    pub market: Option<String>,
}

/// How much history to request from the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LookbackPeriod {
    #[default]
    Max,
    YearToDate,
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
}

impl LookbackPeriod {
    /// Parse the period strings accepted on the command line (`max`, `ytd`,
    /// `5d`, `2wk`, `6mo`, `1y`).
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "max" => return Ok(LookbackPeriod::Max),
            "ytd" => return Ok(LookbackPeriod::YearToDate),
            _ => {}
        }

        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| AnalysisError::InvalidData(format!("Missing period unit: {}", raw)))?;
        let (count, unit) = raw.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| AnalysisError::InvalidData(format!("Invalid period: {}", raw)))?;
        if count == 0 {
            return Err(AnalysisError::InvalidData(format!("Empty period: {}", raw)));
        }

        match unit {
            "d" => Ok(LookbackPeriod::Days(count)),
            "wk" => Ok(LookbackPeriod::Weeks(count)),
            "mo" => Ok(LookbackPeriod::Months(count)),
            "y" => Ok(LookbackPeriod::Years(count)),
            _ => Err(AnalysisError::InvalidData(format!("Unknown period unit: {}", raw))),
        }
    }

    /// First calendar date covered by this period. `None` for the full history
    /// and for counts reaching past the earliest representable date.
    pub fn start_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            LookbackPeriod::Max => None,
            LookbackPeriod::YearToDate => NaiveDate::from_ymd_opt(today.year(), 1, 1),
            LookbackPeriod::Days(n) => Duration::try_days(i64::from(*n))
                .and_then(|d| today.checked_sub_signed(d)),
            LookbackPeriod::Weeks(n) => Duration::try_weeks(i64::from(*n))
                .and_then(|d| today.checked_sub_signed(d)),
            LookbackPeriod::Months(n) => today.checked_sub_months(Months::new(*n)),
            LookbackPeriod::Years(n) => n
                .checked_mul(12)
                .and_then(|months| today.checked_sub_months(Months::new(months))),
        }
    }
}

impl fmt::Display for LookbackPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookbackPeriod::Max => write!(f, "max"),
            LookbackPeriod::YearToDate => write!(f, "ytd"),
            LookbackPeriod::Days(n) => write!(f, "{}d", n),
            LookbackPeriod::Weeks(n) => write!(f, "{}wk", n),
            LookbackPeriod::Months(n) => write!(f, "{}mo", n),
            LookbackPeriod::Years(n) => write!(f, "{}y", n),
        }
    }
}

/// Short-term trend from the EMA_5 / EMA_10 / SMA_20 ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

/// Whether the close sits inside the 4% band around EMA_5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxState {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
    /// Close exactly on the band edge
    #[serde(rename = "UNCLASSIFIED")]
    Unclassified,
}

/// Close crossing SMA_20 between the previous and current row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Break20 {
    #[serde(rename = "CROSS_UP")]
    CrossUp,
    #[serde(rename = "CROSS_DOWN")]
    CrossDown,
    #[serde(rename = "NONE")]
    None,
}

/// Composite stage summarizing trend, box and crossover state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Up => "UP",
            Trend::Down => "DOWN",
            Trend::Neutral => "NEUTRAL",
        }
    }
}

impl BoxState {
    pub fn label(&self) -> &'static str {
        match self {
            BoxState::In => "IN",
            BoxState::Out => "OUT",
            BoxState::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl Break20 {
    pub fn label(&self) -> &'static str {
        match self {
            Break20::CrossUp => "CROSS_UP",
            Break20::CrossDown => "CROSS_DOWN",
            Break20::None => "NONE",
        }
    }
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::One => "1",
            Stage::Two => "2",
            Stage::Three => "3",
            Stage::Four => "4",
            Stage::Unknown => "UNKNOWN",
        }
    }
}

/// A price point decorated with its indicator and classifier columns.
///
/// `None` in an indicator column means the lookback window is not yet
/// satisfied (or the value is undefined, as for RSI over a flat series).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub ticker: String,
    pub market: Option<String>,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub dividend: f64,
    pub split_ratio: f64,
    pub ema_5: f64,
    pub ema_10: f64,
    pub sma_20: Option<f64>,
    pub sma_200: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: f64,
    pub trend: Trend,
    #[serde(rename = "box")]
    pub box_state: BoxState,
    /// Absent on the first row of a series
    pub break_20: Option<Break20>,
    pub stage: Stage,
}

impl IndicatorRow {
    pub const HEADERS: [&'static str; 20] = [
        "Ticker", "Market", "Date", "Open", "High", "Low", "Close", "Volume", "Dividends",
        "Stock Splits", "EMA_5", "EMA_10", "SMA_20", "SMA_200", "RSI", "MACD", "Trend", "Box",
        "Break_20", "Stage",
    ];

    /// Render every column as text, in `HEADERS` order
    pub fn to_text_row(&self) -> Vec<String> {
        fn opt(v: Option<f64>) -> String {
            v.map(|v| v.to_string()).unwrap_or_default()
        }

        vec![
            self.ticker.clone(),
            self.market.clone().unwrap_or_default(),
            self.date.format("%Y-%m-%d").to_string(),
            self.open.to_string(),
            self.high.to_string(),
            self.low.to_string(),
            self.close.to_string(),
            self.volume.to_string(),
            self.dividend.to_string(),
            self.split_ratio.to_string(),
            self.ema_5.to_string(),
            self.ema_10.to_string(),
            opt(self.sma_20),
            opt(self.sma_200),
            opt(self.rsi),
            self.macd.to_string(),
            self.trend.label().to_string(),
            self.box_state.label().to_string(),
            self.break_20.map(|b| b.label().to_string()).unwrap_or_default(),
            self.stage.label().to_string(),
        ]
    }
}

/// Category of an alert raised from the last two rows of a ticker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    Breakout,
    Breakdown,
    FakeBreakout,
    FakeBreakdown,
    RsiCross30,
    RsiCross70,
    ExDividend,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Breakout => "breakout",
            AlertCategory::Breakdown => "breakdown",
            AlertCategory::FakeBreakout => "fake-breakout",
            AlertCategory::FakeBreakdown => "fake-breakdown",
            AlertCategory::RsiCross30 => "rsi-cross-30",
            AlertCategory::RsiCross70 => "rsi-cross-70",
            AlertCategory::ExDividend => "ex-dividend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub ticker: String,
    pub message: String,
    pub category: AlertCategory,
}

impl AlertEvent {
    pub fn new(ticker: impl Into<String>, category: AlertCategory, message: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            message: message.into(),
            category,
        }
    }
}

/// Alerts of one run, in the order the tickers were scanned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertBatch {
    pub events: Vec<AlertEvent>,
}

impl AlertBatch {
    pub fn new(events: Vec<AlertEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AlertEvent>) {
        self.events.extend(events);
    }

    /// Tickers with at least one alert, unique, in first appearance order
    pub fn flagged_tickers(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.ticker.as_str()))
            .map(|e| e.ticker.as_str())
            .collect()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.message.as_str())
    }
}

/// Whether a snapshot carries whole histories or only each ticker's latest row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotMode {
    Full,
    LatestOnly,
}

/// Aggregated indicator rows for one run, already filtered and ordered
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub mode: SnapshotMode,
    pub rows: Vec<IndicatorRow>,
}

impl MarketSnapshot {
    pub fn new(mode: SnapshotMode, rows: Vec<IndicatorRow>) -> Self {
        Self { mode, rows }
    }

    pub fn empty(mode: SnapshotMode) -> Self {
        Self { mode, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tickers in the order they first appear
    pub fn tickers(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.ticker.as_str()))
            .map(|r| r.ticker.as_str())
            .collect()
    }

    /// Most recent row for a ticker
    pub fn row(&self, ticker: &str) -> Option<&IndicatorRow> {
        self.rows
            .iter()
            .filter(|r| r.ticker == ticker)
            .max_by_key(|r| r.date)
    }

    pub fn headers(&self) -> Vec<String> {
        IndicatorRow::HEADERS.iter().map(|h| h.to_string()).collect()
    }

    /// Header row followed by every row converted to text
    pub fn to_table(&self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.rows.len() + 1);
        table.push(self.headers());
        table.extend(self.rows.iter().map(|r| r.to_text_row()));
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_series_sorted_and_deduplicated() {
        let series = PriceSeries::from_points(vec![
            PricePoint::new(day(3), 1.0, 1.0, 1.0, 12.0, 10),
            PricePoint::new(day(1), 1.0, 1.0, 1.0, 10.0, 10),
            PricePoint::new(day(3), 1.0, 1.0, 1.0, 99.0, 10),
            PricePoint::new(day(2), 1.0, 1.0, 1.0, 11.0, 10),
        ]);

        let dates: Vec<_> = series.points().iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(series.closes(), vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_series_drops_unusable_closes() {
        let series = PriceSeries::from_points(vec![
            PricePoint::new(day(1), 1.0, 1.0, 1.0, f64::NAN, 10),
            PricePoint::new(day(2), 1.0, 1.0, 1.0, 0.0, 10),
        ]);
        assert!(series.is_empty());
    }

    #[test]
    fn test_lookback_period_parse() {
        assert_eq!(LookbackPeriod::parse("max").unwrap(), LookbackPeriod::Max);
        assert_eq!(LookbackPeriod::parse("YTD").unwrap(), LookbackPeriod::YearToDate);
        assert_eq!(LookbackPeriod::parse("5d").unwrap(), LookbackPeriod::Days(5));
        assert_eq!(LookbackPeriod::parse("2wk").unwrap(), LookbackPeriod::Weeks(2));
        assert_eq!(LookbackPeriod::parse("6mo").unwrap(), LookbackPeriod::Months(6));
        assert_eq!(LookbackPeriod::parse("10y").unwrap(), LookbackPeriod::Years(10));
        assert!(LookbackPeriod::parse("y").is_err());
        assert!(LookbackPeriod::parse("0d").is_err());
        assert!(LookbackPeriod::parse("3h").is_err());
    }

    #[test]
    fn test_lookback_start_date() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 15).unwrap();
        assert_eq!(LookbackPeriod::Max.start_date(today), None);
        assert_eq!(
            LookbackPeriod::YearToDate.start_date(today),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(
            LookbackPeriod::Months(6).start_date(today),
            NaiveDate::from_ymd_opt(2024, 2, 15)
        );
        assert_eq!(
            LookbackPeriod::Years(1).start_date(today),
            NaiveDate::from_ymd_opt(2023, 8, 15)
        );
        assert_eq!(LookbackPeriod::Months(6).to_string(), "6mo");
    }

    #[test]
    fn test_huge_period_has_no_start_date() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 15).unwrap();

        assert_eq!(LookbackPeriod::Days(u32::MAX).start_date(today), None);
        assert_eq!(LookbackPeriod::Weeks(u32::MAX).start_date(today), None);
        assert_eq!(LookbackPeriod::Months(u32::MAX).start_date(today), None);
        assert_eq!(LookbackPeriod::Years(u32::MAX).start_date(today), None);
        assert_eq!(
            LookbackPeriod::parse("4294967295d").unwrap().start_date(today),
            None
        );
        assert_eq!(
            LookbackPeriod::Days(10).start_date(today),
            NaiveDate::from_ymd_opt(2024, 8, 5)
        );
    }

    #[test]
    fn test_alert_batch_flagged_tickers_unique_in_order() {
        let batch = AlertBatch::new(vec![
            AlertEvent::new("MSFT", AlertCategory::Breakout, "MSFT: breakout"),
            AlertEvent::new("AAPL", AlertCategory::RsiCross70, "AAPL: rsi"),
            AlertEvent::new("MSFT", AlertCategory::ExDividend, "MSFT: dividend"),
        ]);

        assert_eq!(batch.flagged_tickers(), vec!["MSFT", "AAPL"]);
        assert_eq!(batch.messages().count(), 3);
        assert!(AlertBatch::default().flagged_tickers().is_empty());
    }
}
