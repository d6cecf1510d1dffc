use std::sync::Arc;
use std::time::Duration;

use analysis_core::{
    AlertEvent, AnalysisError, IndicatorRow, LookbackPeriod, MarketDataProvider, PriceSeries,
};

use crate::classifiers::*;
use crate::indicators::*;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Decorated history of a single ticker
#[derive(Debug, Clone, PartialEq)]
pub struct TickerTable {
    pub ticker: String,
    pub market: Option<String>,
    pub rows: Vec<IndicatorRow>,
}

impl TickerTable {
    pub fn latest(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }

    pub fn last_two(&self) -> Option<(&IndicatorRow, &IndicatorRow)> {
        match self.rows.as_slice() {
            [.., prev, cur] => Some((prev, cur)),
            _ => None,
        }
    }

    /// Alerts raised by comparing the two most recent rows
    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.last_two()
            .map(|(prev, cur)| detect_events(&self.ticker, prev, cur))
            .unwrap_or_default()
    }

    pub fn into_latest(mut self) -> Option<IndicatorRow> {
        self.rows.pop()
    }
}

/// Compute every indicator and classifier column for a series.
///
/// Indicator columns are rounded for display first and the classifiers read
/// the rounded values.
pub fn decorate(ticker: &str, market: Option<&str>, series: &PriceSeries) -> Vec<IndicatorRow> {
    if series.is_empty() {
        return vec![];
    }

    let closes = series.closes();
    let ema_5 = ema(&closes, 5);
    let ema_10 = ema(&closes, 10);
    let sma_20 = sma(&closes, 20);
    let sma_200 = sma(&closes, 200);
    let rsi_14 = rsi(&closes, 14);
    let macd = macd_histogram(&closes, 12, 26, 9);

    let mut rows: Vec<IndicatorRow> = Vec::with_capacity(series.len());

    for (i, point) in series.points().iter().enumerate() {
        let ema_5 = round_to(ema_5[i], 2);
        let ema_10 = round_to(ema_10[i], 2);
        let sma_20 = sma_20[i].map(|v| round_to(v, 2));
        let sma_200 = sma_200[i].map(|v| round_to(v, 2));

        let trend = classify_trend(ema_5, ema_10, sma_20);
        let box_state = classify_box(point.close, ema_5);
        let break_20 = rows
            .last()
            .map(|prev| classify_break_20(prev.close, prev.sma_20, point.close, sma_20));
        let stage = classify_stage(&StageInputs {
            close: point.close,
            sma_20,
            rsi: rsi_14[i],
            trend,
            box_state,
            break_20,
        });

        rows.push(IndicatorRow {
            ticker: ticker.to_string(),
            market: market.map(|m| m.to_string()),
            date: point.date,
            open: point.open,
            high: point.high,
            low: point.low,
            close: point.close,
            volume: point.volume,
            dividend: point.dividend,
            split_ratio: point.split_ratio,
            ema_5,
            ema_10,
            sma_20,
            sma_200,
            rsi: rsi_14[i],
            macd: macd[i],
            trend,
            box_state,
            break_20,
            stage,
        });
    }

    rows
}

/// Fetches one ticker from the provider and decorates its history
pub struct TickerAnalyzer {
    provider: Arc<dyn MarketDataProvider>,
    fetch_timeout: Duration,
}

impl TickerAnalyzer {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Analyze one ticker.
    ///
    /// Provider errors, timeouts and empty histories come back as `Err` and
    /// are logged here; they concern this ticker only.
    pub async fn analyze(
        &self,
        ticker: &str,
        period: &LookbackPeriod,
    ) -> Result<TickerTable, AnalysisError> {
        tracing::info!("Requesting data for ticker: {} (period {})", ticker, period);

        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.provider.fetch_history(ticker, period),
        )
        .await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                tracing::warn!("Ticker {} failed: {}", ticker, e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(
                    "Ticker {} failed: no response within {:.0}s",
                    ticker,
                    self.fetch_timeout.as_secs_f64()
                );
                return Err(AnalysisError::Timeout(ticker.to_string()));
            }
        };

        if fetched.series.is_empty() {
            tracing::warn!("Ticker {} failed: empty price history", ticker);
            return Err(AnalysisError::NoData(ticker.to_string()));
        }

        let rows = decorate(ticker, fetched.market.as_deref(), &fetched.series);
        tracing::debug!("{}: decorated {} rows", ticker, rows.len());

        Ok(TickerTable {
            ticker: ticker.to_string(),
            market: fetched.market,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{AlertCategory, Break20, BoxState, FetchedHistory, PricePoint, Stage};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn series_from(points: &[(f64, f64)]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        PriceSeries::from_points(
            points
                .iter()
                .enumerate()
                .map(|(i, &(open, close))| {
                    PricePoint::new(
                        start + ChronoDuration::days(i as i64),
                        open,
                        open.max(close),
                        open.min(close),
                        close,
                        1_000,
                    )
                })
                .collect(),
        )
    }

    struct FixedProvider {
        history: Option<FetchedHistory>,
    }

    #[async_trait]
    impl MarketDataProvider for FixedProvider {
        async fn fetch_history(
            &self,
            symbol: &str,
            _period: &LookbackPeriod,
        ) -> Result<FetchedHistory, AnalysisError> {
            self.history
                .clone()
                .ok_or_else(|| AnalysisError::fetch(symbol, "unknown symbol"))
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl MarketDataProvider for StalledProvider {
        async fn fetch_history(
            &self,
            _symbol: &str,
            _period: &LookbackPeriod,
        ) -> Result<FetchedHistory, AnalysisError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(FetchedHistory::default())
        }
    }

    #[test]
    fn test_decorate_lookback_markers() {
        let points: Vec<(f64, f64)> = (0..30).map(|i| (100.0 + i as f64, 100.5 + i as f64)).collect();
        let rows = decorate("UPW", Some("us"), &series_from(&points));

        assert_eq!(rows.len(), 30);
        assert!(rows[18].sma_20.is_none());
        assert!(rows[19].sma_20.is_some());
        assert!(rows.iter().all(|r| r.sma_200.is_none()));
        assert!(rows[13].rsi.is_none());
        assert_eq!(rows[14].rsi, Some(100.0));
        assert!(rows[0].break_20.is_none());
        assert!(rows[1..].iter().all(|r| r.break_20.is_some()));
        assert_eq!(rows[0].ema_5, 100.5);
        assert_eq!(rows[0].market.as_deref(), Some("us"));
    }

    #[test]
    fn test_decorate_classifies_cross_up_row() {
        // Close dips under SMA_20 and then jumps well above it
        let mut points: Vec<(f64, f64)> = vec![(20.0, 20.0); 19];
        points.push((19.0, 19.0));
        points.push((19.5, 25.0));
        let rows = decorate("JMP", None, &series_from(&points));

        let last = rows.last().unwrap();
        assert_eq!(last.break_20, Some(Break20::CrossUp));
        assert_eq!(last.stage, Stage::Two);
        assert_eq!(last.box_state, BoxState::Out);
    }

    #[test]
    fn test_decorate_empty_series() {
        assert!(decorate("NONE", None, &PriceSeries::default()).is_empty());
    }

    #[test]
    fn test_table_alerts_from_last_two_rows() {
        let mut points: Vec<(f64, f64)> = vec![(20.0, 20.0); 19];
        points.push((19.0, 19.0));
        points.push((19.5, 21.0));
        let rows = decorate("BRK", None, &series_from(&points));
        let table = TickerTable { ticker: "BRK".to_string(), market: None, rows };

        let alerts = table.alerts();
        assert!(alerts.iter().any(|a| a.category == AlertCategory::Breakout));

        let single = TickerTable {
            ticker: "ONE".to_string(),
            market: None,
            rows: table.rows[..1].to_vec(),
        };
        assert!(single.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let provider = FixedProvider {
            history: Some(FetchedHistory {
                series: series_from(&[(10.0, 10.5), (10.5, 11.0), (11.0, 10.8)]),
                market: Some("gb".to_string()),
            }),
        };
        let analyzer = TickerAnalyzer::new(Arc::new(provider));

        let table = analyzer.analyze("VOD.L", &LookbackPeriod::Max).await.unwrap();
        assert_eq!(table.ticker, "VOD.L");
        assert_eq!(table.market.as_deref(), Some("gb"));
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.latest().unwrap().close, 10.8);
    }

    #[tokio::test]
    async fn test_analyze_fetch_failure_is_explicit() {
        let analyzer = TickerAnalyzer::new(Arc::new(FixedProvider { history: None }));
        let err = analyzer.analyze("NOPE", &LookbackPeriod::Max).await.unwrap_err();
        assert!(matches!(err, AnalysisError::FetchFailure { .. }));
    }

    #[tokio::test]
    async fn test_analyze_empty_history_is_no_data() {
        let analyzer = TickerAnalyzer::new(Arc::new(FixedProvider {
            history: Some(FetchedHistory::default()),
        }));
        let err = analyzer.analyze("EMPTY", &LookbackPeriod::Max).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoData(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_times_out() {
        let analyzer = TickerAnalyzer::new(Arc::new(StalledProvider))
            .with_fetch_timeout(Duration::from_secs(5));
        let err = analyzer.analyze("SLOW", &LookbackPeriod::Max).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout(_)));
    }
}
