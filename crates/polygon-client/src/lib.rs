use analysis_core::{
    AnalysisError, FetchedHistory, LookbackPeriod, MarketDataProvider, PricePoint, PriceSeries,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";

/// Earliest date requested for a `max` lookback
const MAX_HISTORY_START: (i32, u32, u32) = (1970, 1, 1);

/// Exchange suffixes used in ticker symbols and the market tag they imply
const EXCHANGE_SUFFIXES: &[(&str, &str)] = &[
    (".L", "gb"),
    (".DE", "de"),
    (".PA", "fr"),
    (".MC", "es"),
    (".AS", "nl"),
    (".SW", "ch"),
];

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: std::time::Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Need to wait until the oldest request falls out of the window
            let sleep_dur = match ts.front() {
                Some(&oldest) => (oldest + self.window).duration_since(now) + Duration::from_millis(50),
                None => Duration::from_millis(50),
            };
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    pub fn with_rate_limit(api_key: String, requests_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AnalysisError> {
        let request = builder.build().map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request.try_clone()
                .ok_or_else(|| AnalysisError::ApiError("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await
                .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!("Polygon 429 rate limited, waiting {}s before retry {}/3", wait_secs, attempt + 1);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(AnalysisError::ApiError("Rate limited by Polygon after 3 retries".to_string()))
    }

    async fn error_from(response: reqwest::Response) -> AnalysisError {
        AnalysisError::ApiError(format!(
            "HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        ))
    }

    /// Get daily bars for a symbol between two dates (inclusive)
    pub async fn get_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, AnalysisError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            BASE_URL,
            symbol,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self.send_request(
            self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ])
        ).await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(agg_response
            .results
            .into_iter()
            .filter_map(|r| {
                let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
                Some(PricePoint::new(date, r.o, r.h, r.l, r.c, r.v.max(0.0) as u64))
            })
            .collect())
    }

    /// Get ticker details
    pub async fn get_ticker_details(&self, symbol: &str) -> Result<TickerDetails, AnalysisError> {
        let url = format!("{}/v3/reference/tickers/{}", BASE_URL, symbol);

        let response = self.send_request(
            self.client.get(&url).query(&[("apiKey", &self.api_key)])
        ).await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let details_response: TickerDetailsResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(details_response.results)
    }

    /// Get dividend history for a symbol
    pub async fn get_dividends(&self, symbol: &str, limit: u32) -> Result<Vec<DividendInfo>, AnalysisError> {
        let url = format!("{}/v3/reference/dividends", BASE_URL);

        let response = self.send_request(
            self.client.get(&url).query(&[
                ("ticker", symbol),
                ("apiKey", &self.api_key as &str),
                ("limit", &limit.to_string()),
                ("order", "desc"),
            ])
        ).await?;

        if !response.status().is_success() {
            if response.status().as_u16() == 403 || response.status().as_u16() == 401 {
                return Ok(Vec::new());
            }
            return Err(Self::error_from(response).await);
        }

        let div_response: DividendResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(div_response.results)
    }

    /// Get split history for a symbol
    pub async fn get_splits(&self, symbol: &str, limit: u32) -> Result<Vec<SplitInfo>, AnalysisError> {
        let url = format!("{}/v3/reference/splits", BASE_URL);

        let response = self.send_request(
            self.client.get(&url).query(&[
                ("ticker", symbol),
                ("apiKey", &self.api_key as &str),
                ("limit", &limit.to_string()),
                ("order", "desc"),
            ])
        ).await?;

        if !response.status().is_success() {
            if response.status().as_u16() == 403 || response.status().as_u16() == 401 {
                return Ok(Vec::new());
            }
            return Err(Self::error_from(response).await);
        }

        let split_response: SplitResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(split_response.results)
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        period: &LookbackPeriod,
    ) -> Result<FetchedHistory, AnalysisError> {
        let today = Utc::now().date_naive();
        let (y, m, d) = MAX_HISTORY_START;
        let from = period
            .start_date(today)
            .or_else(|| NaiveDate::from_ymd_opt(y, m, d))
            .unwrap_or(today);

        let (bars, details, dividends, splits) = tokio::join!(
            self.get_daily_bars(symbol, from, today),
            self.get_ticker_details(symbol),
            self.get_dividends(symbol, 100),
            self.get_splits(symbol, 100),
        );

        let bars = bars.map_err(|e| AnalysisError::fetch(symbol, e))?;
        if bars.is_empty() {
            return Err(AnalysisError::NoData(symbol.to_string()));
        }

        // Corporate actions and metadata are best-effort
        let dividends = dividends.unwrap_or_else(|e| {
            tracing::debug!("{}: dividends unavailable: {}", symbol, e);
            Vec::new()
        });
        let splits = splits.unwrap_or_else(|e| {
            tracing::debug!("{}: splits unavailable: {}", symbol, e);
            Vec::new()
        });
        let locale = match details {
            Ok(d) => Some(d.locale),
            Err(e) => {
                tracing::debug!("{}: ticker details unavailable: {}", symbol, e);
                None
            }
        };

        let points = apply_corporate_actions(bars, &dividends, &splits);

        Ok(FetchedHistory {
            series: PriceSeries::from_points(points),
            market: market_tag(symbol, locale.as_deref()),
        })
    }
}

/// Market tag for a symbol: an exchange suffix wins over the provider locale
pub fn market_tag(symbol: &str, locale: Option<&str>) -> Option<String> {
    let upper = symbol.to_ascii_uppercase();
    EXCHANGE_SUFFIXES
        .iter()
        .find(|(suffix, _)| upper.ends_with(suffix))
        .map(|(_, market)| market.to_string())
        .or_else(|| {
            locale
                .map(|l| l.trim().to_ascii_lowercase())
                .filter(|l| !l.is_empty())
        })
}

/// Stamp dividend cash amounts and split ratios onto the bars of their effective dates
pub fn apply_corporate_actions(
    mut points: Vec<PricePoint>,
    dividends: &[DividendInfo],
    splits: &[SplitInfo],
) -> Vec<PricePoint> {
    let mut cash_by_date: HashMap<NaiveDate, f64> = HashMap::new();
    for div in dividends {
        let (Some(date), Some(amount)) = (div.ex_dividend_date.as_deref(), div.cash_amount) else {
            continue;
        };
        if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            *cash_by_date.entry(date).or_insert(0.0) += amount;
        }
    }

    let mut ratio_by_date: HashMap<NaiveDate, f64> = HashMap::new();
    for split in splits {
        if split.split_from <= 0.0 {
            continue;
        }
        if let Ok(date) = NaiveDate::parse_from_str(&split.execution_date, "%Y-%m-%d") {
            ratio_by_date.insert(date, split.split_to / split.split_from);
        }
    }

    for point in &mut points {
        if let Some(amount) = cash_by_date.get(&point.date) {
            point.dividend = *amount;
        }
        if let Some(ratio) = ratio_by_date.get(&point.date) {
            point.split_ratio = *ratio;
        }
    }

    points
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    pub name: String,
    pub market: String,
    pub locale: String,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default)]
    pub currency_name: Option<String>,
}

// Dividend types
#[derive(Debug, Deserialize)]
struct DividendResponse {
    #[serde(default)]
    results: Vec<DividendInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DividendInfo {
    pub cash_amount: Option<f64>,
    pub ex_dividend_date: Option<String>,
    pub pay_date: Option<String>,
    #[serde(default)]
    pub frequency: Option<i32>,
}

// Split types
#[derive(Debug, Deserialize)]
struct SplitResponse {
    #[serde(default)]
    results: Vec<SplitInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitInfo {
    pub execution_date: String,
    pub split_from: f64,
    pub split_to: f64,
}
