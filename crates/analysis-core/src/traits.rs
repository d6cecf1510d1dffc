use async_trait::async_trait;
use crate::{AnalysisError, FetchedHistory, LookbackPeriod};

/// Source of daily price history; any call may fail for a single symbol
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_history(
        &self,
        symbol: &str,
        period: &LookbackPeriod,
    ) -> Result<FetchedHistory, AnalysisError>;
}
