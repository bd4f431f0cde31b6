//! Data acquisition boundary.
//!
//! The pipeline never talks to the network. A [`MarketDataSource`] hands over
//! pre-fetched, owned data; a failure for one ticker arrives as a typed
//! absence inside [`TickerFeed`] instead of aborting the batch.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{PriceSeries, TickerData, TickerProfile};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors reported by a data source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Nothing readable is stored for the requested symbol
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    /// The stored payload could not be decoded
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// The source as a whole is unreachable
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether the whole universe is affected rather than one ticker.
    pub fn is_universe_wide(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// Supplier of pre-fetched market data.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Benchmark index series; also defines the trading calendar.
    async fn benchmark(&self) -> Result<PriceSeries, ProviderError>;

    /// Universe membership.
    async fn universe(&self) -> Result<Vec<TickerProfile>, ProviderError>;

    /// Prices and fundamentals for one ticker.
    async fn ticker(&self, profile: &TickerProfile) -> Result<TickerData, ProviderError>;
}

/// One universe member with its data or the reason it is absent.
#[derive(Debug, Clone)]
pub struct TickerFeed {
    pub symbol: String,
    pub data: Result<TickerData, ProviderError>,
}

/// Everything fetched for one run, owned before computation starts.
#[derive(Debug, Clone)]
pub struct Universe {
    pub benchmark: PriceSeries,
    pub feeds: Vec<TickerFeed>,
}

impl Universe {
    /// Fetch the benchmark, membership, and every ticker from `source`.
    ///
    /// Benchmark or membership failures are returned as errors; per-ticker
    /// failures are kept in the feed. Feeds are ordered by symbol.
    pub async fn fetch(source: &dyn MarketDataSource) -> Result<Self, ProviderError> {
        let benchmark = source.benchmark().await?;
        let mut profiles = source.universe().await?;
        profiles.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        profiles.dedup_by(|a, b| a.symbol == b.symbol);

        let mut feeds = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let data = source.ticker(profile).await;
            if let Err(e) = &data {
                if e.is_universe_wide() {
                    return Err(e.clone());
                }
            }
            feeds.push(TickerFeed {
                symbol: profile.symbol.clone(),
                data,
            });
        }

        tracing::debug!(
            source = source.name(),
            tickers = feeds.len(),
            failed = feeds.iter().filter(|f| f.data.is_err()).count(),
            "Universe fetched"
        );

        Ok(Self { benchmark, feeds })
    }
}

// ============================================================================
// In-memory Source
// ============================================================================

/// Source backed by data already in memory.
///
/// Used by tests and by callers that assemble the universe themselves.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    benchmark: Option<PriceSeries>,
    tickers: BTreeMap<String, TickerData>,
    failures: BTreeMap<String, ProviderError>,
}

impl InMemorySource {
    pub fn new(benchmark: PriceSeries) -> Self {
        Self {
            benchmark: Some(benchmark),
            ..Default::default()
        }
    }

    /// A source whose benchmark cannot be loaded.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn with_ticker(mut self, data: TickerData) -> Self {
        self.tickers.insert(data.profile.symbol.clone(), data);
        self
    }

    /// Register a member whose fetch fails.
    pub fn with_failure(mut self, symbol: impl Into<String>, error: ProviderError) -> Self {
        self.failures.insert(symbol.into(), error);
        self
    }
}

#[async_trait]
impl MarketDataSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn benchmark(&self) -> Result<PriceSeries, ProviderError> {
        self.benchmark
            .clone()
            .ok_or_else(|| ProviderError::Unavailable("no benchmark loaded".into()))
    }

    async fn universe(&self) -> Result<Vec<TickerProfile>, ProviderError> {
        let mut profiles: Vec<TickerProfile> =
            self.tickers.values().map(|t| t.profile.clone()).collect();
        profiles.extend(self.failures.keys().map(TickerProfile::new));
        Ok(profiles)
    }

    async fn ticker(&self, profile: &TickerProfile) -> Result<TickerData, ProviderError> {
        if let Some(err) = self.failures.get(&profile.symbol) {
            return Err(err.clone());
        }
        self.tickers
            .get(&profile.symbol)
            .cloned()
            .ok_or_else(|| ProviderError::DataNotAvailable(profile.symbol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str) -> TickerData {
        TickerData {
            profile: TickerProfile::new(symbol),
            prices: PriceSeries::new(symbol, vec![]),
            fundamentals: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_keeps_ticker_failures_as_absence() {
        let source = InMemorySource::new(PriceSeries::new("IDX", vec![]))
            .with_ticker(ticker("BBB"))
            .with_ticker(ticker("AAA"))
            .with_failure("CCC", ProviderError::DataNotAvailable("CCC".into()));

        let universe = Universe::fetch(&source).await.unwrap();
        let symbols: Vec<_> = universe.feeds.iter().map(|f| f.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB", "CCC"]);
        assert!(universe.feeds[2].data.is_err());
    }

    #[tokio::test]
    async fn test_fetch_fails_without_benchmark() {
        let source = InMemorySource::unavailable().with_ticker(ticker("AAA"));
        let err = Universe::fetch(&source).await.unwrap_err();
        assert!(err.is_universe_wide());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Malformed("tickers/AAA.json".into());
        assert_eq!(err.to_string(), "Malformed data: tickers/AAA.json");
        assert!(!err.is_universe_wide());
    }
}
