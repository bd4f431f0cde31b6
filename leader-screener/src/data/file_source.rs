//! Directory-backed data source.
//!
//! Layout written by the acquisition job:
//!
//! ```text
//! <data_dir>/
//!   benchmark.json          PriceSeries
//!   universe.json           [TickerProfile]
//!   tickers/<SYMBOL>.json   { "prices": PriceSeries, "fundamentals": Fundamentals | null }
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::provider::{MarketDataSource, ProviderError};
use super::{Fundamentals, PriceSeries, TickerData, TickerProfile};

/// On-disk shape of `tickers/<SYMBOL>.json`.
#[derive(Debug, Deserialize)]
struct TickerFile {
    prices: PriceSeries,
    #[serde(default)]
    fundamentals: Option<Fundamentals>,
}

/// Reads pre-fetched JSON files from a data directory.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ticker_path(&self, symbol: &str) -> PathBuf {
        self.root.join("tickers").join(format!("{}.json", symbol))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ProviderError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::DataNotAvailable(path.display().to_string())
            } else {
                ProviderError::Unavailable(format!("{}: {}", path.display(), e))
            }
        })?;

        serde_json::from_str(&content)
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl MarketDataSource for JsonDirSource {
    fn name(&self) -> &str {
        "json-dir"
    }

    async fn benchmark(&self) -> Result<PriceSeries, ProviderError> {
        // A missing benchmark means the acquisition job did not run
        Self::read_json(&self.root.join("benchmark.json"))
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    async fn universe(&self) -> Result<Vec<TickerProfile>, ProviderError> {
        Self::read_json(&self.root.join("universe.json"))
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    async fn ticker(&self, profile: &TickerProfile) -> Result<TickerData, ProviderError> {
        // An unreadable file only affects this ticker
        let file: TickerFile = Self::read_json(&self.ticker_path(&profile.symbol))
            .await
            .map_err(|e| match e {
                ProviderError::Unavailable(msg) => ProviderError::DataNotAvailable(msg),
                other => other,
            })?;
        if file.prices.symbol != profile.symbol {
            return Err(ProviderError::Malformed(format!(
                "tickers/{}.json holds prices for {}",
                profile.symbol, file.prices.symbol
            )));
        }
        Ok(TickerData {
            profile: profile.clone(),
            prices: file.prices,
            fundamentals: file.fundamentals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Universe;

    const BENCHMARK: &str = r#"{"symbol":"IDX","bars":[
        {"date":"2024-01-02","open":1,"high":1,"low":1,"close":1,"volume":0}
    ]}"#;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_reads_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "benchmark.json", BENCHMARK);
        write(
            dir.path(),
            "universe.json",
            r#"[{"symbol":"AAA","sector":"Tech"},{"symbol":"BBB"},{"symbol":"CCC"}]"#,
        );
        write(
            dir.path(),
            "tickers/AAA.json",
            r#"{"prices":{"symbol":"AAA","bars":[]},"fundamentals":{"quarterly":[],"annual":[]}}"#,
        );
        write(dir.path(), "tickers/BBB.json", "{ broken");

        let source = JsonDirSource::new(dir.path());
        let universe = Universe::fetch(&source).await.unwrap();

        assert_eq!(universe.benchmark.symbol, "IDX");
        assert_eq!(universe.feeds.len(), 3);

        let aaa = universe.feeds[0].data.as_ref().unwrap();
        assert_eq!(aaa.profile.sector.as_deref(), Some("Tech"));
        assert!(aaa.fundamentals.is_some());

        assert!(matches!(universe.feeds[1].data, Err(ProviderError::Malformed(_))));
        assert!(matches!(universe.feeds[2].data, Err(ProviderError::DataNotAvailable(_))));
    }

    #[tokio::test]
    async fn test_missing_benchmark_is_universe_wide() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonDirSource::new(dir.path());
        let err = source.benchmark().await.unwrap_err();
        assert!(err.is_universe_wide());
    }

    #[tokio::test]
    async fn test_unreadable_ticker_only_drops_that_ticker() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "benchmark.json", BENCHMARK);
        write(dir.path(), "universe.json", r#"[{"symbol":"AAA"},{"symbol":"BAD"}]"#);
        write(dir.path(), "tickers/AAA.json", r#"{"prices":{"symbol":"AAA","bars":[]}}"#);
        std::fs::create_dir_all(dir.path().join("tickers/BAD.json")).unwrap();

        let source = JsonDirSource::new(dir.path());
        let universe = Universe::fetch(&source).await.unwrap();

        assert_eq!(universe.feeds.len(), 2);
        assert!(universe.feeds[0].data.is_ok());
        let err = universe.feeds[1].data.as_ref().unwrap_err();
        assert!(matches!(err, ProviderError::DataNotAvailable(_)));
        assert!(!err.is_universe_wide());
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tickers/AAA.json", r#"{"prices":{"symbol":"ZZZ","bars":[]}}"#);
        let source = JsonDirSource::new(dir.path());
        let err = tokio_test::block_on(source.ticker(&TickerProfile::new("AAA"))).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
