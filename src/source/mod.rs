//! Market data sources.
//!
//! A data source fetches daily bars for one code and classifies every
//! failure as transient, permanent or malformed. The scheduler relies on
//! that classification only.

pub mod file;
pub mod tencent;

pub use file::FileSource;
pub use tencent::TencentSource;

use crate::config::{SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::models::{Bar, RawMarketData, SecurityCode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Fetches raw market data for one code.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short name used in logs and report metadata.
    fn name(&self) -> &str;

    /// Fetch bars for `code`.
    async fn fetch(&self, code: &SecurityCode) -> Result<RawMarketData, FetchError>;
}

/// Build the configured data source.
pub fn build_source(
    config: &SourceConfig,
    per_call_timeout: Duration,
) -> anyhow::Result<Arc<dyn DataSource>> {
    let source: Arc<dyn DataSource> = match config.kind {
        SourceKind::Tencent => Arc::new(TencentSource::new(
            config.base_url.clone(),
            config.history_days,
            per_call_timeout,
        )?),
        SourceKind::File => Arc::new(FileSource::new(config.data_dir.clone())),
    };
    Ok(source)
}

/// Sort bars oldest first and reject non-finite prices.
pub(crate) fn normalize_bars(mut bars: Vec<Bar>) -> Result<Vec<Bar>, FetchError> {
    if let Some(bad) = bars.iter().find(|b| {
        ![b.open, b.high, b.low, b.close, b.volume]
            .iter()
            .all(|v| v.is_finite())
    }) {
        return Err(FetchError::Malformed(format!(
            "non-finite value in bar dated {}",
            bad.date
        )));
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}
