//! Local JSON file data source.
//!
//! Reads `{data_dir}/{code}.json` files exported by an earlier download,
//! useful for offline runs and reproducible batches.

use super::{normalize_bars, DataSource};
use crate::error::FetchError;
use crate::models::{Bar, RawMarketData, SecurityCode};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    name: Option<String>,
    bars: Vec<Bar>,
}

/// Data source reading one JSON history file per code.
pub struct FileSource {
    data_dir: PathBuf,
}

impl FileSource {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path_for(&self, code: &SecurityCode) -> PathBuf {
        self.data_dir.join(format!("{}.json", code))
    }
}

#[async_trait]
impl DataSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self, code: &SecurityCode) -> Result<RawMarketData, FetchError> {
        // The code becomes a file name, so it must not carry path components
        if !code.is_well_formed() {
            return Err(FetchError::Permanent(format!(
                "{} is not a six-digit code",
                code
            )));
        }
        let path = self.path_for(code);

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                FetchError::Permanent(format!("no history file for {}", code))
            } else {
                FetchError::Transient(format!("failed to read {}: {}", path.display(), e))
            }
        })?;

        let history: HistoryFile = serde_json::from_str(&content)
            .map_err(|e| FetchError::Malformed(format!("{}: {}", path.display(), e)))?;

        if history.bars.is_empty() {
            return Err(FetchError::Permanent(format!(
                "no trading history for {}",
                code
            )));
        }

        Ok(RawMarketData {
            code: code.clone(),
            name: history.name,
            bars: normalize_bars(history.bars)?,
        })
    }
}
