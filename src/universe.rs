//! Security universe provider.
//!
//! Builds the ordered, deduplicated list of codes for one run from
//! explicit codes or a universe file.

use crate::models::SecurityCode;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// One universe entry: a code and the name listed alongside it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseEntry {
    pub code: SecurityCode,
    pub name: Option<String>,
}

/// Ordered set of codes analyzed in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Universe {
    codes: Vec<SecurityCode>,
}

impl Universe {
    /// Build a universe, dropping repeated codes while keeping first-seen order.
    pub fn new(codes: impl IntoIterator<Item = SecurityCode>) -> Self {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();

        for code in codes {
            if seen.insert(code.clone()) {
                ordered.push(code);
            } else {
                debug!("Dropping duplicate code {}", code);
            }
        }

        Self { codes: ordered }
    }

    /// Parse raw tokens; unusable tokens are skipped with a warning.
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(tokens.into_iter().filter_map(|t| {
            let code = SecurityCode::new(t);
            if code.is_none() && !t.trim().is_empty() {
                warn!("Ignoring unusable code token {:?}", t);
            }
            code
        }))
    }

    pub fn codes(&self) -> &[SecurityCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Append codes from another universe, keeping deduplication.
    pub fn extend(self, other: Universe) -> Self {
        Self::new(self.codes.into_iter().chain(other.codes))
    }
}

/// Parse universe file content: one `code[,name]` per line.
///
/// Blank lines and lines starting with `#` are ignored.
pub fn parse_universe(content: &str) -> Vec<UniverseEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(2, ',');
            let Some(code) = SecurityCode::new(parts.next().unwrap_or("")) else {
                warn!("Ignoring unusable universe line {:?}", line);
                return None;
            };
            let name = parts
                .next()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            Some(UniverseEntry { code, name })
        })
        .collect()
}

/// Keep main-board codes whose name is not flagged `ST`.
pub fn main_board_filter(entries: Vec<UniverseEntry>) -> Vec<UniverseEntry> {
    entries
        .into_iter()
        .filter(|e| e.code.is_main_board())
        .filter(|e| e.name.as_deref().map_or(true, |n| !n.contains("ST")))
        .collect()
}

/// Load a universe file from disk.
pub fn load_universe_file(path: &Path, main_board_only: bool) -> Result<Universe> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read universe file: {}", path.display()))?;

    let mut entries = parse_universe(&content);
    let listed = entries.len();
    if main_board_only {
        entries = main_board_filter(entries);
    }
    debug!(
        "Universe file {}: {} listed, {} kept",
        path.display(),
        listed,
        entries.len()
    );

    Ok(Universe::new(entries.into_iter().map(|e| e.code)))
}
