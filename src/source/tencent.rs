//! Tencent daily kline data source.
//!
//! Fetches forward-adjusted daily bars from the public `fqkline` endpoint.

use super::{normalize_bars, DataSource};
use crate::error::FetchError;
use crate::models::{Bar, RawMarketData, SecurityCode};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP data source backed by Tencent's kline API.
pub struct TencentSource {
    http_client: reqwest::Client,
    base_url: String,
    history_days: u32,
}

impl TencentSource {
    /// Create a new source. `timeout` bounds every HTTP request.
    pub fn new(base_url: String, history_days: u32, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            history_days,
        })
    }

    fn kline_url(&self, full_code: &str) -> String {
        format!(
            "{}/appstock/app/fqkline/get?param={},day,,,{},qfq",
            self.base_url, full_code, self.history_days
        )
    }
}

#[async_trait]
impl DataSource for TencentSource {
    fn name(&self) -> &str {
        "tencent"
    }

    async fn fetch(&self, code: &SecurityCode) -> Result<RawMarketData, FetchError> {
        let full_code = code.full_code().ok_or_else(|| {
            FetchError::Permanent(format!("cannot map {} to an exchange", code))
        })?;

        let url = self.kline_url(&full_code);
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to read body: {}", e)))?;

        parse_kline_body(code, &full_code, &body)
    }
}

fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient("request timed out".to_string())
    } else if e.is_connect() {
        FetchError::Transient(format!("connection failed: {}", e))
    } else {
        FetchError::Transient(format!("request failed: {}", e))
    }
}

/// Map a non-success HTTP status to a fetch error.
fn classify_status(status: StatusCode) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchError::Transient(format!("HTTP {}", status))
    } else {
        FetchError::Permanent(format!("HTTP {}", status))
    }
}

/// Parse a kline response body into market data.
///
/// Rows are `[date, open, close, high, low, volume, ...]`; trailing
/// elements (dividend annotations) are ignored.
pub fn parse_kline_body(
    code: &SecurityCode,
    full_code: &str,
    body: &str,
) -> Result<RawMarketData, FetchError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Malformed(format!("response is not JSON: {}", e)))?;

    let vendor_code = json["code"].as_i64().unwrap_or(0);
    if vendor_code != 0 {
        let msg = json["msg"].as_str().unwrap_or("");
        return Err(FetchError::Transient(format!(
            "vendor error {}: {}",
            vendor_code, msg
        )));
    }

    let entry = json["data"]
        .get(full_code)
        .filter(|v| v.is_object())
        .ok_or_else(|| FetchError::Permanent(format!("unknown or delisted code {}", code)))?;

    let rows = entry
        .get("qfqday")
        .or_else(|| entry.get("day"))
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Permanent(format!("no trading history for {}", code)))?;

    if rows.is_empty() {
        return Err(FetchError::Permanent(format!(
            "no trading history for {}",
            code
        )));
    }

    let bars = rows
        .iter()
        .map(parse_row)
        .collect::<Result<Vec<_>, _>>()?;

    let name = entry["qt"][full_code]
        .get(1)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|n| !n.is_empty());

    Ok(RawMarketData {
        code: code.clone(),
        name,
        bars: normalize_bars(bars)?,
    })
}

fn parse_row(row: &Value) -> Result<Bar, FetchError> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 6)
        .ok_or_else(|| FetchError::Malformed(format!("unexpected kline row: {}", row)))?;

    let date_str = fields[0]
        .as_str()
        .ok_or_else(|| FetchError::Malformed("kline date is not a string".to_string()))?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|e| FetchError::Malformed(format!("bad kline date {:?}: {}", date_str, e)))?;

    let num = |idx: usize| -> Result<f64, FetchError> {
        let value = &fields[idx];
        let parsed = match value {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            FetchError::Malformed(format!("bad number {} in row dated {}", value, date_str))
        })
    };

    Ok(Bar {
        date,
        open: num(1)?,
        close: num(2)?,
        high: num(3)?,
        low: num(4)?,
        volume: num(5)?,
    })
}
