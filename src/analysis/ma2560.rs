//! "2560" trend-following strategy.
//!
//! MA60 is the life line that sets the medium-term direction; MA25 is the
//! working line whose upturn signals entries. Pullbacks to MA25 on
//! shrinking volume are the preferred buy points.

use super::indicators::{self, last, round_to};
use super::{check_history, Analyzer};
use crate::error::AnalysisError;
use crate::models::{RawMarketData, Recommendation, SecurityCode, Signal, Trend};
use std::collections::BTreeMap;

const MIN_BARS: usize = 60;
/// Bars over which MA slopes are measured.
const SLOPE_BARS: usize = 3;
/// Maximum distance above MA25 that still counts as a pullback.
const PULLBACK_BAND: f64 = 0.03;
/// Distance above MA25 beyond which the move is overextended.
const OVEREXTENDED: f64 = 0.15;
const RANGE_WINDOW: usize = 20;

/// MA25 / MA60 strategy.
pub struct Ma2560Analyzer;

impl Analyzer for Ma2560Analyzer {
    fn name(&self) -> &'static str {
        "ma2560"
    }

    fn analyze(&self, _code: &SecurityCode, data: &RawMarketData) -> Result<Signal, AnalysisError> {
        check_history(data, MIN_BARS)?;

        let closes = data.closes();
        let volumes = data.volumes();
        let close = closes[closes.len() - 1];
        let volume = volumes[volumes.len() - 1];

        let ma25_series = indicators::sma(&closes, 25);
        let ma60_series = indicators::sma(&closes, 60);
        let (ma25, ma60) = match (last(&ma25_series), last(&ma60_series)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(AnalysisError::InvalidData(
                    "moving averages unavailable".to_string(),
                ))
            }
        };

        // An undefined slope (not enough bars yet) reads as flat.
        let slope = |series: &[Option<f64>]| {
            last(&indicators::diff(series, SLOPE_BARS)).map_or(Trend::Flat, Trend::from_change)
        };
        let ma25_trend = slope(&ma25_series);
        let ma60_trend = slope(&ma60_series);

        let vma5 = last(&indicators::sma(&volumes, 5)).unwrap_or(0.0);
        let volume_ratio = if vma5 > 0.0 { Some(volume / vma5) } else { None };

        let above_ma25 = close > ma25;
        let above_ma60 = close > ma60;
        let deviation = (close - ma25) / ma25;

        let mut notes = vec![format!(
            "MA25 {} / MA60 {}",
            ma25_trend.to_string().to_lowercase(),
            ma60_trend.to_string().to_lowercase()
        )];

        let (recommendation, confidence) = if ma60_trend == Trend::Down && !above_ma60 {
            notes.push("MA60 falling with price below the life line".to_string());
            (Recommendation::Sell, 0.7)
        } else if ma25_trend == Trend::Up && ma60_trend != Trend::Down && above_ma25 {
            if deviation > OVEREXTENDED {
                notes.push(format!(
                    "price {:.1}% above MA25, overextended",
                    deviation * 100.0
                ));
                (Recommendation::Hold, 0.5)
            } else if deviation <= PULLBACK_BAND && volume_ratio.is_some_and(|r| r < 1.0) {
                notes.push("pullback to MA25 on shrinking volume".to_string());
                (Recommendation::Buy, 0.8)
            } else {
                notes.push("MA25 turned up above a flat or rising MA60".to_string());
                (Recommendation::Buy, 0.6)
            }
        } else if ma25_trend == Trend::Down && !above_ma25 {
            notes.push("MA25 turning down with price below it".to_string());
            (Recommendation::Hold, 0.4)
        } else {
            notes.push("no 2560 entry setup".to_string());
            (Recommendation::Hold, 0.5)
        };

        let trend = if ma25_trend == ma60_trend {
            ma25_trend
        } else {
            Trend::Flat
        };

        let support = if above_ma25 {
            Some(ma25)
        } else if above_ma60 {
            Some(ma60)
        } else {
            None
        };

        let range_start = data.bars.len().saturating_sub(RANGE_WINDOW);
        let resistance = data.bars[range_start..]
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);

        let mut values = BTreeMap::new();
        values.insert("ma25".to_string(), round_to(ma25, 2));
        values.insert("ma60".to_string(), round_to(ma60, 2));
        values.insert("vma5".to_string(), round_to(vma5, 0));
        values.insert("ma25_deviation_pct".to_string(), round_to(deviation * 100.0, 2));
        if let Some(ratio) = volume_ratio {
            values.insert("volume_ratio".to_string(), round_to(ratio, 2));
        }

        Ok(Signal {
            strategy: self.name().to_string(),
            name: data.name.clone(),
            recommendation,
            confidence,
            trend,
            last_close: round_to(close, 2),
            support: support.map(|s| round_to(s, 2)),
            resistance: Some(round_to(resistance, 2)),
            indicators: values,
            notes,
        })
    }
}
