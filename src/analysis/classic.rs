//! Classic multi-indicator strategy.
//!
//! Each indicator casts a bullish (+1) or bearish (-1) vote; the net score
//! decides the recommendation.

use super::indicators::{self, last, round_to};
use super::{check_history, Analyzer};
use crate::error::AnalysisError;
use crate::models::{RawMarketData, Recommendation, SecurityCode, Signal, Trend};
use std::collections::BTreeMap;

const MIN_BARS: usize = 5;
const RANGE_WINDOW: usize = 20;
/// Net score at which the recommendation leaves Hold.
const DECISION_SCORE: i32 = 2;

/// Vote-based strategy over MA, RSI, MACD, KDJ and Bollinger bands.
pub struct ClassicAnalyzer;

impl Analyzer for ClassicAnalyzer {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn analyze(&self, _code: &SecurityCode, data: &RawMarketData) -> Result<Signal, AnalysisError> {
        check_history(data, MIN_BARS)?;

        let closes = data.closes();
        let volumes = data.volumes();
        let highs: Vec<f64> = data.bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = data.bars.iter().map(|b| b.low).collect();
        let close = closes[closes.len() - 1];
        let prev_close = closes[closes.len() - 2];

        let ma5 = last(&indicators::sma(&closes, 5));
        let ma10 = last(&indicators::sma(&closes, 10));
        let ma20 = last(&indicators::sma(&closes, 20));
        let ma60 = last(&indicators::sma(&closes, 60));
        let vma5 = last(&indicators::sma(&volumes, 5));
        let vma10 = last(&indicators::sma(&volumes, 10));
        let rsi = last(&indicators::rsi(&closes, 14));
        let macd = indicators::macd(&closes, 12, 26, 9);
        let macd_hist = macd.hist.last().copied();
        let kdj = indicators::kdj(&highs, &lows, &closes, 9);
        let kdj_j = last(&kdj.j);
        let (bb_upper, _, bb_lower) = indicators::bollinger(&closes, 20, 2.0);
        let bb_upper = last(&bb_upper);
        let bb_lower = last(&bb_lower);
        let volume_ratio = vma5
            .filter(|v| *v > 0.0)
            .map(|v| volumes[volumes.len() - 1] / v);

        let mut votes = Votes::default();

        if let Some(ma20) = ma20 {
            votes.cast(close > ma20, close < ma20, "price above MA20", "price below MA20");
        }
        if let (Some(ma5), Some(ma10)) = (ma5, ma10) {
            votes.cast(ma5 > ma10, ma5 < ma10, "MA5 above MA10", "MA5 below MA10");
        }
        if let Some(hist) = macd_hist {
            votes.cast(hist > 0.0, hist < 0.0, "MACD histogram positive", "MACD histogram negative");
        }
        if let Some(rsi) = rsi {
            votes.cast(rsi < 30.0, rsi > 70.0, "RSI oversold", "RSI overbought");
        }
        if let Some(j) = kdj_j {
            votes.cast(j < 0.0, j > 100.0, "KDJ J below 0", "KDJ J above 100");
        }
        if let (Some(upper), Some(lower)) = (bb_upper, bb_lower) {
            votes.cast(
                close < lower,
                close > upper,
                "price under lower Bollinger band",
                "price over upper Bollinger band",
            );
        }
        if let Some(ratio) = volume_ratio.filter(|r| *r > 1.5) {
            votes.cast(
                close > prev_close,
                close < prev_close,
                "volume surge on an up day",
                "volume surge on a down day",
            );
            votes.notes.push(format!("volume ratio {:.2}", ratio));
        }

        let recommendation = if votes.score >= DECISION_SCORE {
            Recommendation::Buy
        } else if votes.score <= -DECISION_SCORE {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        };

        let confidence = if votes.counted == 0 {
            0.0
        } else {
            round_to(f64::from(votes.score.abs()) / f64::from(votes.counted), 2)
        };

        let trend = match (ma5, ma20) {
            (Some(fast), Some(slow)) => Trend::from_change(fast - slow),
            _ => Trend::from_change(close - closes[0]),
        };

        let range_start = closes.len().saturating_sub(RANGE_WINDOW);
        let support = lows[range_start..].iter().copied().fold(f64::INFINITY, f64::min);
        let resistance = highs[range_start..]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        let mut values = BTreeMap::new();
        let mut put = |key: &str, value: Option<f64>, digits: i32| {
            if let Some(v) = value {
                values.insert(key.to_string(), round_to(v, digits));
            }
        };
        put("ma5", ma5, 2);
        put("ma10", ma10, 2);
        put("ma20", ma20, 2);
        put("ma60", ma60, 2);
        put("vma5", vma5, 0);
        put("vma10", vma10, 0);
        put("rsi", rsi, 2);
        put("macd", macd.macd.last().copied(), 3);
        put("macd_signal", macd.signal.last().copied(), 3);
        put("macd_hist", macd_hist, 3);
        put("kdj_k", last(&kdj.k), 2);
        put("kdj_d", last(&kdj.d), 2);
        put("kdj_j", kdj_j, 2);
        put("bb_upper", bb_upper, 2);
        put("bb_lower", bb_lower, 2);
        put("volume_ratio", volume_ratio, 2);

        Ok(Signal {
            strategy: self.name().to_string(),
            name: data.name.clone(),
            recommendation,
            confidence,
            trend,
            last_close: round_to(close, 2),
            support: Some(round_to(support, 2)),
            resistance: Some(round_to(resistance, 2)),
            indicators: values,
            notes: votes.notes,
        })
    }
}

#[derive(Default)]
struct Votes {
    score: i32,
    counted: i32,
    notes: Vec<String>,
}

impl Votes {
    /// Record one indicator's vote. Neutral readings still count toward
    /// the confidence denominator.
    fn cast(&mut self, bullish: bool, bearish: bool, bull_note: &str, bear_note: &str) {
        self.counted += 1;
        if bullish {
            self.score += 1;
            self.notes.push(bull_note.to_string());
        } else if bearish {
            self.score -= 1;
            self.notes.push(bear_note.to_string());
        }
    }
}
