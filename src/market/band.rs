use crate::market::types::Candle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Band {
    pub bucket_start: i64,
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSettings {
    pub period: usize,
    pub multiplier: f64,
}

/// Rolling mean of closes with a population standard deviation envelope.
/// Entries before `period - 1` are `None`.
pub fn compute_bands(candles: &[Candle], settings: BandSettings) -> Vec<Option<Band>> {
    let period = settings.period;
    if period == 0 {
        return vec![None; candles.len()];
    }

    candles
        .iter()
        .enumerate()
        .map(|(index, candle)| {
            if index + 1 < period {
                return None;
            }
            let window = &candles[index + 1 - period..=index];
            let (middle, stddev) = mean_and_stddev(window.iter().map(|c| c.close), period);
            Some(Band {
                bucket_start: candle.bucket_start,
                upper: middle + settings.multiplier * stddev,
                middle,
                lower: middle - settings.multiplier * stddev,
            })
        })
        .collect()
}

fn mean_and_stddev(values: impl Iterator<Item = f64> + Clone, count: usize) -> (f64, f64) {
    let count = count as f64;
    let mean = values.clone().sum::<f64>() / count;
    let variance = values.map(|value| (value - mean).powi(2)).sum::<f64>() / count;
    (mean, variance.max(0.0).sqrt())
}
