use crate::market::types::Candle;
use std::collections::VecDeque;

/// Bounded, strictly ascending candle buffer. Every entry but the last is
/// closed; the last one may still be open.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    retention: usize,
}

impl CandleSeries {
    pub fn new(retention: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(retention.min(1_024)),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.candles.back().filter(|candle| !candle.is_closed)
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|candle| candle.close).collect()
    }

    pub(crate) fn open_candle_mut(&mut self) -> Option<&mut Candle> {
        self.candles.back_mut().filter(|candle| !candle.is_closed)
    }

    /// Appends a candle for a later bucket, freezing the previous tail.
    /// Returns false (and leaves the series untouched) when the bucket does not
    /// strictly follow the current tail.
    pub(crate) fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.back_mut() {
            if candle.bucket_start <= last.bucket_start {
                return false;
            }
            last.is_closed = true;
        }
        self.candles.push_back(candle);
        self.enforce_retention();
        true
    }

    /// Splits off every entry whose bucket is at or after `bucket_start`.
    pub(crate) fn split_off_from(&mut self, bucket_start: i64) -> Vec<Candle> {
        let index = self
            .candles
            .iter()
            .position(|candle| candle.bucket_start >= bucket_start)
            .unwrap_or(self.candles.len());
        self.candles.split_off(index).into_iter().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.candles.clear();
    }

    /// Appends rows already known to be ascending and newer than the tail.
    pub(crate) fn extend_unchecked(&mut self, candles: impl IntoIterator<Item = Candle>) {
        self.candles.extend(candles);
    }

    pub(crate) fn seal_all_but_last(&mut self) {
        let len = self.candles.len();
        for candle in self.candles.iter_mut().take(len.saturating_sub(1)) {
            candle.is_closed = true;
        }
    }

    pub(crate) fn enforce_retention(&mut self) {
        while self.candles.len() > self.retention {
            self.candles.pop_front();
        }
    }

    pub fn is_well_formed(&self) -> bool {
        let ascending = self
            .candles
            .iter()
            .zip(self.candles.iter().skip(1))
            .all(|(previous, next)| previous.bucket_start < next.bucket_start);
        let frozen_prefix = self
            .candles
            .iter()
            .take(self.candles.len().saturating_sub(1))
            .all(|candle| candle.is_closed);
        ascending && frozen_prefix && self.candles.len() <= self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(bucket_start: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            bucket_start,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            trade_count: 1,
            is_closed: false,
        }
    }

    #[test]
    fn push_freezes_previous_tail_and_rejects_regressions() {
        let mut series = CandleSeries::new(10);
        assert!(series.push(candle(30, 1.0)));
        assert!(series.push(candle(60, 2.0)));
        assert!(!series.push(candle(60, 3.0)));
        assert!(!series.push(candle(0, 3.0)));

        assert_eq!(series.len(), 2);
        assert!(series.iter().next().expect("first candle").is_closed);
        assert_eq!(series.open_candle().map(|c| c.bucket_start), Some(60));
        assert!(series.is_well_formed());
    }

    #[test]
    fn evicts_oldest_beyond_retention() {
        let mut series = CandleSeries::new(3);
        for step in 0..5 {
            series.push(candle(step * 30, step as f64));
        }

        assert_eq!(series.len(), 3);
        assert_eq!(series.iter().next().map(|c| c.bucket_start), Some(60));
        assert_eq!(series.closes(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn split_off_returns_tail_from_bucket() {
        let mut series = CandleSeries::new(10);
        for step in 0..4 {
            series.push(candle(step * 30, step as f64));
        }

        let tail = series.split_off_from(45);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].bucket_start, 60);
        assert_eq!(series.len(), 2);
    }
}
