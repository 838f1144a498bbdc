use crate::market::bucket::BucketClock;
use crate::market::series::CandleSeries;
use crate::market::types::{Candle, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlacement {
    /// First candle of an empty series.
    Seeded,
    /// The tick opened a later bucket and froze the previous one.
    RolledOver { closed_bucket: i64 },
    Extended,
    /// The tick belonged to an earlier bucket and was folded into the open one.
    Clamped { tick_bucket: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationOutcome {
    Applied {
        bucket_start: i64,
        placement: TickPlacement,
    },
    /// The tail bucket is already closed and the tick does not open a later one.
    Stale { tick_bucket: i64, closed_bucket: i64 },
    SymbolMismatch { expected: String, found: String },
}

/// Folds ticks into the open candle of the series it owns. One instance per
/// chart; nothing here is shared between instances.
#[derive(Debug, Clone)]
pub struct TickConsolidator {
    symbol: String,
    clock: BucketClock,
    series: CandleSeries,
}

impl TickConsolidator {
    pub fn new(symbol: impl Into<String>, clock: BucketClock, retention: usize) -> Self {
        Self {
            symbol: symbol.into(),
            clock,
            series: CandleSeries::new(retention),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn clock(&self) -> BucketClock {
        self.clock
    }

    pub fn series(&self) -> &CandleSeries {
        &self.series
    }

    pub(crate) fn series_mut(&mut self) -> &mut CandleSeries {
        &mut self.series
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.series.open_candle()
    }

    pub fn open_bucket(&self) -> Option<i64> {
        self.series.open_candle().map(|candle| candle.bucket_start)
    }

    pub fn apply_tick(&mut self, tick: &Tick) -> ConsolidationOutcome {
        if !tick.symbol.eq_ignore_ascii_case(&self.symbol) {
            return ConsolidationOutcome::SymbolMismatch {
                expected: self.symbol.clone(),
                found: tick.symbol.clone(),
            };
        }

        let tick_bucket = self.clock.align(tick.event_time_secs());
        let Some(last) = self.series.last() else {
            let seeded = self.seed_candle(tick_bucket, tick);
            self.series.push(seeded);
            return ConsolidationOutcome::Applied {
                bucket_start: tick_bucket,
                placement: TickPlacement::Seeded,
            };
        };
        let last_bucket = last.bucket_start;
        let last_closed = last.is_closed;

        if self.clock.rolled_over(last_bucket, tick.event_time_secs()) {
            let seeded = self.seed_candle(tick_bucket, tick);
            self.series.push(seeded);
            return ConsolidationOutcome::Applied {
                bucket_start: tick_bucket,
                placement: TickPlacement::RolledOver {
                    closed_bucket: last_bucket,
                },
            };
        }

        if last_closed {
            return ConsolidationOutcome::Stale {
                tick_bucket,
                closed_bucket: last_bucket,
            };
        }

        let placement = if tick_bucket == last_bucket {
            TickPlacement::Extended
        } else {
            TickPlacement::Clamped { tick_bucket }
        };
        if let Some(open) = self.series.open_candle_mut() {
            open.apply_tick(tick);
        }
        ConsolidationOutcome::Applied {
            bucket_start: last_bucket,
            placement,
        }
    }

    /// Replaces (or appends) the open candle with an authoritative row.
    pub fn reseed(&mut self, candle: Candle) {
        let replace_tail = self
            .series
            .last()
            .map(|last| last.bucket_start == candle.bucket_start)
            .unwrap_or(false);
        if replace_tail {
            self.series.split_off_from(candle.bucket_start);
        }
        self.series.push(candle);
    }

    fn seed_candle(&self, bucket_start: i64, tick: &Tick) -> Candle {
        let mut candle = Candle::from_tick(bucket_start, tick);
        candle.symbol = self.symbol.clone();
        candle
    }
}
