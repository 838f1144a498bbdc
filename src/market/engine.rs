use crate::market::animation::{AnimationFrame, AnimationSettings, Animator};
use crate::market::band::{compute_bands, Band, BandSettings};
use crate::market::bucket::BucketClock;
use crate::market::consolidator::{ConsolidationOutcome, TickConsolidator, TickPlacement};
use crate::market::reconciler::{reconcile_snapshot, ReconcileReport};
use crate::market::render::{band_rows, BandRow};
use crate::market::series::CandleSeries;
use crate::market::types::{Candle, ChartStreamConfig, Tick, TickAdmission};
use crate::market::visibility::{RefreshDecision, Visibility, VisibilityRefresher};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub ticks_accepted: u64,
    pub ticks_dropped: u64,
    pub ticks_malformed: u64,
    pub ticks_clamped: u64,
    pub ticks_ignored: u64,
    pub sequences_superseded: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickDisposition {
    Applied(ConsolidationOutcome),
    /// Arrived while a cycle was in flight and was discarded.
    Dropped,
    /// Parked in the single pending slot until the in-flight cycle completes.
    Deferred { replaced_pending: bool },
    Ignored(ConsolidationOutcome),
}

/// Single writer over the candle series. Ticks, snapshots and visibility
/// changes all funnel through here; the async runtime only schedules calls.
#[derive(Debug)]
pub struct ChartEngine {
    consolidator: TickConsolidator,
    animator: Animator,
    refresher: VisibilityRefresher,
    band_settings: BandSettings,
    admission: TickAdmission,
    visible_window_min: usize,
    pending_tick: Option<Tick>,
    counters: EngineCounters,
    last_snapshot_at_ms: Option<i64>,
}

impl ChartEngine {
    pub fn new(config: &ChartStreamConfig) -> Self {
        Self {
            consolidator: TickConsolidator::new(
                config.symbol.clone(),
                BucketClock::new(config.bucket_width_secs),
                config.visible_window_max,
            ),
            animator: Animator::new(AnimationSettings::new(
                config.animation_step_count,
                Duration::from_millis(config.animation_total_duration_ms),
            )),
            refresher: VisibilityRefresher::new(Duration::from_secs(
                config.visibility_refresh_threshold_secs,
            )),
            band_settings: BandSettings {
                period: config.band_period,
                multiplier: config.band_multiplier,
            },
            admission: config.tick_admission,
            visible_window_min: config.visible_window_min,
            pending_tick: None,
            counters: EngineCounters::default(),
            last_snapshot_at_ms: None,
        }
    }

    pub fn symbol(&self) -> &str {
        self.consolidator.symbol()
    }

    pub fn clock(&self) -> BucketClock {
        self.consolidator.clock()
    }

    pub fn series(&self) -> &CandleSeries {
        self.consolidator.series()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.consolidator.series().to_vec()
    }

    pub fn open_bucket(&self) -> Option<i64> {
        self.consolidator.open_bucket()
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn last_snapshot_at_ms(&self) -> Option<i64> {
        self.last_snapshot_at_ms
    }

    pub fn visibility(&self) -> Visibility {
        self.refresher.state()
    }

    pub fn is_animating(&self) -> bool {
        self.animator.is_in_flight()
    }

    pub fn frame_interval(&self) -> Duration {
        self.animator.step_interval()
    }

    pub fn has_pending_tick(&self) -> bool {
        self.pending_tick.is_some()
    }

    /// True while the series holds fewer candles than the host's minimum
    /// visible window.
    pub fn needs_backfill(&self) -> bool {
        self.consolidator.series().len() < self.visible_window_min
    }

    /// Index range the host should show initially: the newest
    /// `visible_window_min` candles.
    pub fn initial_visible_range(&self) -> std::ops::Range<usize> {
        let len = self.consolidator.series().len();
        len.saturating_sub(self.visible_window_min)..len
    }

    pub fn offer_tick(&mut self, tick: Tick) -> TickDisposition {
        if self.animator.is_in_flight() {
            match self.admission {
                TickAdmission::Drop => {
                    self.counters.ticks_dropped = self.counters.ticks_dropped.saturating_add(1);
                    tracing::debug!(open_time_ms = tick.open_time_ms, "tick dropped while busy");
                    return TickDisposition::Dropped;
                }
                TickAdmission::KeepLatest => {
                    let replaced_pending = self.pending_tick.replace(tick).is_some();
                    if replaced_pending {
                        self.counters.ticks_dropped =
                            self.counters.ticks_dropped.saturating_add(1);
                    }
                    return TickDisposition::Deferred { replaced_pending };
                }
                TickAdmission::Supersede => {}
            }
        }
        self.apply_tick(tick)
    }

    fn apply_tick(&mut self, tick: Tick) -> TickDisposition {
        let outcome = self.consolidator.apply_tick(&tick);
        match &outcome {
            ConsolidationOutcome::Applied { placement, .. } => {
                self.counters.ticks_accepted = self.counters.ticks_accepted.saturating_add(1);
                if let TickPlacement::Clamped { tick_bucket } = placement {
                    self.counters.ticks_clamped = self.counters.ticks_clamped.saturating_add(1);
                    tracing::debug!(
                        tick_bucket,
                        open_bucket = ?self.consolidator.open_bucket(),
                        "regressed tick clamped into open bucket"
                    );
                }
                if let Some(target) = self.consolidator.open_candle().cloned() {
                    if self.animator.start(target) {
                        self.counters.sequences_superseded =
                            self.counters.sequences_superseded.saturating_add(1);
                    }
                }
                TickDisposition::Applied(outcome)
            }
            ConsolidationOutcome::Stale { .. } | ConsolidationOutcome::SymbolMismatch { .. } => {
                self.counters.ticks_ignored = self.counters.ticks_ignored.saturating_add(1);
                tracing::debug!(?outcome, "tick ignored");
                TickDisposition::Ignored(outcome)
            }
        }
    }

    pub fn record_malformed_tick(&mut self) {
        self.counters.ticks_malformed = self.counters.ticks_malformed.saturating_add(1);
    }

    /// Next animation frame, if any. Once a sequence completes, a tick parked
    /// by the keep-latest policy starts the next cycle.
    pub fn next_frame(&mut self) -> Option<AnimationFrame> {
        let frame = self.animator.next_frame();
        if !self.animator.is_in_flight() {
            if let Some(pending) = self.pending_tick.take() {
                self.apply_tick(pending);
            }
        }
        frame
    }

    /// Splices an authoritative batch in. The host is expected to redraw the
    /// whole series afterwards, so any in-flight animation is dropped.
    pub fn apply_snapshot(&mut self, rows: Vec<Candle>, now_ms: i64) -> ReconcileReport {
        let report = reconcile_snapshot(&mut self.consolidator, rows);
        self.last_snapshot_at_ms = Some(now_ms);
        self.animator
            .reset(self.consolidator.series().last().cloned());
        if let Some(pending) = self.pending_tick.take() {
            self.apply_tick(pending);
        }
        report
    }

    pub fn set_visibility(&mut self, visibility: Visibility, now: Instant) -> RefreshDecision {
        self.refresher.transition(visibility, now)
    }

    pub fn bands(&self) -> Vec<Option<Band>> {
        let candles: Vec<Candle> = self.consolidator.series().to_vec();
        compute_bands(&candles, self.band_settings)
    }

    pub fn band_rows(&self) -> Vec<BandRow> {
        let candles: Vec<Candle> = self.consolidator.series().to_vec();
        let bands = compute_bands(&candles, self.band_settings);
        band_rows(&candles, &bands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: i64 = 1_700_000_010;

    fn config(admission: TickAdmission) -> ChartStreamConfig {
        ChartStreamConfig {
            animation_step_count: 3,
            band_period: 3,
            visible_window_min: 2,
            visible_window_max: 20,
            tick_admission: admission,
            ..ChartStreamConfig::default()
        }
    }

    fn tick(second: i64, high: f64, low: f64, close: f64, volume: f64) -> Tick {
        Tick {
            symbol: "BTCUSDT".to_string(),
            open_time_ms: second * 1_000,
            open: 100.0,
            high,
            low,
            close,
            volume,
            quote_volume: close * volume,
            trade_count: 1,
            is_closed: false,
        }
    }

    fn closed_row(bucket_start: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            bucket_start,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            trade_count: 1,
            is_closed: true,
        }
    }

    fn drain(engine: &mut ChartEngine) -> Vec<AnimationFrame> {
        std::iter::from_fn(|| engine.next_frame()).collect()
    }

    #[test]
    fn drop_policy_discards_ticks_while_animating() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Drop));
        assert!(matches!(
            engine.offer_tick(tick(BUCKET + 1, 105.0, 99.0, 102.0, 1.0)),
            TickDisposition::Applied(_)
        ));
        assert!(engine.is_animating());

        assert_eq!(
            engine.offer_tick(tick(BUCKET + 2, 110.0, 90.0, 95.0, 5.0)),
            TickDisposition::Dropped
        );
        drain(&mut engine);

        let candle = engine.series().open_candle().expect("open candle");
        assert_eq!(candle.high, 105.0);
        assert_eq!(engine.counters().ticks_dropped, 1);
        assert_eq!(engine.counters().ticks_accepted, 1);
    }

    #[test]
    fn consolidates_scenario_after_each_cycle_completes() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Drop));
        engine.offer_tick(tick(BUCKET + 1, 105.0, 99.0, 102.0, 1.0));
        drain(&mut engine);
        engine.offer_tick(tick(BUCKET + 2, 103.0, 98.0, 101.0, 2.0));
        let frames = drain(&mut engine);

        let expected = engine.series().open_candle().expect("open candle").clone();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.last().map(|frame| &frame.candle), Some(&expected));
        assert_eq!(expected.open, 100.0);
        assert_eq!(expected.high, 105.0);
        assert_eq!(expected.low, 98.0);
        assert_eq!(expected.close, 101.0);
        assert_eq!(expected.volume, 3.0);
    }

    #[test]
    fn keep_latest_applies_newest_pending_tick_after_cycle() {
        let mut engine = ChartEngine::new(&config(TickAdmission::KeepLatest));
        engine.offer_tick(tick(BUCKET + 1, 101.0, 99.0, 100.0, 1.0));

        assert_eq!(
            engine.offer_tick(tick(BUCKET + 2, 120.0, 99.0, 110.0, 1.0)),
            TickDisposition::Deferred {
                replaced_pending: false
            }
        );
        assert_eq!(
            engine.offer_tick(tick(BUCKET + 3, 104.0, 97.0, 103.0, 2.0)),
            TickDisposition::Deferred {
                replaced_pending: true
            }
        );

        drain(&mut engine);
        let candle = engine.series().open_candle().expect("open candle");
        assert_eq!(candle.close, 103.0);
        assert_eq!(candle.high, 104.0);
        assert_eq!(candle.volume, 3.0);
        assert!(!engine.has_pending_tick());
        assert_eq!(engine.counters().ticks_dropped, 1);
    }

    #[test]
    fn supersede_restarts_animation_from_rendered_frame() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Supersede));
        engine.offer_tick(tick(BUCKET + 1, 101.0, 99.0, 100.0, 1.0));
        drain(&mut engine);
        engine.offer_tick(tick(BUCKET + 2, 130.0, 99.0, 130.0, 1.0));
        let first = engine.next_frame().expect("frame");
        assert_eq!(first.candle.close, 110.0);

        assert!(matches!(
            engine.offer_tick(tick(BUCKET + 3, 130.0, 99.0, 120.0, 1.0)),
            TickDisposition::Applied(_)
        ));
        let frames = drain(&mut engine);
        assert_eq!(frames.len(), 3);
        assert!((frames[0].candle.close - (110.0 + (120.0 - 110.0) / 3.0)).abs() < 1e-9);
        assert_eq!(frames[2].candle.close, 120.0);
        assert_eq!(engine.counters().sequences_superseded, 1);
    }

    #[test]
    fn supersede_across_rollover_renders_the_closed_candle_final_value() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Supersede));
        engine.offer_tick(tick(BUCKET + 1, 100.0, 100.0, 100.0, 1.0));
        drain(&mut engine);
        engine.offer_tick(tick(BUCKET + 2, 140.0, 100.0, 140.0, 1.0));
        let partial = engine.next_frame().expect("partial frame");
        assert!(partial.candle.close < 140.0);

        engine.offer_tick(tick(BUCKET + 31, 141.0, 139.0, 140.5, 1.0));
        let frames = drain(&mut engine);

        let closed = engine.series().to_vec()[0].clone();
        assert!(closed.is_closed);
        assert_eq!(closed.close, 140.0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].candle, closed);
        assert_eq!(frames[1].candle.bucket_start, BUCKET + 30);
        assert_eq!(Some(&frames[1].candle), engine.series().open_candle());
        assert_eq!(engine.counters().sequences_superseded, 1);
    }

    #[test]
    fn snapshot_resets_animation_and_feeds_bands() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Drop));
        assert!(engine.needs_backfill());
        engine.offer_tick(tick(BUCKET + 121, 14.0, 12.0, 13.0, 1.0));
        assert!(engine.is_animating());

        let report = engine.apply_snapshot(
            vec![
                closed_row(BUCKET, 10.0),
                closed_row(BUCKET + 30, 12.0),
                closed_row(BUCKET + 60, 11.0),
                closed_row(BUCKET + 90, 13.0),
            ],
            42,
        );

        assert_eq!(report.kept_tail, 1);
        assert!(!engine.is_animating());
        assert_eq!(engine.last_snapshot_at_ms(), Some(42));
        let bands = engine.bands();
        assert_eq!(bands.len(), 5);
        let band = bands[3].expect("band at fourth candle");
        assert!((band.middle - 12.0).abs() < 1e-12);
        assert_eq!(engine.band_rows()[3].band, Some(band));
        assert_eq!(engine.initial_visible_range(), 3..5);
        assert!(!engine.needs_backfill());
    }

    #[test]
    fn visibility_changes_delegate_to_refresher() {
        let mut engine = ChartEngine::new(&config(TickAdmission::Drop));
        let now = Instant::now();

        engine.set_visibility(Visibility::Hidden, now);
        assert_eq!(engine.visibility(), Visibility::Hidden);
        assert!(matches!(
            engine.set_visibility(Visibility::Visible, now + Duration::from_secs(20)),
            RefreshDecision::ForceSnapshot { .. }
        ));
    }
}
