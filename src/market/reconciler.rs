use crate::market::bucket::BucketClock;
use crate::market::consolidator::TickConsolidator;
use crate::market::types::Candle;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows of the normalized snapshot that were spliced in.
    pub inserted: usize,
    /// Local entries overwritten by authoritative rows.
    pub replaced: usize,
    /// Local entries newer than the snapshot that continue it and were kept.
    pub kept_tail: usize,
    /// Local entries newer than the snapshot dropped because of a gap.
    pub discarded_tail: usize,
    /// Local entries older than the snapshot dropped because of a gap.
    pub discarded_head: usize,
    /// The snapshot's last row became the open candle.
    pub reseeded: bool,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    pub fn had_gap(&self) -> bool {
        self.discarded_tail > 0 || self.discarded_head > 0
    }
}

/// Aligns, sorts and deduplicates snapshot rows. When two rows share a bucket
/// the later one in delivery order wins. Every row but the last is frozen.
pub fn normalize_snapshot(rows: Vec<Candle>, clock: BucketClock) -> Vec<Candle> {
    let mut indexed: Vec<(usize, Candle)> = rows
        .into_iter()
        .enumerate()
        .map(|(index, mut candle)| {
            candle.bucket_start = clock.align(candle.bucket_start);
            (index, candle)
        })
        .collect();
    indexed.sort_by(|(lhs_index, lhs), (rhs_index, rhs)| {
        lhs.bucket_start
            .cmp(&rhs.bucket_start)
            .then(rhs_index.cmp(lhs_index))
    });
    indexed.dedup_by_key(|(_, candle)| candle.bucket_start);

    let mut normalized: Vec<Candle> = indexed.into_iter().map(|(_, candle)| candle).collect();
    let len = normalized.len();
    for candle in normalized.iter_mut().take(len.saturating_sub(1)) {
        candle.is_closed = true;
    }
    normalized
}

/// Splices an authoritative batch into the consolidator's series. Local rows
/// in the snapshot's range are replaced verbatim; local rows newer than the
/// snapshot survive only when they continue it without a missing bucket.
pub fn reconcile_snapshot(
    consolidator: &mut TickConsolidator,
    snapshot: Vec<Candle>,
) -> ReconcileReport {
    let clock = consolidator.clock();
    let symbol = consolidator.symbol().to_string();
    let mut rows = normalize_snapshot(snapshot, clock);
    let (Some(first_bucket), Some(last_bucket)) = (
        rows.first().map(|row| row.bucket_start),
        rows.last().map(|row| row.bucket_start),
    ) else {
        return ReconcileReport::default();
    };
    for row in rows.iter_mut() {
        row.symbol.clone_from(&symbol);
    }

    let mut report = ReconcileReport {
        inserted: rows.len(),
        ..ReconcileReport::default()
    };

    let series = consolidator.series_mut();
    let overlapping = series.split_off_from(first_bucket);

    let head_gap = series
        .last()
        .map(|head_last| clock.missing_between(head_last.bucket_start, first_bucket) > 0)
        .unwrap_or(false);
    if head_gap {
        report.discarded_head = series.len();
        series.clear();
    }

    let (replaced, newer): (Vec<Candle>, Vec<Candle>) = overlapping
        .into_iter()
        .partition(|candle| candle.bucket_start <= last_bucket);
    report.replaced = replaced.len();

    let tail_continues = newer
        .first()
        .map(|candle| candle.bucket_start == clock.next_bucket(last_bucket))
        .unwrap_or(false);
    let kept_tail = if tail_continues {
        report.kept_tail = newer.len();
        newer
    } else {
        report.discarded_tail = newer.len();
        Vec::new()
    };

    report.reseeded = kept_tail.is_empty() && rows.last().map(|row| !row.is_closed).unwrap_or(false);
    let open_row = if report.reseeded { rows.pop() } else { None };

    series.extend_unchecked(rows);
    series.extend_unchecked(kept_tail);
    series.seal_all_but_last();
    series.enforce_retention();

    if let Some(open_row) = open_row {
        consolidator.reseed(open_row);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::Tick;

    const BASE: i64 = 1_700_000_010;

    fn row(bucket_start: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            bucket_start,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 5.0,
            trade_count: 3,
            is_closed,
        }
    }

    fn tick(second: i64, price: f64) -> Tick {
        Tick {
            symbol: "BTCUSDT".to_string(),
            open_time_ms: second * 1_000,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
            quote_volume: price,
            trade_count: 1,
            is_closed: false,
        }
    }

    fn consolidator(retention: usize) -> TickConsolidator {
        TickConsolidator::new("BTCUSDT", BucketClock::new(30), retention)
    }

    #[test]
    fn normalizes_order_duplicates_and_alignment() {
        let rows = vec![
            row(BASE + 60, 3.0, true),
            row(BASE + 7, 1.0, true),
            row(BASE + 30, 2.0, true),
            row(BASE + 30, 2.5, false),
        ];

        let normalized = normalize_snapshot(rows, BucketClock::new(30));
        let buckets: Vec<i64> = normalized.iter().map(|c| c.bucket_start).collect();

        assert_eq!(buckets, vec![BASE, BASE + 30, BASE + 60]);
        assert_eq!(normalized[1].close, 2.5);
        assert!(normalized[1].is_closed);
    }

    #[test]
    fn seeds_empty_series_and_reseeds_open_row() {
        let mut consolidator = consolidator(100);
        let report = reconcile_snapshot(
            &mut consolidator,
            vec![row(BASE, 1.0, true), row(BASE + 30, 2.0, false)],
        );

        assert_eq!(report.inserted, 2);
        assert!(report.reseeded);
        assert_eq!(consolidator.open_bucket(), Some(BASE + 30));

        consolidator.apply_tick(&tick(BASE + 45, 9.0));
        let open = consolidator.open_candle().expect("reseeded open candle");
        assert_eq!(open.close, 9.0);
        assert_eq!(open.high, 9.0);
        assert_eq!(open.volume, 6.0);
    }

    #[test]
    fn reseeded_open_row_respects_retention() {
        let mut consolidator = consolidator(3);
        consolidator.apply_tick(&tick(BASE + 91, 80.0));

        let report = reconcile_snapshot(
            &mut consolidator,
            vec![
                row(BASE, 1.0, true),
                row(BASE + 30, 2.0, true),
                row(BASE + 60, 3.0, true),
                row(BASE + 90, 4.0, false),
            ],
        );

        assert!(report.reseeded);
        assert_eq!(report.replaced, 1);
        let series = consolidator.series();
        assert!(series.is_well_formed());
        assert_eq!(series.closes(), vec![2.0, 3.0, 4.0]);
        assert_eq!(consolidator.open_bucket(), Some(BASE + 90));
    }

    #[test]
    fn authoritative_rows_overwrite_local_consolidation() {
        let mut consolidator = consolidator(100);
        consolidator.apply_tick(&tick(BASE + 1, 50.0));
        consolidator.apply_tick(&tick(BASE + 31, 51.0));

        let report = reconcile_snapshot(
            &mut consolidator,
            vec![row(BASE, 10.0, true), row(BASE + 30, 11.0, true)],
        );

        assert_eq!(report.replaced, 2);
        assert!(!report.reseeded);
        let closes = consolidator.series().closes();
        assert_eq!(closes, vec![10.0, 11.0]);
        assert!(consolidator.open_candle().is_none());
    }

    #[test]
    fn keeps_live_tail_that_continues_snapshot() {
        let mut consolidator = consolidator(100);
        consolidator.apply_tick(&tick(BASE + 61, 70.0));

        let report = reconcile_snapshot(
            &mut consolidator,
            vec![row(BASE, 10.0, true), row(BASE + 30, 11.0, false)],
        );

        assert_eq!(report.kept_tail, 1);
        assert!(!report.reseeded);
        let series = consolidator.series();
        assert_eq!(series.len(), 3);
        assert!(series.is_well_formed());
        assert_eq!(consolidator.open_bucket(), Some(BASE + 60));
        assert_eq!(consolidator.open_candle().map(|c| c.close), Some(70.0));
    }

    #[test]
    fn discards_stale_tail_after_gap() {
        let mut consolidator = consolidator(100);
        consolidator.apply_tick(&tick(BASE + 151, 70.0));

        let report = reconcile_snapshot(
            &mut consolidator,
            vec![row(BASE, 10.0, true), row(BASE + 30, 11.0, true)],
        );

        assert_eq!(report.discarded_tail, 1);
        assert!(report.had_gap());
        assert_eq!(consolidator.series().closes(), vec![10.0, 11.0]);
    }

    #[test]
    fn discards_stale_head_that_does_not_abut_snapshot() {
        let mut consolidator = consolidator(100);
        consolidator.apply_tick(&tick(BASE - 300, 1.0));

        let report = reconcile_snapshot(
            &mut consolidator,
            vec![row(BASE, 10.0, true), row(BASE + 30, 11.0, true)],
        );

        assert_eq!(report.discarded_head, 1);
        assert_eq!(consolidator.series().len(), 2);
    }

    #[test]
    fn keeps_adjacent_head() {
        let mut consolidator = consolidator(100);
        consolidator.apply_tick(&tick(BASE - 30, 1.0));

        let report = reconcile_snapshot(&mut consolidator, vec![row(BASE, 10.0, true)]);

        assert_eq!(report.discarded_head, 0);
        assert_eq!(consolidator.series().closes(), vec![1.0, 10.0]);
        assert!(consolidator.series().is_well_formed());
    }

    #[test]
    fn reapplying_identical_snapshot_is_idempotent() {
        let snapshot: Vec<Candle> = (0..6)
            .map(|step| row(BASE + step * 30, 10.0 + step as f64, step < 5))
            .collect();
        let mut consolidator = consolidator(4);
        consolidator.apply_tick(&tick(BASE + 181, 99.0));

        reconcile_snapshot(&mut consolidator, snapshot.clone());
        let once = consolidator.series().clone();
        reconcile_snapshot(&mut consolidator, snapshot);

        assert_eq!(consolidator.series(), &once);
        assert_eq!(once.len(), 4);
        assert!(once.is_well_formed());
    }

    #[test]
    fn empty_snapshot_changes_nothing() {
        let mut consolidator = consolidator(10);
        consolidator.apply_tick(&tick(BASE + 1, 5.0));
        let before = consolidator.series().clone();

        let report = reconcile_snapshot(&mut consolidator, Vec::new());

        assert!(report.is_empty());
        assert_eq!(consolidator.series(), &before);
    }
}
