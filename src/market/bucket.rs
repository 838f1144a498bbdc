/// Start of the bucket containing `timestamp`. Works on any unit as long as
/// `timestamp` and `width` share it; a non-positive width leaves the value
/// untouched.
pub fn align_to_bucket(timestamp: i64, width: i64) -> i64 {
    if width <= 0 {
        return timestamp;
    }
    timestamp - timestamp.rem_euclid(width)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketClock {
    width_secs: i64,
}

impl BucketClock {
    pub fn new(width_secs: i64) -> Self {
        Self { width_secs }
    }

    pub fn width_secs(&self) -> i64 {
        self.width_secs
    }

    pub fn align(&self, timestamp_secs: i64) -> i64 {
        align_to_bucket(timestamp_secs, self.width_secs)
    }

    pub fn align_ms(&self, timestamp_ms: i64) -> i64 {
        self.align(timestamp_ms.div_euclid(1_000))
    }

    /// True when `timestamp_secs` falls into a later bucket than `open_bucket`.
    pub fn rolled_over(&self, open_bucket: i64, timestamp_secs: i64) -> bool {
        self.align(timestamp_secs) > open_bucket
    }

    pub fn next_bucket(&self, bucket_start: i64) -> i64 {
        bucket_start.saturating_add(self.width_secs)
    }

    /// Number of whole buckets strictly between two bucket starts.
    pub fn missing_between(&self, earlier: i64, later: i64) -> i64 {
        if self.width_secs <= 0 || later <= earlier {
            return 0;
        }
        ((later - earlier) / self.width_secs - 1).max(0)
    }

    /// Wall-clock instant (epoch ms) of the next bucket boundary after `now_ms`.
    pub fn next_boundary_ms(&self, now_ms: i64) -> i64 {
        let width_ms = self.width_secs.saturating_mul(1_000);
        align_to_bucket(now_ms, width_ms).saturating_add(width_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2023-11-14T22:13:00Z
    const MINUTE_START: i64 = 1_700_000_000 - 1_700_000_000 % 60;

    #[test]
    fn splits_minute_into_half_buckets() {
        let clock = BucketClock::new(30);

        assert_eq!(clock.align(MINUTE_START + 29), MINUTE_START);
        assert_eq!(clock.align(MINUTE_START + 30), MINUTE_START + 30);
        assert_eq!(clock.align(MINUTE_START + 59), MINUTE_START + 30);
        assert_eq!(clock.align(MINUTE_START + 60), MINUTE_START + 60);
    }

    #[test]
    fn alignment_is_idempotent() {
        for width in [1, 5, 15, 30, 60, 300, 3_600] {
            for offset in [-61, -1, 0, 1, 29, 30, 59, 61, 12_345] {
                let ts = MINUTE_START + offset;
                let aligned = align_to_bucket(ts, width);
                assert_eq!(align_to_bucket(aligned, width), aligned);
                assert_eq!(aligned.rem_euclid(width), 0);
                assert!(aligned <= ts && ts - aligned < width);
            }
        }
    }

    #[test]
    fn aligns_negative_timestamps_downwards() {
        assert_eq!(align_to_bucket(-1, 30), -30);
        assert_eq!(align_to_bucket(-30, 30), -30);
    }

    #[test]
    fn detects_rollover_only_for_later_buckets() {
        let clock = BucketClock::new(30);

        assert!(!clock.rolled_over(MINUTE_START, MINUTE_START + 29));
        assert!(clock.rolled_over(MINUTE_START, MINUTE_START + 30));
        assert!(!clock.rolled_over(MINUTE_START + 30, MINUTE_START + 10));
    }

    #[test]
    fn counts_missing_buckets() {
        let clock = BucketClock::new(30);

        assert_eq!(clock.missing_between(0, 30), 0);
        assert_eq!(clock.missing_between(0, 90), 2);
        assert_eq!(clock.missing_between(90, 0), 0);
    }

    #[test]
    fn next_boundary_is_strictly_after_now() {
        let clock = BucketClock::new(30);
        let minute_ms = MINUTE_START * 1_000;

        assert_eq!(clock.next_boundary_ms(minute_ms), minute_ms + 30_000);
        assert_eq!(clock.next_boundary_ms(minute_ms + 29_999), minute_ms + 30_000);
        assert_eq!(clock.align_ms(minute_ms + 45_500), MINUTE_START + 30);
    }
}
