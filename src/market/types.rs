use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_BUCKET_WIDTH_SECS: i64 = 30;
pub const DEFAULT_ANIMATION_STEP_COUNT: u32 = 10;
pub const DEFAULT_ANIMATION_TOTAL_DURATION_MS: u64 = 300;
pub const DEFAULT_VISIBLE_WINDOW_MIN: usize = 50;
pub const DEFAULT_VISIBLE_WINDOW_MAX: usize = 300;
pub const DEFAULT_VISIBILITY_REFRESH_THRESHOLD_SECS: u64 = 15;
pub const DEFAULT_BAND_PERIOD: usize = 20;
pub const DEFAULT_BAND_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_TICK_ADMISSION: TickAdmission = TickAdmission::Drop;
pub const DEFAULT_TICK_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_TICK_INTERVAL: &str = "1s";
pub const DEFAULT_SNAPSHOT_BASE_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_SNAPSHOT_SETTLE_MS: u64 = 1_500;
pub const DEFAULT_MOCK_MODE: bool = false;
pub const MIN_ANIMATION_STEP_COUNT: u32 = 1;
pub const MAX_ANIMATION_STEP_COUNT: u32 = 120;
pub const MAX_ANIMATION_TOTAL_DURATION_MS: u64 = 5_000;
pub const MIN_VISIBLE_WINDOW_MAX: usize = 10;
pub const MAX_VISIBLE_WINDOW_MAX: usize = 5_000;
pub const MIN_VISIBILITY_REFRESH_THRESHOLD_SECS: u64 = 1;
pub const MAX_VISIBILITY_REFRESH_THRESHOLD_SECS: u64 = 3_600;
pub const MIN_BAND_PERIOD: usize = 2;
pub const MAX_BAND_PERIOD: usize = 500;
pub const MAX_BAND_MULTIPLIER: f64 = 10.0;
pub const MAX_SNAPSHOT_SETTLE_MS: u64 = 30_000;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarketConnectionState {
    Connecting,
    Live,
    Degraded,
    Reconnecting,
    Stopped,
    Error,
}

/// What the consolidator does with a tick that arrives while the previous
/// consolidation + animation cycle is still being rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickAdmission {
    Drop,
    KeepLatest,
    Supersede,
}

impl TickAdmission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::KeepLatest => "keep_latest",
            Self::Supersede => "supersede",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartStreamStatusSnapshot {
    pub state: MarketConnectionState,
    pub symbol: String,
    pub bucket_width_secs: i64,
    pub open_bucket: Option<i64>,
    pub series_len: usize,
    pub ticks_accepted: u64,
    pub ticks_dropped: u64,
    pub ticks_malformed: u64,
    pub ticks_clamped: u64,
    pub last_snapshot_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl ChartStreamStatusSnapshot {
    pub fn stopped(symbol: String, reason: Option<String>) -> Self {
        Self {
            state: MarketConnectionState::Stopped,
            symbol,
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            open_bucket: None,
            series_len: 0,
            ticks_accepted: 0,
            ticks_dropped: 0,
            ticks_malformed: 0,
            ticks_clamped: 0,
            last_snapshot_at_ms: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartChartStreamArgs {
    pub symbol: Option<String>,
    pub bucket_width_seconds: Option<i64>,
    pub animation_step_count: Option<u32>,
    pub animation_total_duration_ms: Option<u64>,
    pub visible_window_min: Option<usize>,
    pub visible_window_max: Option<usize>,
    pub visibility_refresh_threshold_seconds: Option<u64>,
    pub band_period: Option<usize>,
    pub band_multiplier: Option<f64>,
    pub tick_admission: Option<TickAdmission>,
    pub tick_stream_url: Option<String>,
    pub tick_interval: Option<String>,
    pub snapshot_base_url: Option<String>,
    pub snapshot_settle_ms: Option<u64>,
    pub mock_mode: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartStreamConfig {
    pub symbol: String,
    pub bucket_width_secs: i64,
    pub animation_step_count: u32,
    pub animation_total_duration_ms: u64,
    pub visible_window_min: usize,
    pub visible_window_max: usize,
    pub visibility_refresh_threshold_secs: u64,
    pub band_period: usize,
    pub band_multiplier: f64,
    pub tick_admission: TickAdmission,
    pub tick_stream_url: String,
    pub tick_interval: String,
    pub snapshot_base_url: String,
    pub snapshot_settle_ms: u64,
    pub mock_mode: bool,
}

impl Default for ChartStreamConfig {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            animation_step_count: DEFAULT_ANIMATION_STEP_COUNT,
            animation_total_duration_ms: DEFAULT_ANIMATION_TOTAL_DURATION_MS,
            visible_window_min: DEFAULT_VISIBLE_WINDOW_MIN,
            visible_window_max: DEFAULT_VISIBLE_WINDOW_MAX,
            visibility_refresh_threshold_secs: DEFAULT_VISIBILITY_REFRESH_THRESHOLD_SECS,
            band_period: DEFAULT_BAND_PERIOD,
            band_multiplier: DEFAULT_BAND_MULTIPLIER,
            tick_admission: DEFAULT_TICK_ADMISSION,
            tick_stream_url: DEFAULT_TICK_STREAM_URL.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL.to_string(),
            snapshot_base_url: DEFAULT_SNAPSHOT_BASE_URL.to_string(),
            snapshot_settle_ms: DEFAULT_SNAPSHOT_SETTLE_MS,
            mock_mode: DEFAULT_MOCK_MODE,
        }
    }
}

/// Bucket widths must tile the wall-clock minute (divisors of 60) or the day
/// (whole minutes dividing 86 400), so every bucket boundary lands on the same
/// second of the minute regardless of the epoch offset.
pub fn is_supported_bucket_width(width_secs: i64) -> bool {
    if width_secs <= 0 {
        return false;
    }
    if width_secs < 60 {
        return 60 % width_secs == 0;
    }
    width_secs % 60 == 0 && SECONDS_PER_DAY % width_secs == 0
}

impl StartChartStreamArgs {
    pub fn normalize(self) -> Result<ChartStreamConfig, AppError> {
        let symbol = self
            .symbol
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string())
            .trim()
            .to_ascii_uppercase();

        if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidArgument(
                "symbol must be non-empty alphanumeric ASCII".to_string(),
            ));
        }

        let bucket_width_secs = self
            .bucket_width_seconds
            .unwrap_or(DEFAULT_BUCKET_WIDTH_SECS);
        if !is_supported_bucket_width(bucket_width_secs) {
            return Err(AppError::InvalidArgument(format!(
                "bucketWidthSeconds {bucket_width_secs} must divide 60 or be a whole number of minutes dividing a day"
            )));
        }

        let animation_step_count = self
            .animation_step_count
            .unwrap_or(DEFAULT_ANIMATION_STEP_COUNT);
        if !(MIN_ANIMATION_STEP_COUNT..=MAX_ANIMATION_STEP_COUNT).contains(&animation_step_count) {
            return Err(AppError::InvalidArgument(format!(
                "animationStepCount must be between {MIN_ANIMATION_STEP_COUNT} and {MAX_ANIMATION_STEP_COUNT}"
            )));
        }

        let animation_total_duration_ms = self
            .animation_total_duration_ms
            .unwrap_or(DEFAULT_ANIMATION_TOTAL_DURATION_MS);
        if animation_total_duration_ms > MAX_ANIMATION_TOTAL_DURATION_MS {
            return Err(AppError::InvalidArgument(format!(
                "animationTotalDurationMs must not exceed {MAX_ANIMATION_TOTAL_DURATION_MS}"
            )));
        }

        let visible_window_max = self
            .visible_window_max
            .unwrap_or(DEFAULT_VISIBLE_WINDOW_MAX);
        if !(MIN_VISIBLE_WINDOW_MAX..=MAX_VISIBLE_WINDOW_MAX).contains(&visible_window_max) {
            return Err(AppError::InvalidArgument(format!(
                "visibleWindowMax must be between {MIN_VISIBLE_WINDOW_MAX} and {MAX_VISIBLE_WINDOW_MAX}"
            )));
        }
        let visible_window_min = self
            .visible_window_min
            .unwrap_or(DEFAULT_VISIBLE_WINDOW_MIN.min(visible_window_max));
        if visible_window_min == 0 || visible_window_min > visible_window_max {
            return Err(AppError::InvalidArgument(
                "visibleWindowMin must be between 1 and visibleWindowMax".to_string(),
            ));
        }

        let visibility_refresh_threshold_secs = self
            .visibility_refresh_threshold_seconds
            .unwrap_or(DEFAULT_VISIBILITY_REFRESH_THRESHOLD_SECS);
        if !(MIN_VISIBILITY_REFRESH_THRESHOLD_SECS..=MAX_VISIBILITY_REFRESH_THRESHOLD_SECS)
            .contains(&visibility_refresh_threshold_secs)
        {
            return Err(AppError::InvalidArgument(format!(
                "visibilityRefreshThresholdSeconds must be between {MIN_VISIBILITY_REFRESH_THRESHOLD_SECS} and {MAX_VISIBILITY_REFRESH_THRESHOLD_SECS}"
            )));
        }

        let band_period = self.band_period.unwrap_or(DEFAULT_BAND_PERIOD);
        if !(MIN_BAND_PERIOD..=MAX_BAND_PERIOD).contains(&band_period)
            || band_period > visible_window_max
        {
            return Err(AppError::InvalidArgument(format!(
                "bandPeriod must be between {MIN_BAND_PERIOD} and min({MAX_BAND_PERIOD}, visibleWindowMax)"
            )));
        }

        let band_multiplier = self.band_multiplier.unwrap_or(DEFAULT_BAND_MULTIPLIER);
        if !band_multiplier.is_finite()
            || band_multiplier <= 0.0
            || band_multiplier > MAX_BAND_MULTIPLIER
        {
            return Err(AppError::InvalidArgument(format!(
                "bandMultiplier must be a finite number in (0, {MAX_BAND_MULTIPLIER}]"
            )));
        }

        let tick_admission = self.tick_admission.unwrap_or(DEFAULT_TICK_ADMISSION);
        let tick_stream_url = normalize_url(
            self.tick_stream_url,
            DEFAULT_TICK_STREAM_URL,
            &["ws://", "wss://"],
            "tickStreamUrl",
        )?;
        let tick_interval = self
            .tick_interval
            .unwrap_or_else(|| DEFAULT_TICK_INTERVAL.to_string())
            .trim()
            .to_string();
        if tick_interval.is_empty() || !tick_interval.chars().all(|ch| ch.is_ascii_alphanumeric())
        {
            return Err(AppError::InvalidArgument(
                "tickInterval must be non-empty alphanumeric ASCII".to_string(),
            ));
        }
        let snapshot_base_url = normalize_url(
            self.snapshot_base_url,
            DEFAULT_SNAPSHOT_BASE_URL,
            &["http://", "https://"],
            "snapshotBaseUrl",
        )?;

        let snapshot_settle_ms = self.snapshot_settle_ms.unwrap_or(DEFAULT_SNAPSHOT_SETTLE_MS);
        if snapshot_settle_ms > MAX_SNAPSHOT_SETTLE_MS {
            return Err(AppError::InvalidArgument(format!(
                "snapshotSettleMs must not exceed {MAX_SNAPSHOT_SETTLE_MS}"
            )));
        }
        let mock_mode = self.mock_mode.unwrap_or(DEFAULT_MOCK_MODE);

        Ok(ChartStreamConfig {
            symbol,
            bucket_width_secs,
            animation_step_count,
            animation_total_duration_ms,
            visible_window_min,
            visible_window_max,
            visibility_refresh_threshold_secs,
            band_period,
            band_multiplier,
            tick_admission,
            tick_stream_url,
            tick_interval,
            snapshot_base_url,
            snapshot_settle_ms,
            mock_mode,
        })
    }
}

fn normalize_url(
    value: Option<String>,
    default: &str,
    schemes: &[&str],
    field: &str,
) -> Result<String, AppError> {
    let url = value
        .unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string();
    if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must start with one of {}",
            schemes.join(", ")
        )));
    }
    Ok(url)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartStreamSession {
    pub running: bool,
    pub symbol: String,
    pub bucket_width_secs: i64,
    pub animation_step_count: u32,
    pub animation_total_duration_ms: u64,
    pub visible_window_min: usize,
    pub visible_window_max: usize,
    pub band_period: usize,
    pub band_multiplier: f64,
    pub tick_admission: TickAdmission,
    pub mock_mode: bool,
}

impl ChartStreamSession {
    pub fn from_config(config: &ChartStreamConfig) -> Self {
        Self {
            running: true,
            symbol: config.symbol.clone(),
            bucket_width_secs: config.bucket_width_secs,
            animation_step_count: config.animation_step_count,
            animation_total_duration_ms: config.animation_total_duration_ms,
            visible_window_min: config.visible_window_min,
            visible_window_max: config.visible_window_max,
            band_period: config.band_period,
            band_multiplier: config.band_multiplier,
            tick_admission: config.tick_admission,
            mock_mode: config.mock_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartStreamStopResult {
    pub stopped: bool,
}

/// OHLCV aggregate for one bucket. `bucket_start` is in epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: String,
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub is_closed: bool,
}

impl Candle {
    pub fn from_tick(bucket_start: i64, tick: &Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            bucket_start,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: tick.volume,
            trade_count: tick.trade_count,
            is_closed: false,
        }
    }

    pub fn apply_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.high);
        self.low = self.low.min(tick.low);
        self.close = tick.close;
        self.volume += tick.volume;
        self.trade_count = self.trade_count.saturating_add(tick.trade_count);
    }

    pub fn is_consistent(&self, bucket_width_secs: i64) -> bool {
        self.bucket_start.rem_euclid(bucket_width_secs) == 0
            && self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
            && self.volume >= 0.0
    }
}

/// Incremental price update for the open bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub is_closed: bool,
}

impl Tick {
    pub fn event_time_secs(&self) -> i64 {
        self.open_time_ms.div_euclid(1_000)
    }
}

#[derive(Debug, Deserialize)]
pub struct KlineEventWire {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlinePayloadWire,
}

#[derive(Debug, Deserialize)]
pub struct KlinePayloadWire {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "n")]
    pub trades: u64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl TryFrom<KlineEventWire> for Tick {
    type Error = AppError;

    fn try_from(value: KlineEventWire) -> Result<Self, Self::Error> {
        if value.event_type != "kline" {
            return Err(AppError::MalformedTick(format!(
                "unexpected event type '{}' for kline stream",
                value.event_type
            )));
        }

        let kline = value.kline;
        let open = kline.open.parse::<f64>()?;
        let high = kline.high.parse::<f64>()?;
        let low = kline.low.parse::<f64>()?;
        let close = kline.close.parse::<f64>()?;
        let volume = kline.volume.parse::<f64>()?;
        let quote_volume = kline.quote_volume.parse::<f64>()?;

        validate_ohlcv(open, high, low, close, volume).map_err(AppError::MalformedTick)?;
        if !quote_volume.is_finite() {
            return Err(AppError::MalformedTick(
                "quote volume must be finite".to_string(),
            ));
        }

        Ok(Self {
            symbol: value.symbol.to_ascii_uppercase(),
            open_time_ms: kline.open_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: quote_volume.max(0.0),
            trade_count: kline.trades,
            is_closed: kline.is_closed,
        })
    }
}

pub fn parse_tick_payload(payload: &mut [u8]) -> Result<Tick, AppError> {
    let wire: KlineEventWire = simd_json::serde::from_slice(payload)?;
    wire.try_into()
}

fn validate_ohlcv(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Result<(), String> {
    if !open.is_finite()
        || !high.is_finite()
        || !low.is_finite()
        || !close.is_finite()
        || !volume.is_finite()
    {
        return Err("ohlcv values must be finite".to_string());
    }
    if volume < 0.0 {
        return Err("volume must be non-negative".to_string());
    }
    if high < low || high < open.max(close) || low > open.min(close) {
        return Err(format!(
            "inconsistent range (open {open}, high {high}, low {low}, close {close})"
        ));
    }
    Ok(())
}

/// Row returned by the snapshot endpoint of the backend of record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRowWire {
    pub open_time: i64,
    pub close_time: i64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub number_of_trades: u64,
}

impl SnapshotRowWire {
    /// A row whose `close_time` is still in the future describes the bucket
    /// that is currently open on the backend.
    pub fn into_candle(self, symbol: &str, now_ms: i64) -> Result<Candle, AppError> {
        validate_ohlcv(
            self.open_price,
            self.high_price,
            self.low_price,
            self.close_price,
            self.volume,
        )
        .map_err(AppError::MalformedSnapshot)?;
        if self.close_time < self.open_time {
            return Err(AppError::MalformedSnapshot(format!(
                "close_time {} precedes open_time {}",
                self.close_time, self.open_time
            )));
        }

        Ok(Candle {
            symbol: symbol.to_string(),
            bucket_start: self.open_time.div_euclid(1_000),
            open: self.open_price,
            high: self.high_price,
            low: self.low_price,
            close: self.close_price,
            volume: self.volume,
            trade_count: self.number_of_trades,
            is_closed: self.close_time < now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_kline_payload() {
        let mut payload = br#"{"e":"kline","E":1700000001000,"s":"btcusdt","k":{"t":1700000000000,"T":1700000000999,"s":"BTCUSDT","i":"1s","o":"100.0","c":"102.0","h":"105.0","l":"99.0","v":"1.5","n":12,"x":false,"q":"150.0"}}"#
            .to_vec();
        let tick = parse_tick_payload(&mut payload).expect("kline payload should parse");

        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.open_time_ms, 1_700_000_000_000);
        assert_eq!(tick.event_time_secs(), 1_700_000_000);
        assert_eq!(tick.high, 105.0);
        assert_eq!(tick.trade_count, 12);
        assert!(!tick.is_closed);
    }

    #[test]
    fn rejects_non_numeric_kline_payload() {
        let mut payload = br#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":0,"T":999,"s":"BTCUSDT","i":"1s","o":"broken","c":"1","h":"1","l":"1","v":"1","n":1,"x":false,"q":"1"}}"#
            .to_vec();

        assert!(parse_tick_payload(&mut payload).is_err());
    }

    #[test]
    fn rejects_kline_missing_fields() {
        let mut payload =
            br#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":0,"o":"1","c":"1"}}"#.to_vec();

        assert!(parse_tick_payload(&mut payload).is_err());
    }

    #[test]
    fn rejects_non_finite_and_inverted_ranges() {
        let mut non_finite = br#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":0,"T":999,"s":"BTCUSDT","i":"1s","o":"NaN","c":"1","h":"1","l":"1","v":"1","n":1,"x":false,"q":"1"}}"#
            .to_vec();
        let mut inverted = br#"{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":0,"T":999,"s":"BTCUSDT","i":"1s","o":"1","c":"1","h":"0.5","l":"2","v":"1","n":1,"x":false,"q":"1"}}"#
            .to_vec();

        assert!(matches!(
            parse_tick_payload(&mut non_finite),
            Err(AppError::MalformedTick(_))
        ));
        assert!(matches!(
            parse_tick_payload(&mut inverted),
            Err(AppError::MalformedTick(_))
        ));
    }

    #[test]
    fn snapshot_row_maps_to_candle_and_open_state() {
        let row = SnapshotRowWire {
            open_time: 1_700_000_010_000,
            close_time: 1_700_000_039_999,
            open_price: 10.0,
            high_price: 12.0,
            low_price: 9.0,
            close_price: 11.0,
            volume: 4.0,
            quote_volume: 40.0,
            number_of_trades: 7,
        };

        let closed = row
            .clone()
            .into_candle("BTCUSDT", 1_700_000_050_000)
            .expect("row should map");
        assert_eq!(closed.bucket_start, 1_700_000_010);
        assert!(closed.is_closed);

        let open = row
            .into_candle("BTCUSDT", 1_700_000_020_000)
            .expect("row should map");
        assert!(!open.is_closed);
    }

    #[test]
    fn supported_bucket_widths_tile_minute_or_day() {
        assert!(is_supported_bucket_width(30));
        assert!(is_supported_bucket_width(15));
        assert!(is_supported_bucket_width(60));
        assert!(is_supported_bucket_width(300));
        assert!(!is_supported_bucket_width(0));
        assert!(!is_supported_bucket_width(7));
        assert!(!is_supported_bucket_width(90));
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartChartStreamArgs::default()
            .normalize()
            .expect("defaults should be valid");

        assert_eq!(config, ChartStreamConfig::default());
    }

    #[test]
    fn validates_bucket_width() {
        let result = StartChartStreamArgs {
            bucket_width_seconds: Some(45),
            ..StartChartStreamArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_visible_window_bounds() {
        let result = StartChartStreamArgs {
            visible_window_min: Some(400),
            visible_window_max: Some(300),
            ..StartChartStreamArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_band_period_against_window() {
        let result = StartChartStreamArgs {
            visible_window_min: Some(5),
            visible_window_max: Some(20),
            band_period: Some(30),
            ..StartChartStreamArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_urls_and_symbol() {
        let bad_url = StartChartStreamArgs {
            snapshot_base_url: Some("ftp://backend".to_string()),
            ..StartChartStreamArgs::default()
        }
        .normalize();
        let bad_symbol = StartChartStreamArgs {
            symbol: Some("BTC-USDT".to_string()),
            ..StartChartStreamArgs::default()
        }
        .normalize();

        assert!(bad_url.is_err());
        assert!(bad_symbol.is_err());
    }

    #[test]
    fn accepts_admission_policy_from_json() {
        let mut payload = br#"{"symbol":"ethusdt","tickAdmission":"keep_latest","bucketWidthSeconds":60}"#.to_vec();
        let args: StartChartStreamArgs =
            simd_json::serde::from_slice(&mut payload).expect("args should decode");
        let config = args.normalize().expect("args should normalize");

        assert_eq!(config.symbol, "ETHUSDT");
        assert_eq!(config.tick_admission, TickAdmission::KeepLatest);
        assert_eq!(config.bucket_width_secs, 60);
    }
}
