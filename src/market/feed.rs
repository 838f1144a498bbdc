use crate::error::AppError;
use crate::market::bucket::BucketClock;
use crate::market::reconciler::normalize_snapshot;
use crate::market::types::{parse_tick_payload, Candle, ChartStreamConfig, SnapshotRowWire, Tick};
use futures_util::StreamExt;
use reqwest::Client;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub type TickWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MOCK_TICK_INTERVAL_MS: u64 = 250;
const MOCK_BASE_PRICE: f64 = 100_000.0;

fn tick_stream_endpoint(base_url: &str, symbol: &str, interval: &str) -> String {
    format!("{base_url}/{}@kline_{interval}", symbol.to_ascii_lowercase())
}

fn snapshot_endpoint(base_url: &str, symbol: &str, width_secs: i64, limit: usize) -> String {
    format!(
        "{base_url}/candles?symbol={}&width={width_secs}&limit={limit}",
        symbol.to_ascii_uppercase()
    )
}

pub async fn connect_tick_stream(config: &ChartStreamConfig) -> Result<TickWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let request = tick_stream_endpoint(
        &config.tick_stream_url,
        &config.symbol,
        &config.tick_interval,
    );
    tracing::debug!(%request, "connecting tick stream");
    let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
    Ok(stream)
}

/// Fetches the newest `limit` candles from the backend of record, aligned and
/// deduplicated. Rows that fail validation reject the whole batch.
pub async fn fetch_snapshot(
    client: &Client,
    base_url: &str,
    symbol: &str,
    clock: BucketClock,
    limit: usize,
    now_ms: i64,
) -> Result<Vec<Candle>, AppError> {
    let endpoint = snapshot_endpoint(base_url, symbol, clock.width_secs(), limit);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<SnapshotRowWire>>().await?;
    rows_into_candles(payload, symbol, clock, now_ms)
}

fn rows_into_candles(
    rows: Vec<SnapshotRowWire>,
    symbol: &str,
    clock: BucketClock,
    now_ms: i64,
) -> Result<Vec<Candle>, AppError> {
    let candles = rows
        .into_iter()
        .map(|row| row.into_candle(symbol, now_ms))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize_snapshot(candles, clock))
}

#[derive(Debug, Clone)]
pub enum SnapshotSource {
    Http { client: Client, base_url: String },
    Mock,
}

impl SnapshotSource {
    pub fn from_config(config: &ChartStreamConfig) -> Self {
        if config.mock_mode {
            Self::Mock
        } else {
            Self::Http {
                client: Client::new(),
                base_url: config.snapshot_base_url.clone(),
            }
        }
    }

    pub async fn fetch(
        &self,
        symbol: &str,
        clock: BucketClock,
        limit: usize,
        now_ms: i64,
    ) -> Result<Vec<Candle>, AppError> {
        match self {
            Self::Http { client, base_url } => {
                fetch_snapshot(client, base_url, symbol, clock, limit, now_ms).await
            }
            Self::Mock => {
                let rows = build_mock_snapshot(clock, limit, now_ms);
                rows_into_candles(rows, symbol, clock, now_ms)
            }
        }
    }

    /// Like [`fetch`](Self::fetch), but a request still pending after
    /// `deadline` resolves to [`AppError::Timeout`].
    pub async fn fetch_within(
        &self,
        deadline: Duration,
        symbol: &str,
        clock: BucketClock,
        limit: usize,
        now_ms: i64,
    ) -> Result<Vec<Candle>, AppError> {
        tokio::time::timeout(deadline, self.fetch(symbol, clock, limit, now_ms))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "snapshot fetch exceeded {} ms",
                    deadline.as_millis()
                ))
            })?
    }
}

#[derive(Debug)]
pub enum FeedEvent {
    Tick(Tick),
    Malformed(AppError),
    Closed,
    Ignored,
}

pub fn decode_message(message: Message) -> FeedEvent {
    let parsed = match message {
        Message::Text(text_payload) => {
            let mut owned_payload = text_payload.into_bytes();
            parse_tick_payload(owned_payload.as_mut_slice())
        }
        Message::Binary(mut binary_payload) => parse_tick_payload(binary_payload.as_mut_slice()),
        Message::Close(_) => return FeedEvent::Closed,
        _ => return FeedEvent::Ignored,
    };
    match parsed {
        Ok(tick) => FeedEvent::Tick(tick),
        Err(error) => FeedEvent::Malformed(error),
    }
}

/// Deterministic price path shared by the mock tick and snapshot sources so
/// that mock snapshots line up with mock ticks.
fn mock_price(at_secs: f64) -> f64 {
    MOCK_BASE_PRICE + 120.0 * (at_secs / 180.0).sin() + 15.0 * (at_secs / 11.0).sin()
}

fn build_mock_snapshot(clock: BucketClock, limit: usize, now_ms: i64) -> Vec<SnapshotRowWire> {
    let width = clock.width_secs();
    let now_secs = now_ms.div_euclid(1_000);
    let current = clock.align(now_secs);
    let count = limit.max(1) as i64;
    let start = current - (count - 1) * width;

    (0..count)
        .map(|index| {
            let open_time = start + index * width;
            let last_second = (open_time + width - 1).min(now_secs).max(open_time);
            let samples: Vec<f64> = (open_time..=last_second)
                .map(|second| mock_price(second as f64))
                .collect();
            let open_price = samples.first().copied().unwrap_or(MOCK_BASE_PRICE);
            let close_price = samples.last().copied().unwrap_or(open_price);
            let high_price = samples.iter().copied().fold(f64::MIN, f64::max) + 0.5;
            let low_price = samples.iter().copied().fold(f64::MAX, f64::min) - 0.5;
            let volume = samples.len() as f64 * 0.07;
            SnapshotRowWire {
                open_time: open_time * 1_000,
                close_time: (open_time + width) * 1_000 - 1,
                open_price,
                high_price,
                low_price,
                close_price,
                volume,
                quote_volume: volume * close_price,
                number_of_trades: samples.len() as u64,
            }
        })
        .collect()
}

#[derive(Debug)]
pub struct MockTickSource {
    symbol: String,
    sequence: u64,
    ticker: Option<Interval>,
}

impl MockTickSource {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sequence: 0,
            ticker: None,
        }
    }

    /// Waits for the next pacing tick. The interval is created on first use so
    /// the source can be built outside a runtime.
    async fn pace(&mut self) {
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval(Duration::from_millis(MOCK_TICK_INTERVAL_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
    }

    /// One-second kline update for the second containing `now_ms`.
    pub fn tick_at(&mut self, now_ms: i64) -> Tick {
        self.sequence = self.sequence.saturating_add(1);
        let second = now_ms.div_euclid(1_000);
        let open = mock_price(second as f64);
        let close = mock_price(now_ms as f64 / 1_000.0);
        let volume = 0.05 + (self.sequence % 5) as f64 * 0.01;
        Tick {
            symbol: self.symbol.clone(),
            open_time_ms: second * 1_000,
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume,
            quote_volume: volume * close,
            trade_count: 1 + self.sequence % 3,
            is_closed: false,
        }
    }
}

pub enum TickFeed {
    Live(Box<TickWsStream>),
    Mock(MockTickSource),
}

impl TickFeed {
    /// Waits for the next event. `None` means the underlying stream ended.
    pub async fn next_event(&mut self) -> Option<Result<FeedEvent, AppError>> {
        match self {
            Self::Live(stream) => match stream.next().await? {
                Ok(message) => Some(Ok(decode_message(message))),
                Err(error) => Some(Err(error.into())),
            },
            Self::Mock(source) => {
                source.pace().await;
                Some(Ok(FeedEvent::Tick(source.tick_at(now_unix_ms()))))
            }
        }
    }
}

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
