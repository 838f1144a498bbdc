use crate::error::AppError;
use crate::market::animation::AnimationFrame;
use crate::market::consolidator::{ConsolidationOutcome, TickPlacement};
use crate::market::engine::{ChartEngine, TickDisposition};
use crate::market::feed::{
    connect_tick_stream, now_unix_ms, FeedEvent, MockTickSource, SnapshotSource, TickFeed,
};
use crate::market::render::BandRow;
use crate::market::types::{
    Candle, ChartStreamConfig, ChartStreamStatusSnapshot, MarketConnectionState, Tick,
};
use crate::market::visibility::{RefreshDecision, Visibility};
use crate::market::{
    BAND_UPDATE_EVENT, CANDLES_BOOTSTRAP_EVENT, CANDLE_FRAME_EVENT, MARKET_STATUS_EVENT,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const STATUS_HEARTBEAT_MS: u64 = 1_000;
const STATUS_ERROR_THROTTLE_MS: u64 = 1_000;
const SNAPSHOT_MAILBOX_CAPACITY: usize = 4;
const SNAPSHOT_FETCH_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandlesBootstrap {
    pub symbol: String,
    pub bucket_width_secs: i64,
    pub candles: Vec<Candle>,
    pub visible_from: usize,
    pub visible_to: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BandUpdate {
    pub symbol: String,
    pub rows: Vec<BandRow>,
}

/// Everything the runtime pushes to the host.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ChartEvent {
    MarketStatus(ChartStreamStatusSnapshot),
    CandlesBootstrap(CandlesBootstrap),
    CandleFrame(AnimationFrame),
    BandUpdate(BandUpdate),
}

impl ChartEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MarketStatus(_) => MARKET_STATUS_EVENT,
            Self::CandlesBootstrap(_) => CANDLES_BOOTSTRAP_EVENT,
            Self::CandleFrame(_) => CANDLE_FRAME_EVENT,
            Self::BandUpdate(_) => BAND_UPDATE_EVENT,
        }
    }
}

pub trait ChartEmitter: Send + Sync + 'static {
    fn emit(&self, event: ChartEvent) -> Result<(), AppError>;
}

impl ChartEmitter for mpsc::UnboundedSender<ChartEvent> {
    fn emit(&self, event: ChartEvent) -> Result<(), AppError> {
        let name = event.name();
        self.send(event)
            .map_err(|_| AppError::ChannelClosed(format!("{name} receiver dropped")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartCommand {
    SetVisibility(Visibility),
    RefreshSnapshot,
}

/// Read-only copy of the latest series state for host queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartView {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub bands: Vec<BandRow>,
    pub visibility: Visibility,
}

impl ChartView {
    pub fn empty(symbol: String) -> Self {
        Self {
            symbol,
            candles: Vec::new(),
            bands: Vec::new(),
            visibility: Visibility::Visible,
        }
    }
}

pub type SharedChartView = Arc<parking_lot::RwLock<ChartView>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotTrigger {
    Startup,
    Rollover,
    Backfill,
    Visibility,
    Host,
}

impl SnapshotTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Rollover => "rollover",
            Self::Backfill => "backfill",
            Self::Visibility => "visibility",
            Self::Host => "host",
        }
    }
}

#[derive(Debug)]
struct SnapshotResult {
    trigger: SnapshotTrigger,
    result: Result<Vec<Candle>, AppError>,
}

enum StreamDirective {
    Reconnect,
    ImmediateReconnect,
    Cancelled,
}

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<MarketConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<std::time::Instant>,
}

impl StatusPublishThrottle {
    fn allow(
        &mut self,
        state: MarketConnectionState,
        reason: &Option<String>,
        now: std::time::Instant,
    ) -> bool {
        if self.last_state == Some(state)
            && self.last_reason == *reason
            && self
                .last_emit
                .map(|instant| {
                    now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
                })
                .unwrap_or(false)
        {
            return false;
        }

        self.last_state = Some(state);
        self.last_reason = reason.clone();
        self.last_emit = Some(now);
        true
    }
}

struct ChartRuntime {
    config: ChartStreamConfig,
    engine: ChartEngine,
    emitter: Arc<dyn ChartEmitter>,
    status_store: Arc<RwLock<ChartStreamStatusSnapshot>>,
    view: SharedChartView,
    throttle: StatusPublishThrottle,
    snapshot_source: SnapshotSource,
    snapshot_tx: mpsc::Sender<SnapshotResult>,
    snapshot_in_flight: bool,
    snapshot_timeout: Duration,
    frame_deadline: Option<Instant>,
    state: MarketConnectionState,
    reason: Option<String>,
    feed_connected: bool,
    cancel_token: CancellationToken,
}

impl ChartRuntime {
    fn new(
        config: ChartStreamConfig,
        emitter: Arc<dyn ChartEmitter>,
        status_store: Arc<RwLock<ChartStreamStatusSnapshot>>,
        view: SharedChartView,
        snapshot_tx: mpsc::Sender<SnapshotResult>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            engine: ChartEngine::new(&config),
            snapshot_source: SnapshotSource::from_config(&config),
            config,
            emitter,
            status_store,
            view,
            throttle: StatusPublishThrottle::default(),
            snapshot_tx,
            snapshot_in_flight: false,
            snapshot_timeout: Duration::from_millis(SNAPSHOT_FETCH_TIMEOUT_MS),
            frame_deadline: None,
            state: MarketConnectionState::Connecting,
            reason: None,
            feed_connected: false,
            cancel_token,
        }
    }

    fn emit(&self, event: ChartEvent) {
        let name = event.name();
        if let Err(error) = self.emitter.emit(event) {
            tracing::warn!(event = name, %error, "failed to emit chart event");
        }
    }

    fn status_snapshot(&self) -> ChartStreamStatusSnapshot {
        let counters = self.engine.counters();
        ChartStreamStatusSnapshot {
            state: self.state,
            symbol: self.config.symbol.clone(),
            bucket_width_secs: self.config.bucket_width_secs,
            open_bucket: self.engine.open_bucket(),
            series_len: self.engine.series().len(),
            ticks_accepted: counters.ticks_accepted,
            ticks_dropped: counters.ticks_dropped,
            ticks_malformed: counters.ticks_malformed,
            ticks_clamped: counters.ticks_clamped,
            last_snapshot_at_ms: self.engine.last_snapshot_at_ms(),
            reason: self.reason.clone(),
        }
    }

    async fn publish_status(&mut self, state: MarketConnectionState, reason: Option<String>) {
        self.state = state;
        self.reason = reason;
        let snapshot = self.status_snapshot();

        {
            let mut writable = self.status_store.write().await;
            *writable = snapshot.clone();
        }

        self.emit(ChartEvent::MarketStatus(snapshot));
    }

    async fn publish_status_throttled(
        &mut self,
        state: MarketConnectionState,
        reason: Option<String>,
    ) {
        if !self.throttle.allow(state, &reason, std::time::Instant::now()) {
            return;
        }
        self.publish_status(state, reason).await;
    }

    fn publish_view(&self) {
        let candles = self.engine.candles();
        let bands = self.engine.band_rows();
        let mut writable = self.view.write();
        writable.candles = candles;
        writable.bands = bands;
        writable.visibility = self.engine.visibility();
    }

    fn emit_bootstrap(&self) {
        let range = self.engine.initial_visible_range();
        self.emit(ChartEvent::CandlesBootstrap(CandlesBootstrap {
            symbol: self.config.symbol.clone(),
            bucket_width_secs: self.config.bucket_width_secs,
            candles: self.engine.candles(),
            visible_from: range.start,
            visible_to: range.end,
        }));
    }

    fn emit_bands(&self) {
        self.emit(ChartEvent::BandUpdate(BandUpdate {
            symbol: self.config.symbol.clone(),
            rows: self.engine.band_rows(),
        }));
    }

    fn sync_frame_deadline(&mut self) {
        if !self.engine.is_animating() {
            self.frame_deadline = None;
        } else if self.frame_deadline.is_none() {
            self.frame_deadline = Some(Instant::now() + self.engine.frame_interval());
        }
    }

    /// Deadline of the next rollover-aligned snapshot: the coming bucket
    /// boundary plus the settle delay the backend needs to close the bucket.
    fn next_rollover_deadline(&self) -> Instant {
        let now_ms = now_unix_ms();
        let boundary_ms = self.engine.clock().next_boundary_ms(now_ms);
        let wait_ms = boundary_ms
            .saturating_sub(now_ms)
            .max(0)
            .unsigned_abs()
            .saturating_add(self.config.snapshot_settle_ms);
        Instant::now() + Duration::from_millis(wait_ms)
    }

    fn request_snapshot(&mut self, trigger: SnapshotTrigger) {
        if self.snapshot_in_flight {
            tracing::debug!(trigger = trigger.as_str(), "snapshot already in flight");
            return;
        }
        self.snapshot_in_flight = true;

        let source = self.snapshot_source.clone();
        let symbol = self.config.symbol.clone();
        let clock = self.engine.clock();
        let limit = self.config.visible_window_max;
        let deadline = self.snapshot_timeout;
        let snapshot_tx = self.snapshot_tx.clone();
        let cancel_token = self.cancel_token.clone();
        tracing::debug!(trigger = trigger.as_str(), limit, "requesting snapshot");

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel_token.cancelled() => return,
                result = source.fetch_within(deadline, &symbol, clock, limit, now_unix_ms()) => {
                    result
                }
            };
            let _ = snapshot_tx.send(SnapshotResult { trigger, result }).await;
        });
    }

    fn handle_tick(&mut self, tick: Tick) {
        let disposition = self.engine.offer_tick(tick);
        if let TickDisposition::Applied(ConsolidationOutcome::Applied {
            bucket_start,
            placement: TickPlacement::RolledOver { closed_bucket },
        }) = disposition
        {
            tracing::debug!(closed_bucket, bucket_start, "bucket rolled over");
            self.publish_view();
            if self.engine.needs_backfill() {
                self.request_snapshot(SnapshotTrigger::Backfill);
            }
        }
        self.sync_frame_deadline();
    }

    async fn handle_malformed(&mut self, error: AppError) {
        self.engine.record_malformed_tick();
        tracing::warn!(%error, "dropping malformed tick");
        let state = self.state;
        self.publish_status_throttled(state, Some(format!("malformed tick dropped: {error}")))
            .await;
    }

    fn emit_next_frame(&mut self) {
        if let Some(frame) = self.engine.next_frame() {
            let completed = frame.step >= frame.steps;
            self.emit(ChartEvent::CandleFrame(frame));
            if completed {
                self.emit_bands();
                self.publish_view();
            }
        }

        self.frame_deadline = if self.engine.is_animating() {
            let interval = self.engine.frame_interval();
            Some(
                self.frame_deadline
                    .map(|deadline| deadline + interval)
                    .unwrap_or_else(|| Instant::now() + interval),
            )
        } else {
            None
        };
    }

    fn handle_command(&mut self, command: ChartCommand) {
        match command {
            ChartCommand::SetVisibility(visibility) => {
                match self
                    .engine
                    .set_visibility(visibility, std::time::Instant::now())
                {
                    RefreshDecision::ForceSnapshot { hidden_for } => {
                        tracing::info!(
                            hidden_for_ms = hidden_for.as_millis() as u64,
                            "hidden past refresh threshold, forcing snapshot"
                        );
                        self.request_snapshot(SnapshotTrigger::Visibility);
                    }
                    RefreshDecision::Resume { hidden_for } => {
                        tracing::debug!(
                            hidden_for_ms = hidden_for.as_millis() as u64,
                            "resuming without snapshot"
                        );
                    }
                    RefreshDecision::None => {}
                }
                self.view.write().visibility = self.engine.visibility();
            }
            ChartCommand::RefreshSnapshot => self.request_snapshot(SnapshotTrigger::Host),
        }
    }

    async fn handle_snapshot(&mut self, snapshot: SnapshotResult) {
        self.snapshot_in_flight = false;
        let trigger = snapshot.trigger.as_str();
        let rows = match snapshot.result {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                tracing::warn!(trigger, "snapshot returned no rows");
                self.publish_status_throttled(
                    MarketConnectionState::Degraded,
                    Some("snapshot returned no rows".to_string()),
                )
                .await;
                return;
            }
            Err(error) => {
                tracing::warn!(trigger, %error, "snapshot fetch failed");
                self.publish_status_throttled(
                    MarketConnectionState::Degraded,
                    Some(format!("snapshot unavailable: {error}")),
                )
                .await;
                return;
            }
        };

        let report = self.engine.apply_snapshot(rows, now_unix_ms());
        if report.had_gap() {
            tracing::warn!(
                trigger,
                discarded_head = report.discarded_head,
                discarded_tail = report.discarded_tail,
                "discontinuity discarded while reconciling snapshot"
            );
        }
        tracing::info!(
            trigger,
            inserted = report.inserted,
            replaced = report.replaced,
            kept_tail = report.kept_tail,
            reseeded = report.reseeded,
            series_len = self.engine.series().len(),
            "snapshot reconciled"
        );

        self.emit_bootstrap();
        self.emit_bands();
        self.publish_view();
        self.frame_deadline = None;
        self.sync_frame_deadline();

        let state = if self.feed_connected {
            MarketConnectionState::Live
        } else {
            self.state
        };
        let reason = if self.engine.needs_backfill() {
            format!(
                "history shorter than visible window ({} of {})",
                self.engine.series().len(),
                self.config.visible_window_min
            )
        } else {
            format!("snapshot applied ({trigger})")
        };
        self.publish_status(state, Some(reason)).await;
    }

    async fn open_feed(&self) -> Result<TickFeed, AppError> {
        if self.config.mock_mode {
            return Ok(TickFeed::Mock(MockTickSource::new(self.config.symbol.clone())));
        }
        let stream = connect_tick_stream(&self.config).await?;
        Ok(TickFeed::Live(Box::new(stream)))
    }

    async fn drive(
        &mut self,
        feed: &mut TickFeed,
        commands: &mut mpsc::Receiver<ChartCommand>,
        snapshots: &mut mpsc::Receiver<SnapshotResult>,
        heartbeat: &mut Interval,
        next_snapshot_at: &mut Instant,
    ) -> StreamDirective {
        let cancel_token = self.cancel_token.clone();
        loop {
            let animating = self.engine.is_animating();
            let frame_deadline = self.frame_deadline.unwrap_or_else(Instant::now);
            let snapshot_deadline = *next_snapshot_at;

            tokio::select! {
                _ = cancel_token.cancelled() => return StreamDirective::Cancelled,
                event = feed.next_event() => match event {
                    None => {
                        self.publish_status_throttled(
                            MarketConnectionState::Reconnecting,
                            Some("tick stream ended".to_string()),
                        )
                        .await;
                        return StreamDirective::Reconnect;
                    }
                    Some(Err(error)) => {
                        tracing::warn!(%error, "tick stream frame error");
                        self.publish_status_throttled(
                            MarketConnectionState::Reconnecting,
                            Some(format!("websocket frame error: {error}")),
                        )
                        .await;
                        return StreamDirective::Reconnect;
                    }
                    Some(Ok(FeedEvent::Closed)) => return StreamDirective::ImmediateReconnect,
                    Some(Ok(FeedEvent::Tick(tick))) => self.handle_tick(tick),
                    Some(Ok(FeedEvent::Malformed(error))) => self.handle_malformed(error).await,
                    Some(Ok(FeedEvent::Ignored)) => {}
                },
                Some(command) = commands.recv() => self.handle_command(command),
                Some(snapshot) = snapshots.recv() => self.handle_snapshot(snapshot).await,
                _ = tokio::time::sleep_until(frame_deadline), if animating => self.emit_next_frame(),
                _ = tokio::time::sleep_until(snapshot_deadline) => {
                    self.request_snapshot(SnapshotTrigger::Rollover);
                    *next_snapshot_at = self.next_rollover_deadline();
                }
                _ = heartbeat.tick() => {
                    let (state, reason) = (self.state, self.reason.clone());
                    self.publish_status(state, reason).await;
                }
            }
        }
    }
}

/// Runs one chart until `cancel_token` fires. Owns the chart engine; ticks,
/// host commands, snapshot results and frame deadlines are all serialized
/// through this task.
pub async fn run_chart_stream(
    config: ChartStreamConfig,
    emitter: Arc<dyn ChartEmitter>,
    status_store: Arc<RwLock<ChartStreamStatusSnapshot>>,
    view: SharedChartView,
    mut commands: mpsc::Receiver<ChartCommand>,
    cancel_token: CancellationToken,
) {
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(SNAPSHOT_MAILBOX_CAPACITY);
    let mut runtime = ChartRuntime::new(
        config,
        emitter,
        status_store,
        view,
        snapshot_tx,
        cancel_token.clone(),
    );

    tracing::info!(
        symbol = %runtime.config.symbol,
        bucket_width_secs = runtime.config.bucket_width_secs,
        admission = runtime.config.tick_admission.as_str(),
        mock = runtime.config.mock_mode,
        "chart stream starting"
    );
    runtime
        .publish_status(
            MarketConnectionState::Connecting,
            Some("loading snapshot".to_string()),
        )
        .await;
    runtime.request_snapshot(SnapshotTrigger::Startup);

    let mut heartbeat = tokio::time::interval(Duration::from_millis(STATUS_HEARTBEAT_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_snapshot_at = runtime.next_rollover_deadline();
    let mut reconnect_attempt = 0_u32;

    while !cancel_token.is_cancelled() {
        let phase = if reconnect_attempt == 0 {
            MarketConnectionState::Connecting
        } else {
            MarketConnectionState::Reconnecting
        };
        let reason = if runtime.config.mock_mode {
            "starting deterministic mock stream".to_string()
        } else if reconnect_attempt == 0 {
            "opening websocket stream".to_string()
        } else {
            format!("reconnect attempt {reconnect_attempt}")
        };
        runtime.publish_status(phase, Some(reason)).await;

        let opened = tokio::select! {
            _ = cancel_token.cancelled() => break,
            opened = runtime.open_feed() => opened,
        };

        match opened {
            Ok(mut feed) => {
                reconnect_attempt = 0;
                runtime.feed_connected = true;
                let reason = if runtime.config.mock_mode {
                    "mock mode active"
                } else {
                    "websocket connected"
                };
                runtime
                    .publish_status(MarketConnectionState::Live, Some(reason.to_string()))
                    .await;

                let directive = runtime
                    .drive(
                        &mut feed,
                        &mut commands,
                        &mut snapshot_rx,
                        &mut heartbeat,
                        &mut next_snapshot_at,
                    )
                    .await;
                runtime.feed_connected = false;

                match directive {
                    StreamDirective::Cancelled => break,
                    StreamDirective::ImmediateReconnect => {
                        tracing::info!("tick stream closed by peer, reconnecting");
                        continue;
                    }
                    StreamDirective::Reconnect => {}
                }
            }
            Err(error) => {
                tracing::warn!(%error, attempt = reconnect_attempt, "tick stream connect failed");
                runtime
                    .publish_status_throttled(
                        MarketConnectionState::Reconnecting,
                        Some(format!("websocket connect error: {error}")),
                    )
                    .await;
            }
        }

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        let delay = reconnect_delay(reconnect_attempt);
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    cancel_token.cancel();
    runtime
        .publish_status(
            MarketConnectionState::Stopped,
            Some("stream stopped".to_string()),
        )
        .await;
    tracing::info!(symbol = %runtime.config.symbol, "chart stream stopped");
}

fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(6);
    let base_ms = 200_u64.saturating_mul(1_u64 << exponent);
    let jitter_ms = (now_unix_ms().unsigned_abs() % 250).min(249);
    Duration::from_millis((base_ms + jitter_ms).min(5_000))
}
