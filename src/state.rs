use crate::market::pipeline::{ChartCommand, ChartEmitter, ChartView, SharedChartView};
use crate::market::types::{ChartStreamStatusSnapshot, DEFAULT_SYMBOL};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ChartStreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub commands: mpsc::Sender<ChartCommand>,
}

pub struct AppState {
    pub started_at: Instant,
    pub emitter: Arc<dyn ChartEmitter>,
    pub chart_stream: Mutex<Option<ChartStreamHandle>>,
    pub chart_status: Arc<RwLock<ChartStreamStatusSnapshot>>,
    pub chart_view: SharedChartView,
}

impl AppState {
    pub fn new(emitter: Arc<dyn ChartEmitter>) -> Self {
        let chart_status = ChartStreamStatusSnapshot::stopped(
            DEFAULT_SYMBOL.to_string(),
            Some("stream idle".to_string()),
        );

        Self {
            started_at: Instant::now(),
            emitter,
            chart_stream: Mutex::new(None),
            chart_status: Arc::new(RwLock::new(chart_status)),
            chart_view: Arc::new(parking_lot::RwLock::new(ChartView::empty(
                DEFAULT_SYMBOL.to_string(),
            ))),
        }
    }
}
