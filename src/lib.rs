pub mod commands;
pub mod config;
pub mod error;
pub mod market;
pub mod state;

use commands::chart_stream::{start_chart_stream, stop_chart_stream};
use config::load_chart_args_from_env;
use error::AppError;
use market::pipeline::ChartEvent;
use state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber on stderr. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> Result<(), AppError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve())
}

/// Streams one chart until ctrl-c, writing every chart event to stdout as a
/// JSON line.
async fn serve() -> Result<(), AppError> {
    let args = load_chart_args_from_env().await?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ChartEvent>();
    let state = AppState::new(Arc::new(events_tx));

    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match simd_json::serde::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(error) => {
                    tracing::warn!(event = event.name(), %error, "failed to encode chart event");
                }
            }
        }
    });

    let session = start_chart_stream(&state, Some(args)).await?;
    tracing::info!(
        symbol = %session.symbol,
        bucket_width_secs = session.bucket_width_secs,
        mock = session.mock_mode,
        "chart session started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    stop_chart_stream(&state).await?;
    tracing::info!(
        uptime_ms = state.started_at.elapsed().as_millis() as u64,
        "chart session finished"
    );

    drop(state);
    let _ = writer.await;
    Ok(())
}
