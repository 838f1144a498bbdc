use crate::error::AppError;
use crate::market::pipeline::{run_chart_stream, ChartCommand, ChartView};
use crate::market::types::{
    ChartStreamSession, ChartStreamStatusSnapshot, ChartStreamStopResult, MarketConnectionState,
    StartChartStreamArgs,
};
use crate::market::visibility::Visibility;
use crate::state::{AppState, ChartStreamHandle};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const COMMAND_MAILBOX_CAPACITY: usize = 32;

pub async fn start_chart_stream(
    state: &AppState,
    args: Option<StartChartStreamArgs>,
) -> Result<ChartStreamSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let existing_handle = {
        let mut stream_slot = state.chart_stream.lock().await;
        stream_slot.take()
    };
    if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    *state.chart_view.write() = ChartView::empty(config.symbol.clone());

    let cancellation_token = CancellationToken::new();
    let (commands, commands_rx) = mpsc::channel(COMMAND_MAILBOX_CAPACITY);
    let join_handle = tokio::spawn(run_chart_stream(
        config.clone(),
        Arc::clone(&state.emitter),
        Arc::clone(&state.chart_status),
        Arc::clone(&state.chart_view),
        commands_rx,
        cancellation_token.clone(),
    ));

    {
        let mut stream_slot = state.chart_stream.lock().await;
        *stream_slot = Some(ChartStreamHandle {
            cancellation_token,
            join_handle,
            commands,
        });
    }

    Ok(ChartStreamSession::from_config(&config))
}

pub async fn stop_chart_stream(state: &AppState) -> Result<ChartStreamStopResult, AppError> {
    let existing_handle = {
        let mut stream_slot = state.chart_stream.lock().await;
        stream_slot.take()
    };

    let stopped = if let Some(handle) = existing_handle {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
        true
    } else {
        false
    };

    {
        let mut writable = state.chart_status.write().await;
        writable.state = MarketConnectionState::Stopped;
        writable.reason = Some("stream stopped by command".to_string());
    }

    Ok(ChartStreamStopResult { stopped })
}

pub async fn chart_stream_status(state: &AppState) -> Result<ChartStreamStatusSnapshot, AppError> {
    let snapshot = state.chart_status.read().await.clone();
    Ok(snapshot)
}

pub async fn set_chart_visibility(
    state: &AppState,
    visibility: Visibility,
) -> Result<(), AppError> {
    send_command(state, ChartCommand::SetVisibility(visibility)).await
}

pub async fn refresh_chart_snapshot(state: &AppState) -> Result<(), AppError> {
    send_command(state, ChartCommand::RefreshSnapshot).await
}

pub async fn chart_series_view(state: &AppState) -> Result<ChartView, AppError> {
    Ok(state.chart_view.read().clone())
}

async fn send_command(state: &AppState, command: ChartCommand) -> Result<(), AppError> {
    let commands = {
        let stream_slot = state.chart_stream.lock().await;
        stream_slot
            .as_ref()
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| AppError::InvalidArgument("no chart stream is running".to_string()))?
    };
    commands
        .send(command)
        .await
        .map_err(|_| AppError::ChannelClosed("chart stream mailbox closed".to_string()))
}
