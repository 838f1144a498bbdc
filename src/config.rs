use crate::error::AppError;
use crate::market::types::StartChartStreamArgs;
use std::path::Path;

pub const CHART_CONFIG_ENV: &str = "CHART_CONFIG";

/// Decodes a camelCase JSON document into start arguments. Missing fields
/// fall back to defaults during normalization.
pub fn parse_chart_args(payload: &mut [u8]) -> Result<StartChartStreamArgs, AppError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartChartStreamArgs::default());
    }
    Ok(simd_json::serde::from_slice(payload)?)
}

pub async fn load_chart_args(path: &Path) -> Result<StartChartStreamArgs, AppError> {
    let mut payload = tokio::fs::read(path).await?;
    parse_chart_args(&mut payload)
}

/// Reads the file named by `CHART_CONFIG`, or defaults when it is unset.
pub async fn load_chart_args_from_env() -> Result<StartChartStreamArgs, AppError> {
    match std::env::var_os(CHART_CONFIG_ENV) {
        Some(path) => {
            let path = Path::new(&path);
            tracing::info!(path = %path.display(), "loading chart config");
            load_chart_args(path).await
        }
        None => Ok(StartChartStreamArgs::default()),
    }
}
