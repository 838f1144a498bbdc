pub mod animation;
pub mod band;
pub mod bucket;
pub mod consolidator;
pub mod engine;
pub mod feed;
pub mod pipeline;
pub mod reconciler;
pub mod render;
pub mod series;
pub mod types;
pub mod visibility;

pub const MARKET_STATUS_EVENT: &str = "market_status";
pub const CANDLES_BOOTSTRAP_EVENT: &str = "candles_bootstrap";
pub const CANDLE_FRAME_EVENT: &str = "candle_frame";
pub const BAND_UPDATE_EVENT: &str = "band_update";
