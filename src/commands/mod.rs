pub mod chart_stream;
