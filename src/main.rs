fn main() {
    if let Err(error) = live_candle_chart_lib::run() {
        eprintln!("live-candle-chart: {error}");
        std::process::exit(1);
    }
}
