mod collector;
mod serve;

pub use collector::{MetricsCollector, SeriesSnapshot, WindowStats};
pub use serve::{setup_metrics_recorder, setup_metrics_routes, track_metrics};
