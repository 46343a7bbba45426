pub mod logging;
pub mod metrics;

pub use logging::{error_chain, init_logging, level_from_verbosity};
pub use metrics::{MetricsRegistry, init_metrics};
