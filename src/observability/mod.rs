// Structured logging
pub mod logging;

// Prometheus recorder
pub mod metrics;

pub use self::logging::{init_logging, LogFormat};
pub use self::metrics::install_recorder;
