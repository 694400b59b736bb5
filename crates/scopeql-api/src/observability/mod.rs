//! Observability infrastructure for scopeql.
//!
//! Metrics are described by the domain and server crates
//! (`register_result_cache_metrics`, `register_engine_metrics`); exporting
//! them is left to the embedding application.

mod logging;

pub use logging::{init_logging, json_subscriber, LogFormat, LogSettings};
