pub mod anomaly_map;
pub mod colormap;
pub mod config;
pub mod encode;
pub mod errors;
pub mod geometry;
pub mod model;
pub mod postprocess;
pub mod protocol;
pub mod session;
pub mod traits;
pub mod training;

pub mod mocks;

use log::LevelFilter;

pub use anomaly_map::{AnomalyMap, RawAnomalyMap};
pub use config::{Config, TrainConfig};
pub use errors::{BridgeError, Result};
pub use model::OnnxAnomalyModel;
pub use postprocess::{evaluate, Classification, Evaluation, OverlayParams};
pub use protocol::Response;
pub use session::{run_loop, RunContext, SessionOptions};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

/// Route `log` records to stderr; stdout carries the response stream.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this twice is a no-op.
pub fn init_logging(default_filter: LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.target(env_logger::Target::Stderr);
    let _ = builder.try_init();
}
