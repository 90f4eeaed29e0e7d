//! Forecast client: configuration, construction and the top-level call.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod config;
pub mod core;
pub mod types;

pub use builder::TimeGptClientBuilder;
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use core::TimeGptClient;
pub use types::{CallPhase, CallStats};
