//! 批处理模块：将多序列请求切分为有界批次并并发发送。
//!
//! # Batch Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`partition`] | Deterministic, order-preserving split by row and series limits |
//! | [`Dispatcher`] | Sends batches through the retry policy with bounded parallelism |
//! | [`BatchResponse`] | Decoded per-batch forecast with attempt count and timing |
//!
//! ## Example
//!
//! ```rust
//! use timegpt_client::batch::{BatchLimits, OversizedSeries};
//!
//! let limits = BatchLimits::unbounded().with_max_rows(1_000).with_max_series(50);
//! assert_eq!(limits.max_rows, Some(1_000));
//! assert_eq!(OversizedSeries::default(), OversizedSeries::Truncate);
//! ```

mod executor;
mod partition;

pub use executor::{BatchResponse, Dispatcher, MAX_PAYLOAD_BYTES};
pub use partition::{partition, Batch, BatchLimits, BatchMember, OversizedSeries};
