//! # timegpt-client
//!
//! TimeGPT 时间序列预测服务的 Rust 客户端：校验多序列输入、分批并发请求、带退避的重试以及结果合并。
//!
//! Client core for the hosted TimeGPT forecasting service. It turns a
//! long-format table of time series into validated forecast requests, sends
//! them in bounded batches with retries, and merges the batch responses into
//! one complete, ordered result.
//!
//! ## Call Flow
//!
//! caller → [`request`] → [`batch`] (fan-out) → [`resilience`] per call →
//! [`transport`] → [`reconcile`] (fan-in) → caller
//!
//! A call either returns a forecast for every input series or fails with an
//! [`Error`]; partial results are never returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::{Duration, NaiveDate};
//! use timegpt_client::{ForecastOptions, SeriesTable, TimeGptClient};
//!
//! #[tokio::main]
//! async fn main() -> timegpt_client::Result<()> {
//!     let client = TimeGptClient::builder().api_key("your-api-key").build()?;
//!
//!     let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//!     let mut table = SeriesTable::new();
//!     table.push_series("id1", (0..100).map(|d| (start + Duration::days(d), d as f64)));
//!
//!     let forecast = client.forecast(&table, &ForecastOptions::new(10)).await?;
//!     for row in forecast.to_rows() {
//!         println!("{} {} {}", row.unique_id, row.ds, row.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | Tabular input, options and request validation |
//! | [`batch`] | Deterministic partitioning and bounded parallel dispatch |
//! | [`resilience`] | Retry policy with exponential backoff and jitter |
//! | [`reconcile`] | Merging batch responses into one ordered result |
//! | [`transport`] | HTTP transport and wire format |
//! | [`client`] | Client configuration and the top-level forecast call |
//! | [`types`] | Series, frequencies and forecast results |

pub mod batch;
pub mod client;
pub mod error_code;
pub mod reconcile;
pub mod request;
pub mod resilience;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{CallPhase, CallStats, ClientConfig, TimeGptClient, TimeGptClientBuilder};
pub use request::{
    ColumnNames, FinetuneLoss, ForecastOptions, ForecastRequest, FutureTable, RequestBuilder,
    SeriesTable, TableRow,
};
pub use types::{ForecastResult, ForecastRow, Frequency, SeriesForecast};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
