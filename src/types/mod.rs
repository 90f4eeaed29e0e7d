//! 类型系统模块：定义时间序列、采样频率与预测结果的核心数据类型。
//!
//! # Types Module
//!
//! Core data types shared by the request builder, the batch dispatcher and
//! the response reconciler.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Frequency`] | Sampling frequency with calendar arithmetic |
//! | [`Series`] | One validated series (timestamps, target, covariates) |
//! | [`ForecastResult`] | Complete, ordered per-series forecasts |
//! | [`ForecastRow`] | Flat `(unique_id, ds, TimeGPT, ...)` output row |

pub mod frequency;
pub mod result;
pub mod series;

pub use frequency::{Frequency, FrequencyUnit};
pub use result::{ForecastResult, ForecastRow, SeriesForecast, FORECAST_COLUMN};
pub use series::Series;
