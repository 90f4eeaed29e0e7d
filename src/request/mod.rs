//! 请求构建模块：校验多序列表格输入并生成预测请求。
//!
//! # Request Module
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SeriesTable`] / [`FutureTable`] | Long-format tabular input |
//! | [`ForecastOptions`] | Per-call options (horizon, model, intervals, limits) |
//! | [`RequestBuilder`] | Validates input and produces a [`ForecastRequest`] |
//! | [`ModelParams`] | Model input window used by `restrict_input` |

pub mod builder;
pub mod options;
pub mod restrict;
pub mod table;
pub mod validation;

pub use builder::{ForecastRequest, ModelConfig, RequestBuilder};
pub use options::{FinetuneLoss, ForecastOptions, DEFAULT_MODEL};
pub use restrict::ModelParams;
pub use table::{ColumnNames, FutureRow, FutureTable, SeriesTable, TableRow, TimeValue};
pub use validation::{is_supported_model, AZURE_MODEL};
