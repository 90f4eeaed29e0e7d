//! 弹性模式模块：为每个网络调用提供有界重试与指数退避。
//!
//! # Resilience Module
//!
//! Every batch call goes through a [`RetryPolicy`]. Time and randomness are
//! injected through [`Clock`] and [`JitterSource`] so retry schedules can be
//! asserted exactly in tests.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use timegpt_client::resilience::{FixedJitter, RetryConfig, RetryPolicy};
//!
//! let policy = RetryPolicy::new(RetryConfig {
//!     base_delay_ms: 200,
//!     ..RetryConfig::default()
//! })
//! .with_jitter(Arc::new(FixedJitter(0.0)));
//!
//! assert_eq!(policy.backoff_delay(0, None), Duration::from_millis(200));
//! assert_eq!(policy.backoff_delay(3, None), Duration::from_millis(1600));
//! ```

pub mod clock;
pub mod retry;

pub use clock::{Clock, FixedJitter, JitterSource, ManualClock, RandomJitter, TokioClock};
pub use retry::{Attempted, FailureClass, RetryConfig, RetryPolicy};
