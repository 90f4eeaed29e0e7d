//! 传输层模块：封装与预测服务之间的 HTTP 通信。
//!
//! # Transport Module
//!
//! [`Transport`] is the seam between the client and the network. The
//! production implementation is [`HttpTransport`]; tests substitute scripted
//! implementations to drive retries and reconciliation deterministically.
//!
//! Implementations surface non-success HTTP responses as
//! [`crate::Error::Remote`] and connection-level failures as
//! [`TransportError`]. They never retry on their own.

pub mod http;
pub mod wire;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::Result;

pub use http::{HttpTransport, TransportError, REQUEST_ID_HEADER};

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body and decode the JSON response.
    async fn post_json(&self, path: &str, body: Bytes) -> Result<Value>;

    /// GET with query parameters and decode the JSON response.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    /// GET and report only the HTTP status.
    async fn probe(&self, path: &str) -> Result<u16>;
}
