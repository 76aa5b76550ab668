#![forbid(unsafe_code)]

//! Transport plumbing for the wrts streaming client.
//!
//! A thin HTTP wrapper over `reqwest` with streaming bodies, ranged and HEAD
//! requests and per-call cancellation, plus the WebSocket connector used by
//! the streaming source variant. Every await accepts a
//! [`tokio_util::sync::CancellationToken`]; cancellation surfaces as
//! [`NetError::Cancelled`] rather than a panic or a hang.

mod client;
mod error;
mod retry;
mod token;
mod types;
mod ws;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use client::{HttpClient, NetResponse};
pub use error::{NetError, NetResult};
pub use retry::RetryPolicy;
pub use token::RequestToken;
pub use types::{Headers, NetOptions, RangeSpec};
pub use ws::WsConnection;

pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send>>;
