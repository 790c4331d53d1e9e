//! `nap` is a composable HTTP request core: a fluent request builder, pluggable
//! body encoders and response decoders, and a retrying executor that wraps any
//! transport.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use nap::prelude::{ClientConfig, Decoded, HyperExecutor, RequestBuilder, RetryConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct Call {
//!     method: &'static str,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Reply {
//!     result: u64,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Problem {
//!     message: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new()
//!         .executor(Arc::new(HyperExecutor::new()?))
//!         .auto_retry(
//!             RetryConfig::new()
//!                 .retry_max(3)
//!                 .wait_min(Duration::from_millis(200))
//!                 .wait_max(Duration::from_secs(2)),
//!         );
//!
//!     let template = RequestBuilder::with_config(config)
//!         .base("https://rpc.example.com/v1")?
//!         .bearer_auth("token")?;
//!
//!     let response = template
//!         .clone()
//!         .post("blocks")
//!         .body_json(Call { method: "latest" })
//!         .receive::<Decoded<Reply>, Decoded<Problem>>()
//!         .await?;
//!
//!     println!("status={} reply={:?}", response.status(), response.success());
//!     Ok(())
//! }
//! ```
//!
//! # Resource handling
//!
//! - Response bodies are always read to the end or drained, so pooled
//!   connections are reused.
//! - Request bodies are encoded once per build and replayed on retries.
//! - Every wait (transport exchange and retry backoff) races the call's
//!   [`CallContext`].

#[cfg(all(not(feature = "tls-rustls-ring"), not(feature = "tls-native")))]
compile_error!("nap requires one TLS backend feature: enable `tls-rustls-ring` or `tls-native`");

mod body;
mod config;
mod context;
mod decoder;
mod error;
mod executor;
mod metrics;
mod multipart;
mod provider;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::body::{RequestBody, ResponseBody, empty_response_body, full_response_body};
pub use crate::config::ClientConfig;
pub use crate::context::CallContext;
pub use crate::decoder::{
    DecodeTarget, Decoded, Discard, Raw, ResponseDecoder, SuccessDecider, decode_on_success,
};
pub use crate::error::{CancelReason, Error, ErrorCode, TransportErrorKind};
pub use crate::executor::{DefaultExecutor, ExecuteFuture, Executor, HttpRequest, HttpResponse};
pub use crate::metrics::{RequestCounter, RequestCounterVec, RequestLabels};
pub use crate::multipart::{MultipartBody, MultipartSource};
pub use crate::provider::{
    BodyProvider, EmptyBody, FormBody, JsonBody, RawBody, ReaderBody, UrlEncodedBody, XmlBody,
};
pub use crate::request::RequestBuilder;
pub use crate::response::{Outcome, Response};
pub use crate::retry::{
    Backoff, CheckRetry, DefaultRetryPolicy, ErrorHandler, ErrorPropagatedRetryPolicy,
    ExponentialBackoff, LinearJitterBackoff, RetryCheck, RetryConfig, RetryExecutor,
};
pub use crate::transport::{
    HyperExecutor, HyperExecutorBuilder, RedirectPolicy, TlsBackend, default_executor,
};

pub type NapResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Backoff, BodyProvider, CallContext, CheckRetry, ClientConfig, DecodeTarget, Decoded,
        DefaultRetryPolicy, Discard, Error, ErrorCode, ErrorHandler, ErrorPropagatedRetryPolicy,
        Executor, ExponentialBackoff, HttpRequest, HttpResponse, HyperExecutor,
        LinearJitterBackoff, NapResult, Outcome, Raw, RequestBuilder, RequestCounter,
        RequestCounterVec, Response, ResponseDecoder, RetryConfig, RetryExecutor,
        TransportErrorKind,
    };
}

#[cfg(test)]
mod tests;
