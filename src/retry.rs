use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};

use crate::body::{RESPONSE_DRAIN_LIMIT, RequestBody, build_http_request, drain_body, empty_response_body};
use crate::context::CallContext;
use crate::error::{Error, TransportErrorKind};
use crate::executor::{ExecuteFuture, Executor, HttpRequest, HttpResponse};
use crate::util::{parse_retry_after, redact_uri_for_logs};

const DEFAULT_RETRY_MAX: usize = 4;
const DEFAULT_WAIT_MIN: Duration = Duration::from_secs(1);
const DEFAULT_WAIT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct RetryCheck {
    pub retry: bool,
    pub error: Option<Error>,
}

impl RetryCheck {
    pub const fn retry() -> Self {
        Self {
            retry: true,
            error: None,
        }
    }

    pub const fn stop() -> Self {
        Self {
            retry: false,
            error: None,
        }
    }

    pub fn with_error(retry: bool, error: Error) -> Self {
        Self {
            retry,
            error: Some(error),
        }
    }
}

pub trait CheckRetry: Send + Sync {
    fn check_retry(&self, context: &CallContext, outcome: Result<&HttpResponse, &Error>) -> RetryCheck;
}

/// Computes the wait before the attempt following `attempt_index` (0-based).
pub trait Backoff: Send + Sync {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt_index: usize,
        response: Option<&HttpResponse>,
    ) -> Duration;
}

pub trait ErrorHandler: Send + Sync {
    fn handle(
        &self,
        response: Option<HttpResponse>,
        error: Option<Error>,
        attempts: usize,
    ) -> Result<HttpResponse, Error>;
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

fn is_terminal_transport_error(error: &Error) -> bool {
    matches!(
        error.transport_kind(),
        Some(
            TransportErrorKind::RedirectLimit
                | TransportErrorKind::UnsupportedScheme
                | TransportErrorKind::Certificate
        )
    )
}

fn check_common(
    context: &CallContext,
    outcome: Result<&HttpResponse, &Error>,
    propagate_status: bool,
) -> RetryCheck {
    if let Some(reason) = context.err() {
        return RetryCheck::with_error(false, Error::Canceled { reason });
    }

    match outcome {
        Err(error) if is_terminal_transport_error(error) => RetryCheck::stop(),
        Err(_) => RetryCheck::retry(),
        Ok(response) => {
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return RetryCheck::retry();
            }
            if !is_retryable_status(status) {
                return RetryCheck::stop();
            }
            if propagate_status {
                RetryCheck::with_error(true, Error::UnexpectedStatus { status })
            } else {
                RetryCheck::retry()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryPolicy;

impl CheckRetry for DefaultRetryPolicy {
    fn check_retry(&self, context: &CallContext, outcome: Result<&HttpResponse, &Error>) -> RetryCheck {
        check_common(context, outcome, false)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorPropagatedRetryPolicy;

impl CheckRetry for ErrorPropagatedRetryPolicy {
    fn check_retry(&self, context: &CallContext, outcome: Result<&HttpResponse, &Error>) -> RetryCheck {
        check_common(context, outcome, true)
    }
}

fn retry_after_for_429(response: Option<&HttpResponse>) -> Option<Duration> {
    let response = response?;
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    parse_retry_after(response.headers())
}

/// `min * 2^attempt_index`, capped at `max`. A 429 carrying `Retry-After`
/// waits exactly that many seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExponentialBackoff;

impl Backoff for ExponentialBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt_index: usize,
        response: Option<&HttpResponse>,
    ) -> Duration {
        if let Some(wait) = retry_after_for_429(response) {
            return wait;
        }
        let exponent = u32::try_from(attempt_index).unwrap_or(u32::MAX);
        let multiplier = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        min.saturating_mul(multiplier).min(max)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LinearJitterBackoff;

impl Backoff for LinearJitterBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt_index: usize,
        response: Option<&HttpResponse>,
    ) -> Duration {
        if let Some(wait) = retry_after_for_429(response) {
            return wait;
        }
        let attempt = u32::try_from(attempt_index.saturating_add(1)).unwrap_or(u32::MAX);
        if max <= min {
            return min.saturating_mul(attempt);
        }

        let mut raw = [0_u8; 8];
        if OsRng.try_fill_bytes(&mut raw).is_err() {
            return min.saturating_mul(attempt);
        }
        let span = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
        let offset = u64::from_le_bytes(raw) % span.saturating_add(1).max(1);
        (min + Duration::from_nanos(offset)).saturating_mul(attempt)
    }
}

#[derive(Clone)]
pub struct RetryConfig {
    retry_max: usize,
    wait_min: Duration,
    wait_max: Duration,
    check_retry: Arc<dyn CheckRetry>,
    backoff: Arc<dyn Backoff>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryConfig")
            .field("retry_max", &self.retry_max)
            .field("wait_min", &self.wait_min)
            .field("wait_max", &self.wait_max)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_max: DEFAULT_RETRY_MAX,
            wait_min: DEFAULT_WAIT_MIN,
            wait_max: DEFAULT_WAIT_MAX,
            check_retry: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
            error_handler: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self::default().retry_max(0)
    }

    pub fn retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn wait_min(mut self, wait_min: Duration) -> Self {
        self.wait_min = wait_min;
        self
    }

    pub fn wait_max(mut self, wait_max: Duration) -> Self {
        self.wait_max = wait_max;
        self
    }

    pub fn check_retry(mut self, check_retry: Arc<dyn CheckRetry>) -> Self {
        self.check_retry = check_retry;
        self
    }

    pub fn backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    pub fn configured_retry_max(&self) -> usize {
        self.retry_max
    }

    pub fn configured_wait_min(&self) -> Duration {
        self.wait_min
    }

    pub fn configured_wait_max(&self) -> Duration {
        self.wait_max
    }
}

#[derive(Clone)]
pub struct RetryExecutor {
    inner: Arc<dyn Executor>,
    config: RetryConfig,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(inner: Arc<dyn Executor>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        context: &CallContext,
    ) -> Result<HttpResponse, Error> {
        let (parts, body) = request.into_parts();
        let body = body.into_bytes().await?;
        let method = parts.method;
        let uri = parts.uri;
        let uri_text = redact_uri_for_logs(&uri.to_string());
        let retry_max = self.config.retry_max;

        let mut attempts = 0_usize;
        let mut attempt_index = 0_usize;
        let (outcome, check) = loop {
            attempts += 1;
            let request = build_http_request(
                method.clone(),
                uri.clone(),
                parts.version,
                &parts.headers,
                RequestBody::Buffered(body.clone()),
            )?;
            info!(attempt = attempts, method = %method, uri = %uri_text, "performing request");

            let outcome = self.inner.execute(request, context).await;
            let check = self.config.check_retry.check_retry(context, outcome.as_ref());
            if let Err(error) = &outcome {
                error!(
                    attempt = attempts,
                    method = %method,
                    uri = %uri_text,
                    error = %error,
                    "request failed"
                );
            }

            let remaining = retry_max.saturating_sub(attempt_index);
            if !check.retry || remaining == 0 {
                break (outcome, check);
            }

            let last_response = match outcome {
                Ok(response) => {
                    let (response_parts, response_body) = response.into_parts();
                    if let Err(source) = drain_body(response_body, Some(RESPONSE_DRAIN_LIMIT)).await {
                        error!(error = %source, uri = %uri_text, "error reading response body");
                    }
                    Some(HttpResponse::from_parts(response_parts, empty_response_body()))
                }
                Err(_) => None,
            };

            let wait = self.config.backoff.backoff(
                self.config.wait_min,
                self.config.wait_max,
                attempt_index,
                last_response.as_ref(),
            );
            info!(
                method = %method,
                uri = %uri_text,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                remaining,
                "retrying request"
            );

            tokio::select! {
                biased;
                reason = context.done() => return Err(Error::Canceled { reason }),
                _ = sleep(wait) => {}
            }
            attempt_index += 1;
        };

        let (response, transport_error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(error) => (None, Some(error)),
        };
        let RetryCheck {
            retry,
            error: check_error,
        } = check;

        if !retry
            && check_error.is_none()
            && transport_error.is_none()
            && let Some(response) = response
        {
            return Ok(response);
        }

        let error = check_error.or(transport_error);
        if let Some(handler) = &self.config.error_handler {
            return handler.handle(response, error, attempts);
        }

        if let Some(response) = response
            && let Err(source) = drain_body(response.into_body(), Some(RESPONSE_DRAIN_LIMIT)).await
        {
            error!(error = %source, uri = %uri_text, "error reading response body");
        }

        Err(Error::RetryExhausted {
            method,
            uri: uri_text,
            attempts,
            source: error.map(Box::new),
        })
    }
}

impl Executor for RetryExecutor {
    fn execute<'a>(&'a self, request: HttpRequest, context: &'a CallContext) -> ExecuteFuture<'a> {
        let span = info_span!("nap.retry", retry_max = self.config.retry_max);
        Box::pin(self.execute_with_retry(request, context).instrument(span))
    }
}
