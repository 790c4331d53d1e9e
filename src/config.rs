use std::sync::Arc;

use http::StatusCode;

use crate::decoder::{ResponseDecoder, SuccessDecider, default_success_decider};
use crate::executor::{DefaultExecutor, Executor};
use crate::metrics::RequestCounter;
use crate::retry::{RetryConfig, RetryExecutor};

/// Settings shared by every request built from one client.
///
/// Built once with consuming setters and then handed to
/// [`RequestBuilder::with_config`](crate::RequestBuilder::with_config).
/// Cloning is cheap; all collaborators are reference counted.
#[derive(Clone)]
pub struct ClientConfig {
    executor: Arc<dyn Executor>,
    response_decoder: ResponseDecoder,
    success_decider: SuccessDecider,
    request_counter: Option<Arc<dyn RequestCounter>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executor: Arc::new(DefaultExecutor),
            response_decoder: ResponseDecoder::default(),
            success_decider: default_success_decider(),
            request_counter: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("response_decoder", &self.response_decoder)
            .field("request_counter", &self.request_counter.is_some())
            .finish()
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Wraps the executor configured so far in a [`RetryExecutor`].
    pub fn auto_retry(mut self, retry: RetryConfig) -> Self {
        self.executor = Arc::new(RetryExecutor::new(self.executor, retry));
        self
    }

    pub fn response_decoder(mut self, response_decoder: ResponseDecoder) -> Self {
        self.response_decoder = response_decoder;
        self
    }

    pub fn json_response_decoder(self) -> Self {
        self.response_decoder(ResponseDecoder::Json)
    }

    pub fn xml_response_decoder(self) -> Self {
        self.response_decoder(ResponseDecoder::Xml)
    }

    pub fn success_decider<D>(mut self, success_decider: D) -> Self
    where
        D: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.success_decider = Arc::new(success_decider);
        self
    }

    pub fn request_counter(mut self, request_counter: Arc<dyn RequestCounter>) -> Self {
        self.request_counter = Some(request_counter);
        self
    }

    pub(crate) fn executor_ref(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub fn configured_response_decoder(&self) -> ResponseDecoder {
        self.response_decoder
    }

    pub(crate) fn success_decider_ref(&self) -> &SuccessDecider {
        &self.success_decider
    }

    pub(crate) fn request_counter_ref(&self) -> Option<&dyn RequestCounter> {
        self.request_counter.as_deref()
    }
}
