use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::NapResult;
use crate::body::{RequestBody, build_http_request};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::decoder::{DecodeTarget, Discard, ResponseDecoder};
use crate::error::Error;
use crate::executor::{Executor, HttpRequest};
use crate::metrics::RequestCounter;
use crate::multipart::{MultipartBody, MultipartSource};
use crate::provider::{BodyProvider, FormBody, JsonBody, RawBody, ReaderBody, UrlEncodedBody, XmlBody};
use crate::response::{DecodeSettings, Response, decode_response};
use crate::retry::RetryConfig;
use crate::util::{
    merge_query, parse_header_name, parse_header_value, redact_uri_for_logs, resolve_reference,
};

trait QueryEncode: Send + Sync {
    fn encode(&self) -> Result<String, serde_urlencoded::ser::Error>;
}

impl<T> QueryEncode for T
where
    T: Serialize + Send + Sync,
{
    fn encode(&self) -> Result<String, serde_urlencoded::ser::Error> {
        serde_urlencoded::to_string(self)
    }
}

#[derive(Clone, Debug)]
enum PendingError {
    InvalidUri(String),
    ContentType(String),
}

/// Fluent description of one HTTP call.
///
/// Setters consume and return the builder. Clone a configured builder to use
/// it as a template: clones own their headers, query structures and query
/// params, and share the (immutable) body provider.
#[derive(Clone)]
pub struct RequestBuilder {
    config: ClientConfig,
    context: CallContext,
    method: Method,
    base: Option<Url>,
    url: Option<Url>,
    pending_error: Option<PendingError>,
    headers: HeaderMap,
    query_structs: Vec<Arc<dyn QueryEncode>>,
    query_params: BTreeMap<String, String>,
    body: Option<Arc<dyn BodyProvider>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::with_config(ClientConfig::default())
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field(
                "url",
                &self.url.as_ref().map(|url| redact_uri_for_logs(url.as_str())),
            )
            .field("headers", &self.headers.len())
            .field("query_structs", &self.query_structs.len())
            .field("query_params", &self.query_params.len())
            .field("body", &self.body.is_some())
            .finish()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            context: CallContext::default(),
            method: Method::GET,
            base: None,
            url: None,
            pending_error: None,
            headers: HeaderMap::new(),
            query_structs: Vec::new(),
            query_params: BTreeMap::new(),
            body: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http_method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn call_context(&self) -> &CallContext {
        &self.context
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.config = self.config.executor(executor);
        self
    }

    pub fn auto_retry(mut self, retry: RetryConfig) -> Self {
        self.config = self.config.auto_retry(retry);
        self
    }

    pub fn response_decoder(mut self, response_decoder: ResponseDecoder) -> Self {
        self.config = self.config.response_decoder(response_decoder);
        self
    }

    pub fn success_decider<D>(mut self, success_decider: D) -> Self
    where
        D: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.config = self.config.success_decider(success_decider);
        self
    }

    pub fn request_counter(mut self, request_counter: Arc<dyn RequestCounter>) -> Self {
        self.config = self.config.request_counter(request_counter);
        self
    }

    pub fn context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn head(self, path: &str) -> Self {
        self.method(Method::HEAD, path)
    }

    pub fn get(self, path: &str) -> Self {
        self.method(Method::GET, path)
    }

    pub fn post(self, path: &str) -> Self {
        self.method(Method::POST, path)
    }

    pub fn put(self, path: &str) -> Self {
        self.method(Method::PUT, path)
    }

    pub fn patch(self, path: &str) -> Self {
        self.method(Method::PATCH, path)
    }

    pub fn delete(self, path: &str) -> Self {
        self.method(Method::DELETE, path)
    }

    pub fn options(self, path: &str) -> Self {
        self.method(Method::OPTIONS, path)
    }

    pub fn method(mut self, method: Method, path: &str) -> Self {
        self.method = method;
        self.path(path)
    }

    /// Sets the absolute URL that later paths are resolved against.
    pub fn base(mut self, base: &str) -> NapResult<Self> {
        let parsed = Url::parse(base).map_err(|_| Error::InvalidUri {
            uri: redact_uri_for_logs(base),
        })?;
        self.url = Some(parsed.clone());
        self.base = Some(parsed);
        if matches!(self.pending_error, Some(PendingError::InvalidUri(_))) {
            self.pending_error = None;
        }
        Ok(self)
    }

    /// Resolves `reference` against the base URL. Without a base the
    /// reference must be absolute and becomes the base. An unparsable
    /// reference fails the next [`request`](Self::request).
    pub fn path(mut self, reference: &str) -> Self {
        let resolved = match self.base.as_ref() {
            Some(base) => resolve_reference(base, reference),
            None => Url::parse(reference),
        };
        match resolved {
            Ok(url) => {
                if self.base.is_none() {
                    self.base = Some(url.clone());
                }
                self.url = Some(url);
                if matches!(self.pending_error, Some(PendingError::InvalidUri(_))) {
                    self.pending_error = None;
                }
            }
            Err(_) => self.pending_error = Some(PendingError::InvalidUri(reference.to_owned())),
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> NapResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn set_header(self, name: &str, value: &str) -> NapResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn set_headers<K, V, I>(self, headers: I) -> NapResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        headers
            .into_iter()
            .try_fold(self, |builder, (name, value)| {
                builder.set_header(name.as_ref(), value.as_ref())
            })
    }

    pub fn basic_auth(self, username: &str, password: &str) -> NapResult<Self> {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        self.set_header(AUTHORIZATION.as_str(), &format!("Basic {encoded}"))
    }

    pub fn bearer_auth(self, token: &str) -> NapResult<Self> {
        self.set_header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))
    }

    pub fn query_struct<T>(mut self, query: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.query_structs.push(Arc::new(query));
        debug!(
            method = %self.method,
            query_structs = self.query_structs.len(),
            "query struct added"
        );
        self
    }

    pub fn query_params<K, V, I>(mut self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_params = params
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        debug!(
            method = %self.method,
            query_params = self.query_params.len(),
            "query params replaced"
        );
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    /// Attaches `provider` and writes its content type. `None` keeps the
    /// current body.
    pub fn body_provider(mut self, provider: Option<Arc<dyn BodyProvider>>) -> Self {
        let Some(provider) = provider else {
            return self;
        };
        if let Some(content_type) = provider.content_type() {
            match HeaderValue::from_str(content_type) {
                Ok(value) => {
                    self.headers.insert(CONTENT_TYPE, value);
                    if matches!(self.pending_error, Some(PendingError::ContentType(_))) {
                        self.pending_error = None;
                    }
                }
                Err(_) => {
                    self.pending_error = Some(PendingError::ContentType(content_type.to_owned()));
                }
            }
        }
        self.body = Some(provider);
        self
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.body_provider(Some(Arc::new(RawBody::new(body))))
    }

    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        self.body_provider(Some(Arc::new(ReaderBody::new(reader))))
    }

    pub fn body_json<T>(self, payload: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body_provider(Some(Arc::new(JsonBody::new(payload))))
    }

    pub fn body_form<T>(self, payload: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body_provider(Some(Arc::new(FormBody::new(payload))))
    }

    pub fn body_url_encoded<K, V, I>(self, values: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.body_provider(Some(Arc::new(UrlEncodedBody::new(values))))
    }

    /// Multipart body of plain fields and file fields. Two empty collections
    /// keep the current body.
    pub fn body_multipart<F, S, G, T>(self, fields: F, files: G) -> Self
    where
        F: IntoIterator<Item = (String, S)>,
        S: Into<MultipartSource>,
        G: IntoIterator<Item = (String, T)>,
        T: Into<MultipartSource>,
    {
        let multipart = MultipartBody::new(fields, files);
        if multipart.is_empty() {
            return self;
        }
        self.body_provider(Some(Arc::new(multipart)))
    }

    pub fn body_xml<T>(self, payload: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.body_provider(Some(Arc::new(XmlBody::new(payload))))
    }

    fn resolved_url(&self) -> NapResult<Url> {
        match &self.pending_error {
            Some(PendingError::InvalidUri(uri)) => {
                return Err(Error::InvalidUri { uri: uri.clone() });
            }
            Some(PendingError::ContentType(value)) => {
                parse_header_value(CONTENT_TYPE.as_str(), value)?;
            }
            None => {}
        }
        let mut url = self.url.clone().ok_or_else(|| Error::InvalidUri {
            uri: String::new(),
        })?;

        let mut appended = Vec::new();
        for query in &self.query_structs {
            let encoded = query
                .encode()
                .map_err(|source| Error::SerializeQuery { source })?;
            appended.extend(
                url::form_urlencoded::parse(encoded.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned())),
            );
        }
        appended.extend(
            self.query_params
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        merge_query(&mut url, &appended);
        Ok(url)
    }

    /// Materializes the request: merges the query, encodes the body and
    /// copies the headers.
    pub fn request(&self) -> NapResult<HttpRequest> {
        let url = self.resolved_url()?;
        let uri: Uri = url.as_str().parse().map_err(|_| Error::InvalidUri {
            uri: redact_uri_for_logs(url.as_str()),
        })?;
        let body = match &self.body {
            Some(provider) => provider.body()?,
            None => Bytes::new(),
        };
        build_http_request(
            self.method.clone(),
            uri,
            Version::HTTP_11,
            &self.headers,
            RequestBody::Buffered(body),
        )
    }

    /// Sends `request` through the configured executor and decodes the
    /// response into `S` or `F`.
    pub async fn do_request<S, F>(&self, request: HttpRequest) -> NapResult<Response<S, F>>
    where
        S: DecodeTarget,
        F: DecodeTarget,
    {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let response = match self.config.executor_ref().execute(request, &self.context).await {
            Ok(response) => response,
            Err(source) => {
                error!(
                    method = %method,
                    uri = %redact_uri_for_logs(&uri.to_string()),
                    code = source.code().as_str(),
                    error = %source,
                    "request failed"
                );
                return Err(source);
            }
        };

        let settings = DecodeSettings {
            decoder: self.config.configured_response_decoder(),
            success_decider: self.config.success_decider_ref(),
            request_counter: self.config.request_counter_ref(),
        };
        decode_response(&method, &uri, response, settings).await
    }

    pub async fn receive<S, F>(&self) -> NapResult<Response<S, F>>
    where
        S: DecodeTarget,
        F: DecodeTarget,
    {
        let request = self.request()?;
        self.do_request(request).await
    }

    pub async fn receive_success<S>(&self) -> NapResult<Response<S, Discard>>
    where
        S: DecodeTarget,
    {
        self.receive::<S, Discard>().await
    }
}
