use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;
use url::Url;

#[cfg(feature = "tls-rustls-ring")]
use hyper_rustls::HttpsConnectorBuilder;

use crate::NapResult;
use crate::body::{RESPONSE_DRAIN_LIMIT, drain_body};
use crate::context::CallContext;
use crate::error::{BoxError, Error, TransportErrorKind};
use crate::executor::{ExecuteFuture, Executor, HttpRequest, HttpResponse};
use crate::util::{classify_transport_error, redact_uri_for_logs};

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    NativeTls,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "tls-rustls-ring",
            Self::NativeTls => "tls-native",
        }
    }
}

#[cfg(feature = "tls-rustls-ring")]
const fn default_tls_backend() -> TlsBackend {
    TlsBackend::RustlsRing
}

#[cfg(not(feature = "tls-rustls-ring"))]
const fn default_tls_backend() -> TlsBackend {
    TlsBackend::NativeTls
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectPolicy {
    enabled: bool,
    max_redirects: usize,
}

impl RedirectPolicy {
    pub const fn none() -> Self {
        Self {
            enabled: false,
            max_redirects: 0,
        }
    }

    pub const fn limited(max_redirects: usize) -> Self {
        Self {
            enabled: true,
            max_redirects,
        }
    }

    pub const fn follow() -> Self {
        Self::limited(10)
    }

    pub const fn enabled(self) -> bool {
        self.enabled
    }

    pub const fn max_redirects(self) -> usize {
        if self.enabled { self.max_redirects } else { 0 }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::follow()
    }
}

type TransportBody = Full<Bytes>;

#[cfg(feature = "tls-rustls-ring")]
type RustlsHyperClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, TransportBody>;

#[cfg(feature = "tls-native")]
type NativeHyperClient = Client<hyper_tls::HttpsConnector<HttpConnector>, TransportBody>;

#[derive(Clone)]
enum TransportClient {
    #[cfg(feature = "tls-rustls-ring")]
    Rustls(RustlsHyperClient),
    #[cfg(feature = "tls-native")]
    Native(NativeHyperClient),
}

impl TransportClient {
    async fn request(
        &self,
        request: Request<TransportBody>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        match self {
            #[cfg(feature = "tls-rustls-ring")]
            Self::Rustls(client) => client.request(request).await,
            #[cfg(feature = "tls-native")]
            Self::Native(client) => client.request(request).await,
        }
    }
}

fn http_connector(connect_timeout: Option<Duration>) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector.set_connect_timeout(connect_timeout);
    connector
}

#[cfg(feature = "tls-rustls-ring")]
fn build_rustls_ring_transport(builder: &HyperExecutorBuilder) -> NapResult<TransportClient> {
    let https = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|source| Error::Transport {
            kind: TransportErrorKind::Tls,
            method: Method::GET,
            uri: TlsBackend::RustlsRing.as_str().to_owned(),
            source: Box::new(source),
        })?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http_connector(builder.connect_timeout));
    let transport = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(builder.pool_idle_timeout)
        .pool_max_idle_per_host(builder.pool_max_idle_per_host)
        .build(https);
    Ok(TransportClient::Rustls(transport))
}

#[cfg(not(feature = "tls-rustls-ring"))]
fn build_rustls_ring_transport(_builder: &HyperExecutorBuilder) -> NapResult<TransportClient> {
    Err(backend_unavailable(TlsBackend::RustlsRing))
}

#[cfg(feature = "tls-native")]
fn build_native_tls_transport(builder: &HyperExecutorBuilder) -> NapResult<TransportClient> {
    let https = hyper_tls::HttpsConnector::new_with_connector(http_connector(builder.connect_timeout));
    let transport = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(builder.pool_idle_timeout)
        .pool_max_idle_per_host(builder.pool_max_idle_per_host)
        .build(https);
    Ok(TransportClient::Native(transport))
}

#[cfg(not(feature = "tls-native"))]
fn build_native_tls_transport(_builder: &HyperExecutorBuilder) -> NapResult<TransportClient> {
    Err(backend_unavailable(TlsBackend::NativeTls))
}

#[cfg(any(not(feature = "tls-rustls-ring"), not(feature = "tls-native")))]
fn backend_unavailable(backend: TlsBackend) -> Error {
    Error::Transport {
        kind: TransportErrorKind::Tls,
        method: Method::GET,
        uri: backend.as_str().to_owned(),
        source: format!("tls backend {} is not enabled in this build", backend.as_str()).into(),
    }
}

#[derive(Clone, Debug)]
pub struct HyperExecutorBuilder {
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    connect_timeout: Option<Duration>,
    redirect_policy: RedirectPolicy,
    tls_backend: TlsBackend,
}

impl Default for HyperExecutorBuilder {
    fn default() -> Self {
        Self {
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            connect_timeout: None,
            redirect_policy: RedirectPolicy::default(),
            tls_backend: default_tls_backend(),
        }
    }
}

impl HyperExecutorBuilder {
    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn redirect_policy(mut self, redirect_policy: RedirectPolicy) -> Self {
        self.redirect_policy = redirect_policy;
        self
    }

    pub fn tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = tls_backend;
        self
    }

    pub fn build(self) -> NapResult<HyperExecutor> {
        let client = match self.tls_backend {
            TlsBackend::RustlsRing => build_rustls_ring_transport(&self)?,
            TlsBackend::NativeTls => build_native_tls_transport(&self)?,
        };
        Ok(HyperExecutor {
            client,
            redirect_policy: self.redirect_policy,
        })
    }
}

/// [`Executor`] backed by a pooled hyper client.
///
/// Follows redirects according to its [`RedirectPolicy`] and rejects any
/// scheme other than `http` and `https` before touching the network.
#[derive(Clone)]
pub struct HyperExecutor {
    client: TransportClient,
    redirect_policy: RedirectPolicy,
}

impl std::fmt::Debug for HyperExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperExecutor")
            .field("redirect_policy", &self.redirect_policy)
            .finish()
    }
}

impl HyperExecutor {
    pub fn builder() -> HyperExecutorBuilder {
        HyperExecutorBuilder::default()
    }

    pub fn new() -> NapResult<Self> {
        Self::builder().build()
    }

    async fn send_following_redirects(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let (parts, body) = request.into_parts();
        let mut method = parts.method;
        let mut uri = parts.uri;
        let mut headers = parts.headers;
        let version = parts.version;
        let mut body = body.into_bytes().await?;
        let mut redirects = 0_usize;

        loop {
            let uri_text = redact_uri_for_logs(&uri.to_string());
            ensure_supported_scheme(&method, &uri, &uri_text)?;

            let mut request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .version(version)
                .body(Full::new(body.clone()))
                .map_err(|source| Error::RequestBuild { source })?;
            *request.headers_mut() = headers.clone();

            let response = self
                .client
                .request(request)
                .await
                .map_err(|source| Error::Transport {
                    kind: classify_transport_error(&source),
                    method: method.clone(),
                    uri: uri_text.clone(),
                    source: Box::new(source),
                })?;

            let status = response.status();
            let location = redirect_location(status, response.headers());
            let Some(location) = location.filter(|_| self.redirect_policy.enabled()) else {
                return Ok(response.map(|incoming| {
                    incoming
                        .map_err(|error| Box::new(error) as BoxError)
                        .boxed_unsync()
                }));
            };

            if redirects >= self.redirect_policy.max_redirects() {
                return Err(Error::Transport {
                    kind: TransportErrorKind::RedirectLimit,
                    method,
                    uri: uri_text,
                    source: format!("stopped after {redirects} redirects").into(),
                });
            }
            redirects += 1;

            let next = resolve_location(&uri, &location).ok_or_else(|| Error::Transport {
                kind: TransportErrorKind::Other,
                method: method.clone(),
                uri: uri_text.clone(),
                source: format!("failed to parse Location header {location:?}").into(),
            })?;

            let incoming = response
                .into_body()
                .map_err(|error| Box::new(error) as BoxError)
                .boxed_unsync();
            if let Err(error) = drain_body(incoming, Some(RESPONSE_DRAIN_LIMIT)).await {
                debug!(error = %error, "failed to drain redirect response body");
            }

            if rewrites_to_get(status, &method) {
                method = Method::GET;
                body = Bytes::new();
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next.host() != uri.host() {
                headers.remove(AUTHORIZATION);
                headers.remove(PROXY_AUTHORIZATION);
                headers.remove(COOKIE);
            }
            debug!(
                status = status.as_u16(),
                location = %redact_uri_for_logs(&next.to_string()),
                redirects,
                "following redirect"
            );
            uri = next;
        }
    }
}

impl Executor for HyperExecutor {
    fn execute<'a>(&'a self, request: HttpRequest, context: &'a CallContext) -> ExecuteFuture<'a> {
        Box::pin(async move {
            if let Some(reason) = context.err() {
                return Err(Error::Canceled { reason });
            }
            tokio::select! {
                biased;
                reason = context.done() => Err(Error::Canceled { reason }),
                result = self.send_following_redirects(request) => result,
            }
        })
    }
}

fn ensure_supported_scheme(method: &Method, uri: &Uri, uri_text: &str) -> Result<(), Error> {
    match uri.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
            Ok(())
        }
        other => Err(Error::Transport {
            kind: TransportErrorKind::UnsupportedScheme,
            method: method.clone(),
            uri: uri_text.to_owned(),
            source: format!("unsupported protocol scheme {:?}", other.unwrap_or_default()).into(),
        }),
    }
}

fn redirect_location(status: StatusCode, headers: &HeaderMap) -> Option<String> {
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    headers
        .get(LOCATION)?
        .to_str()
        .ok()
        .map(ToOwned::to_owned)
}

fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    let base = Url::parse(&current.to_string()).ok()?;
    let next = base.join(location).ok()?;
    next.as_str().parse().ok()
}

fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303) && *method != Method::GET && *method != Method::HEAD
}

static DEFAULT_EXECUTOR: OnceLock<Arc<HyperExecutor>> = OnceLock::new();

/// Shared executor used when a client is not given one explicitly.
///
/// Pooled connections belong to the tokio runtime that opened them; programs
/// running several runtimes should give each its own [`HyperExecutor`].
pub fn default_executor() -> NapResult<Arc<HyperExecutor>> {
    if let Some(executor) = DEFAULT_EXECUTOR.get() {
        return Ok(Arc::clone(executor));
    }
    let built = Arc::new(HyperExecutor::new()?);
    Ok(Arc::clone(DEFAULT_EXECUTOR.get_or_init(|| built)))
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};

    use super::{RedirectPolicy, ensure_supported_scheme, resolve_location, rewrites_to_get};
    use crate::error::TransportErrorKind;

    #[test]
    fn redirect_policy_limits() {
        assert_eq!(RedirectPolicy::default().max_redirects(), 10);
        assert_eq!(RedirectPolicy::none().max_redirects(), 0);
        assert!(!RedirectPolicy::none().enabled());
        assert_eq!(RedirectPolicy::limited(3).max_redirects(), 3);
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let uri: Uri = "ftp://files.example.com/a".parse().expect("uri");
        let error = ensure_supported_scheme(&Method::GET, &uri, "ftp://files.example.com/a")
            .expect_err("ftp should be rejected");
        assert_eq!(
            error.transport_kind(),
            Some(TransportErrorKind::UnsupportedScheme)
        );
        assert!(error.to_string().contains("unsupported protocol scheme"));
    }

    #[test]
    fn location_resolves_relative_to_current_uri() {
        let current: Uri = "http://api.example.com/v1/items?page=2".parse().expect("uri");
        let next = resolve_location(&current, "../v2/items").expect("location");
        assert_eq!(next.to_string(), "http://api.example.com/v2/items");
    }

    #[test]
    fn see_other_rewrites_post_to_get_but_keeps_head() {
        assert!(rewrites_to_get(StatusCode::SEE_OTHER, &Method::POST));
        assert!(!rewrites_to_get(StatusCode::SEE_OTHER, &Method::HEAD));
        assert!(!rewrites_to_get(StatusCode::TEMPORARY_REDIRECT, &Method::POST));
    }
}
