use std::convert::Infallible;
use std::error::Error as StdError;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use http::{HeaderMap, Method, Request, Uri, Version};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;

use crate::error::{BoxError, Error};

pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;
pub(crate) type StreamingBody = UnsyncBoxBody<Bytes, BoxError>;

/// Upper bound read from a response that is being discarded before a retry.
pub(crate) const RESPONSE_DRAIN_LIMIT: usize = 4096;

/// Body of a request handed to an [`Executor`](crate::Executor).
///
/// Requests produced by [`RequestBuilder`](crate::RequestBuilder) are always
/// buffered. Streaming bodies are accepted from callers that construct
/// requests by hand; retrying executors buffer them once before the first
/// attempt.
pub enum RequestBody {
    Buffered(Bytes),
    Streaming(StreamingBody),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Buffered(Bytes::new())
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        Self::Streaming(BodyExt::boxed_unsync(StreamBody::new(stream.map(|item| {
            item.map(Frame::data)
                .map_err(|error| Box::new(error) as BoxError)
        }))))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            Self::Streaming(_) => None,
        }
    }

    /// Collects the body into memory. Buffered bodies are returned as is.
    pub async fn into_bytes(self) -> Result<Bytes, Error> {
        match self {
            Self::Buffered(bytes) => Ok(bytes),
            Self::Streaming(body) => body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .map_err(|source| Error::ReadRequestBody { source }),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(bytes) => formatter
                .debug_tuple("Buffered")
                .field(&bytes.len())
                .finish(),
            Self::Streaming(_) => formatter.write_str("Streaming"),
        }
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

pub fn full_response_body(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}

pub fn empty_response_body() -> ResponseBody {
    full_response_body(Bytes::new())
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    version: Version,
    headers: &HeaderMap,
    body: RequestBody,
) -> Result<Request<RequestBody>, Error> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .body(body)
        .map_err(|source| Error::RequestBuild { source })?;
    *request.headers_mut() = headers.clone();
    Ok(request)
}

/// Reads the whole body. Reaching the end of the body is what lets the
/// transport hand its connection back to the pool.
pub(crate) async fn read_all_body(mut body: ResponseBody) -> Result<Bytes, BoxError> {
    let mut collected = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(data) = frame.data_ref() {
            collected.extend_from_slice(data);
        }
    }
    Ok(collected.freeze())
}

/// Reads and discards up to `limit` bytes, or the whole body when `limit` is
/// `None`. The body is dropped afterwards either way.
pub(crate) async fn drain_body(mut body: ResponseBody, limit: Option<usize>) -> Result<usize, BoxError> {
    let mut drained = 0_usize;
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(data) = frame.data_ref() {
            drained = drained.saturating_add(data.len());
        }
        if limit.is_some_and(|limit| drained >= limit) {
            break;
        }
    }
    Ok(drained)
}
