use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Certificate,
    Read,
    RedirectLimit,
    UnsupportedScheme,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Certificate => "certificate",
            Self::Read => "read",
            Self::RedirectLimit => "redirect_limit",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Why a call stopped waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    Canceled,
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Canceled => "call canceled",
            Self::DeadlineExceeded => "call deadline exceeded",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    SerializeJson,
    SerializeQuery,
    SerializeForm,
    SerializeXml,
    Multipart,
    ReadRequestBody,
    RequestBuild,
    InvalidHeaderName,
    InvalidHeaderValue,
    Transport,
    Canceled,
    ReadBody,
    Decode,
    UnexpectedStatus,
    RetryExhausted,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::SerializeJson => "serialize_json",
            Self::SerializeQuery => "serialize_query",
            Self::SerializeForm => "serialize_form",
            Self::SerializeXml => "serialize_xml",
            Self::Multipart => "multipart",
            Self::ReadRequestBody => "read_request_body",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Transport => "transport",
            Self::Canceled => "canceled",
            Self::ReadBody => "read_body",
            Self::Decode => "decode",
            Self::UnexpectedStatus => "unexpected_status",
            Self::RetryExhausted => "retry_exhausted",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request query: {source}")]
    SerializeQuery {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to serialize request xml: {source}")]
    SerializeXml {
        #[source]
        source: BoxError,
    },
    #[error("failed to write multipart body: {message}")]
    Multipart { message: String },
    #[error("failed to read request body: {source}")]
    ReadRequestBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("{reason}")]
    Canceled { reason: CancelReason },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response {format}: {source}; body={body}")]
    Decode {
        format: &'static str,
        #[source]
        source: BoxError,
        body: String,
    },
    #[error("unexpected http status {status}")]
    UnexpectedStatus { status: http::StatusCode },
    #[error("{method} {uri} giving up after {attempts} attempt(s)")]
    RetryExhausted {
        method: Method,
        uri: String,
        attempts: usize,
        #[source]
        source: Option<Box<Error>>,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeQuery { .. } => ErrorCode::SerializeQuery,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::SerializeXml { .. } => ErrorCode::SerializeXml,
            Self::Multipart { .. } => ErrorCode::Multipart,
            Self::ReadRequestBody { .. } => ErrorCode::ReadRequestBody,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Canceled { .. } => ErrorCode::Canceled,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::UnexpectedStatus { .. } => ErrorCode::UnexpectedStatus,
            Self::RetryExhausted { .. } => ErrorCode::RetryExhausted,
        }
    }

    /// True for errors raised while describing the request, before anything
    /// reached a transport.
    pub const fn is_construction(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::SerializeJson { .. }
                | Self::SerializeQuery { .. }
                | Self::SerializeForm { .. }
                | Self::SerializeXml { .. }
                | Self::Multipart { .. }
                | Self::ReadRequestBody { .. }
                | Self::RequestBuild { .. }
                | Self::InvalidHeaderName { .. }
                | Self::InvalidHeaderValue { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Canceled { .. } => true,
            Self::RetryExhausted {
                source: Some(source),
                ..
            } => source.is_cancellation(),
            _ => false,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            Self::RetryExhausted {
                source: Some(source),
                ..
            } => source.transport_kind(),
            _ => None,
        }
    }

    /// Number of attempts a retrying executor made before giving up.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelReason, Error, ErrorCode, TransportErrorKind};
    use http::Method;

    #[test]
    fn retry_exhausted_exposes_attempts_and_inner_kind() {
        let error = Error::RetryExhausted {
            method: Method::GET,
            uri: "https://api.example.com/v1".to_owned(),
            attempts: 5,
            source: Some(Box::new(Error::Transport {
                kind: TransportErrorKind::Connect,
                method: Method::GET,
                uri: "https://api.example.com/v1".to_owned(),
                source: "connection refused".into(),
            })),
        };

        assert_eq!(error.code(), ErrorCode::RetryExhausted);
        assert_eq!(error.attempts(), Some(5));
        assert_eq!(error.transport_kind(), Some(TransportErrorKind::Connect));
        assert_eq!(
            error.to_string(),
            "GET https://api.example.com/v1 giving up after 5 attempt(s)"
        );
    }

    #[test]
    fn cancellation_is_detected_through_retry_wrapper() {
        let error = Error::RetryExhausted {
            method: Method::GET,
            uri: "https://api.example.com".to_owned(),
            attempts: 1,
            source: Some(Box::new(Error::Canceled {
                reason: CancelReason::DeadlineExceeded,
            })),
        };
        assert!(error.is_cancellation());
        assert!(!error.is_construction());
    }
}
