use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{info, warn};

use crate::NapResult;
use crate::body::{drain_body, read_all_body};
use crate::decoder::{DecodeTarget, ResponseDecoder, SuccessDecider};
use crate::error::Error;
use crate::executor::HttpResponse;
use crate::metrics::{RequestCounter, RequestLabels};
use crate::util::redact_uri_for_logs;

/// Which decode path a response took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<S, F> {
    /// `204 No Content`; nothing was decoded.
    NoContent,
    Success(S),
    Failure(F),
}

/// Status, headers and decoded body of a completed call.
#[derive(Clone, Debug)]
pub struct Response<S, F> {
    status: StatusCode,
    headers: HeaderMap,
    outcome: Outcome<S, F>,
}

impl<S, F> Response<S, F> {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn outcome(&self) -> &Outcome<S, F> {
        &self.outcome
    }

    pub fn into_outcome(self) -> Outcome<S, F> {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn success(&self) -> Option<&S> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&F> {
        match &self.outcome {
            Outcome::Failure(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_success(self) -> Option<S> {
        match self.outcome {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_failure(self) -> Option<F> {
        match self.outcome {
            Outcome::Failure(value) => Some(value),
            _ => None,
        }
    }
}

pub(crate) struct DecodeSettings<'a> {
    pub(crate) decoder: ResponseDecoder,
    pub(crate) success_decider: &'a SuccessDecider,
    pub(crate) request_counter: Option<&'a dyn RequestCounter>,
}

/// Reads the response to the end and decodes it into the target picked by
/// the success decider. The body is consumed on every path.
pub(crate) async fn decode_response<S, F>(
    method: &Method,
    uri: &Uri,
    response: HttpResponse,
    settings: DecodeSettings<'_>,
) -> NapResult<Response<S, F>>
where
    S: DecodeTarget,
    F: DecodeTarget,
{
    let (parts, body) = response.into_parts();
    let status = parts.status;
    if let Some(counter) = settings.request_counter {
        counter.increment(&RequestLabels::new(method, uri, status));
    }

    if status == StatusCode::NO_CONTENT {
        drain_body(body, None)
            .await
            .map_err(|source| Error::ReadBody { source })?;
        return Ok(Response {
            status,
            headers: parts.headers,
            outcome: Outcome::NoContent,
        });
    }

    let bytes = read_all_body(body)
        .await
        .map_err(|source| Error::ReadBody { source })?;
    let uri_text = redact_uri_for_logs(&uri.to_string());

    let outcome = if (settings.success_decider)(status) {
        info!(
            method = %method,
            uri = %uri_text,
            status = status.as_u16(),
            decoder = settings.decoder.as_str(),
            "decoding success response"
        );
        Outcome::Success(S::decode(settings.decoder, bytes)?)
    } else {
        warn!(
            method = %method,
            uri = %uri_text,
            status = status.as_u16(),
            decoder = settings.decoder.as_str(),
            "decoding failure response"
        );
        Outcome::Failure(F::decode(settings.decoder, bytes)?)
    };

    Ok(Response {
        status,
        headers: parts.headers,
        outcome,
    })
}
