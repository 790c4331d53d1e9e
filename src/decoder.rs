use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

use crate::NapResult;
use crate::error::{BoxError, Error};
use crate::util::truncate_body;

/// Format used to decode response bodies into typed targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseDecoder {
    #[default]
    Json,
    Xml,
}

impl ResponseDecoder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }

    pub fn decode<T>(self, body: &Bytes) -> NapResult<T>
    where
        T: DeserializeOwned,
    {
        let decoded: Result<T, BoxError> = match self {
            Self::Json => {
                serde_json::from_slice(body).map_err(|source| Box::new(source) as BoxError)
            }
            Self::Xml => quick_xml::de::from_reader(body.as_ref())
                .map_err(|source| Box::new(source) as BoxError),
        };
        decoded.map_err(|source| Error::Decode {
            format: self.as_str(),
            source,
            body: truncate_body(body),
        })
    }
}

/// Chooses between the success and failure decode paths.
pub type SuccessDecider = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

pub fn decode_on_success(status: StatusCode) -> bool {
    (200..=299).contains(&status.as_u16())
}

pub(crate) fn default_success_decider() -> SuccessDecider {
    Arc::new(decode_on_success)
}

/// What to do with a response body on one of the two decode paths.
///
/// Implemented by [`Decoded`] (structured decode with the configured
/// [`ResponseDecoder`]), [`Raw`] (verbatim bytes) and [`Discard`] (read and
/// drop).
pub trait DecodeTarget: Sized + Send {
    fn decode(decoder: ResponseDecoder, body: Bytes) -> NapResult<Self>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded<T>(pub T);

impl<T> Decoded<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> DecodeTarget for Decoded<T>
where
    T: DeserializeOwned + Send,
{
    fn decode(decoder: ResponseDecoder, body: Bytes) -> NapResult<Self> {
        decoder.decode(&body).map(Decoded)
    }
}

/// Captures the body verbatim instead of decoding it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Raw(pub Bytes);

impl Raw {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl DecodeTarget for Raw {
    fn decode(_decoder: ResponseDecoder, body: Bytes) -> NapResult<Self> {
        Ok(Raw(body))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Discard;

impl DecodeTarget for Discard {
    fn decode(_decoder: ResponseDecoder, _body: Bytes) -> NapResult<Self> {
        Ok(Discard)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use serde::Deserialize;

    use super::{DecodeTarget, Decoded, Discard, Raw, ResponseDecoder, decode_on_success};
    use crate::ErrorCode;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Model {
        text: String,
        favorite_count: i64,
    }

    #[test]
    fn default_success_decider_accepts_only_2xx() {
        for code in [200_u16, 201, 204, 299] {
            assert!(decode_on_success(StatusCode::from_u16(code).expect("status")));
        }
        for code in [100_u16, 199, 300, 302, 404, 500] {
            assert!(!decode_on_success(StatusCode::from_u16(code).expect("status")));
        }
    }

    #[test]
    fn json_and_xml_decoders_fill_the_same_target() {
        let json = Bytes::from_static(br#"{"text":"note","favorite_count":12}"#);
        let xml = Bytes::from_static(
            b"<Model><text>note</text><favorite_count>12</favorite_count></Model>",
        );
        let expected = Model {
            text: "note".to_owned(),
            favorite_count: 12,
        };

        let from_json = Decoded::<Model>::decode(ResponseDecoder::Json, json).expect("json");
        let from_xml = Decoded::<Model>::decode(ResponseDecoder::Xml, xml).expect("xml");
        assert_eq!(from_json.into_inner(), expected);
        assert_eq!(from_xml.0, expected);
    }

    #[test]
    fn decode_mismatch_reports_format_and_body() {
        let error = Decoded::<Model>::decode(ResponseDecoder::Json, Bytes::from_static(b"[1,2]"))
            .expect_err("array cannot decode into struct");
        assert_eq!(error.code(), ErrorCode::Decode);
        assert!(error.to_string().contains("json"));
        assert!(error.to_string().contains("body=[1,2]"));
    }

    #[test]
    fn raw_and_discard_accept_anything() {
        let body = Bytes::from_static(b"not json at all");
        let raw = Raw::decode(ResponseDecoder::Json, body.clone()).expect("raw");
        assert_eq!(raw.0, body);
        assert_eq!(raw.text_lossy(), "not json at all");
        assert_eq!(
            Discard::decode(ResponseDecoder::Xml, body).expect("discard"),
            Discard
        );
    }
}
