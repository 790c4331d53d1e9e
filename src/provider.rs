use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Mutex, OnceLock};

use bytes::Bytes;
use serde::Serialize;

use crate::NapResult;
use crate::error::Error;
use crate::util::lock_unpoisoned;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub(crate) const XML_CONTENT_TYPE: &str = "text/xml";

pub trait BodyProvider: Send + Sync {
    fn content_type(&self) -> Option<&str>;

    fn body(&self) -> NapResult<Bytes>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyBody;

impl BodyProvider for EmptyBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn body(&self) -> NapResult<Bytes> {
        Ok(Bytes::new())
    }
}

#[derive(Clone, Debug)]
pub struct RawBody(Bytes);

impl RawBody {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self(body.into())
    }
}

impl BodyProvider for RawBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn body(&self) -> NapResult<Bytes> {
        Ok(self.0.clone())
    }
}

/// Wraps a one-shot reader. The reader is consumed the first time the body
/// is built and dropped right after; later builds replay the captured bytes.
pub struct ReaderBody {
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    buffered: OnceLock<Bytes>,
}

impl ReaderBody {
    pub fn new<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            buffered: OnceLock::new(),
        }
    }
}

impl std::fmt::Debug for ReaderBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReaderBody")
            .field("buffered", &self.buffered.get().map(Bytes::len))
            .finish()
    }
}

impl BodyProvider for ReaderBody {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn body(&self) -> NapResult<Bytes> {
        if let Some(buffered) = self.buffered.get() {
            return Ok(buffered.clone());
        }

        let mut reader = lock_unpoisoned(&self.reader);
        // another builder may have filled the buffer while we waited
        if let Some(buffered) = self.buffered.get() {
            return Ok(buffered.clone());
        }
        let Some(mut source) = reader.take() else {
            return Err(Error::ReadRequestBody {
                source: "request body reader failed on an earlier build".into(),
            });
        };
        let mut collected = Vec::new();
        source
            .read_to_end(&mut collected)
            .map_err(|source| Error::ReadRequestBody {
                source: Box::new(source),
            })?;
        drop(source);
        Ok(self.buffered.get_or_init(|| Bytes::from(collected)).clone())
    }
}

#[derive(Clone, Debug)]
pub struct JsonBody<T> {
    payload: T,
}

impl<T> JsonBody<T> {
    pub fn new(payload: T) -> Self {
        Self { payload }
    }
}

impl<T> BodyProvider for JsonBody<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> Option<&str> {
        Some(JSON_CONTENT_TYPE)
    }

    fn body(&self) -> NapResult<Bytes> {
        serde_json::to_vec(&self.payload)
            .map(Bytes::from)
            .map_err(|source| Error::SerializeJson { source })
    }
}

#[derive(Clone, Debug)]
pub struct FormBody<T> {
    payload: T,
}

impl<T> FormBody<T> {
    pub fn new(payload: T) -> Self {
        Self { payload }
    }
}

impl<T> BodyProvider for FormBody<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> Option<&str> {
        Some(FORM_CONTENT_TYPE)
    }

    fn body(&self) -> NapResult<Bytes> {
        serde_urlencoded::to_string(&self.payload)
            .map(Bytes::from)
            .map_err(|source| Error::SerializeForm { source })
    }
}

#[derive(Clone, Debug, Default)]
pub struct UrlEncodedBody {
    values: BTreeMap<String, String>,
}

impl UrlEncodedBody {
    pub fn new<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl BodyProvider for UrlEncodedBody {
    fn content_type(&self) -> Option<&str> {
        Some(FORM_CONTENT_TYPE)
    }

    fn body(&self) -> NapResult<Bytes> {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.values {
            serializer.append_pair(name, value);
        }
        Ok(Bytes::from(serializer.finish()))
    }
}

/// XML-encodes `payload` with two-space indentation as `text/xml`. The root
/// element is named after the payload type.
#[derive(Clone, Debug)]
pub struct XmlBody<T> {
    payload: T,
}

impl<T> XmlBody<T> {
    pub fn new(payload: T) -> Self {
        Self { payload }
    }
}

impl<T> BodyProvider for XmlBody<T>
where
    T: Serialize + Send + Sync,
{
    fn content_type(&self) -> Option<&str> {
        Some(XML_CONTENT_TYPE)
    }

    fn body(&self) -> NapResult<Bytes> {
        let mut buffer = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut buffer);
        serializer.indent(' ', 2);
        self.payload
            .serialize(serializer)
            .map_err(|source| Error::SerializeXml {
                source: Box::new(source),
            })?;
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use bytes::Bytes;
    use serde::Serialize;

    use super::{
        BodyProvider, EmptyBody, FormBody, JsonBody, RawBody, ReaderBody, UrlEncodedBody, XmlBody,
    };
    use crate::ErrorCode;

    #[derive(Serialize)]
    struct Note {
        text: String,
        favorite_count: i64,
    }

    #[test]
    fn json_body_encodes_payload_with_json_content_type() {
        let provider = JsonBody::new(Note {
            text: "note".to_owned(),
            favorite_count: 12,
        });
        assert_eq!(provider.content_type(), Some("application/json"));
        assert_eq!(
            provider.body().expect("json should encode"),
            Bytes::from_static(br#"{"text":"note","favorite_count":12}"#)
        );
    }

    #[test]
    fn json_body_reports_unsupported_map_keys() {
        let mut payload = BTreeMap::new();
        payload.insert((1_u8, 2_u8), "pair");
        let error = JsonBody::new(payload)
            .body()
            .expect_err("tuple keys cannot be json object keys");
        assert_eq!(error.code(), ErrorCode::SerializeJson);
    }

    #[test]
    fn form_body_keeps_field_order() {
        #[derive(Serialize)]
        struct Params {
            kind_name: &'static str,
            count: u32,
        }
        let provider = FormBody::new(Params {
            kind_name: "recent",
            count: 25,
        });
        assert_eq!(
            provider.content_type(),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            provider.body().expect("form should encode"),
            Bytes::from_static(b"kind_name=recent&count=25")
        );
    }

    #[test]
    fn url_encoded_body_sorts_keys_and_escapes_values() {
        let provider = UrlEncodedBody::new([("b", "two words"), ("a", "x&y")]);
        assert_eq!(
            provider.body().expect("map should encode"),
            Bytes::from_static(b"a=x%26y&b=two+words")
        );
    }

    #[test]
    fn xml_body_is_indented_under_type_root() {
        #[derive(Serialize)]
        struct Model {
            text: String,
        }
        let provider = XmlBody::new(Model {
            text: "note".to_owned(),
        });
        let body = provider.body().expect("xml should encode");
        let text = std::str::from_utf8(&body).expect("xml is utf-8");
        assert_eq!(provider.content_type(), Some("text/xml"));
        assert!(text.starts_with("<Model>"), "unexpected xml: {text}");
        assert!(text.contains("\n  <text>note</text>"), "unexpected xml: {text}");
    }

    #[test]
    fn reader_body_replays_bytes_after_first_read() {
        let provider = ReaderBody::new(Cursor::new(b"one-shot".to_vec()));
        let first = provider.body().expect("first read");
        let second = provider.body().expect("replay");
        assert_eq!(first, Bytes::from_static(b"one-shot"));
        assert_eq!(first, second);
        assert_eq!(provider.content_type(), None);
    }

    #[test]
    fn raw_and_empty_bodies_have_no_content_type() {
        assert_eq!(RawBody::new("abc").content_type(), None);
        assert_eq!(EmptyBody.content_type(), None);
        assert!(EmptyBody.body().expect("empty body").is_empty());
    }
}
