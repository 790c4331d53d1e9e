use std::io::Read;
use std::sync::{Mutex, OnceLock};

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::NapResult;
use crate::error::Error;
use crate::provider::BodyProvider;
use crate::util::lock_unpoisoned;

const BOUNDARY_BYTES: usize = 30;

/// Content of one multipart section.
pub enum MultipartSource {
    Bytes(Bytes),
    Reader(Box<dyn Read + Send>),
}

impl MultipartSource {
    pub fn reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::Reader(Box::new(reader))
    }
}

impl From<Bytes> for MultipartSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&'static str> for MultipartSource {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for MultipartSource {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<Vec<u8>> for MultipartSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

struct Parts {
    fields: Vec<(String, MultipartSource)>,
    files: Vec<(String, MultipartSource)>,
}

/// `multipart/form-data` body made of plain fields followed by file fields.
///
/// The boundary is chosen when the provider is created so the content type
/// is known before the body is built. Reader sources are read once and
/// dropped as soon as their bytes are copied.
pub struct MultipartBody {
    boundary: String,
    content_type: String,
    parts: Mutex<Option<Parts>>,
    encoded: OnceLock<Bytes>,
}

impl MultipartBody {
    pub fn new<F, S, G, T>(fields: F, files: G) -> Self
    where
        F: IntoIterator<Item = (String, S)>,
        S: Into<MultipartSource>,
        G: IntoIterator<Item = (String, T)>,
        T: Into<MultipartSource>,
    {
        Self::with_boundary(random_boundary(), fields, files)
    }

    pub(crate) fn with_boundary<F, S, G, T>(boundary: String, fields: F, files: G) -> Self
    where
        F: IntoIterator<Item = (String, S)>,
        S: Into<MultipartSource>,
        G: IntoIterator<Item = (String, T)>,
        T: Into<MultipartSource>,
    {
        let content_type = format!("multipart/form-data; boundary={boundary}");
        let parts = Parts {
            fields: fields
                .into_iter()
                .map(|(name, source)| (name, source.into()))
                .collect(),
            files: files
                .into_iter()
                .map(|(name, source)| (name, source.into()))
                .collect(),
        };
        Self {
            boundary,
            content_type,
            parts: Mutex::new(Some(parts)),
            encoded: OnceLock::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.parts)
            .as_ref()
            .is_some_and(|parts| parts.fields.is_empty() && parts.files.is_empty())
    }

    fn encode(&self, parts: Parts) -> NapResult<Bytes> {
        let mut writer = MultipartWriter::new(&self.boundary);
        for (name, source) in parts.fields {
            writer.begin_part(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                escape_quotes(&name)
            ));
            writer.copy(&name, source)?;
        }
        for (name, source) in parts.files {
            let escaped = escape_quotes(&name);
            writer.begin_part(&format!(
                "Content-Disposition: form-data; name=\"{escaped}\"; filename=\"{escaped}\"\r\nContent-Type: application/octet-stream\r\n"
            ));
            writer.copy(&name, source)?;
        }
        Ok(writer.finish())
    }
}

impl std::fmt::Debug for MultipartBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MultipartBody")
            .field("boundary", &self.boundary)
            .field("encoded", &self.encoded.get().map(Bytes::len))
            .finish()
    }
}

impl BodyProvider for MultipartBody {
    fn content_type(&self) -> Option<&str> {
        Some(&self.content_type)
    }

    fn body(&self) -> NapResult<Bytes> {
        if let Some(encoded) = self.encoded.get() {
            return Ok(encoded.clone());
        }

        let mut parts = lock_unpoisoned(&self.parts);
        if let Some(encoded) = self.encoded.get() {
            return Ok(encoded.clone());
        }
        let Some(taken) = parts.take() else {
            return Err(Error::Multipart {
                message: "multipart sources failed on an earlier build".to_owned(),
            });
        };
        let encoded = self.encode(taken)?;
        Ok(self.encoded.get_or_init(|| encoded).clone())
    }
}

struct MultipartWriter<'a> {
    boundary: &'a str,
    buffer: BytesMut,
    wrote_part: bool,
}

impl<'a> MultipartWriter<'a> {
    fn new(boundary: &'a str) -> Self {
        Self {
            boundary,
            buffer: BytesMut::new(),
            wrote_part: false,
        }
    }

    fn begin_part(&mut self, headers: &str) {
        if self.wrote_part {
            self.buffer.put_slice(b"\r\n");
        }
        self.wrote_part = true;
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"\r\n");
        self.buffer.put_slice(headers.as_bytes());
        self.buffer.put_slice(b"\r\n");
    }

    fn copy(&mut self, name: &str, source: MultipartSource) -> NapResult<()> {
        match source {
            MultipartSource::Bytes(bytes) => {
                self.buffer.put_slice(&bytes);
                Ok(())
            }
            MultipartSource::Reader(mut reader) => {
                let mut collected = Vec::new();
                reader
                    .read_to_end(&mut collected)
                    .map_err(|source| Error::Multipart {
                        message: format!("failed to read part {name}: {source}"),
                    })?;
                self.buffer.put_slice(&collected);
                Ok(())
            }
        }
    }

    fn finish(mut self) -> Bytes {
        if self.wrote_part {
            self.buffer.put_slice(b"\r\n");
        }
        self.buffer.put_slice(b"--");
        self.buffer.put_slice(self.boundary.as_bytes());
        self.buffer.put_slice(b"--\r\n");
        self.buffer.freeze()
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let mut raw = [0_u8; BOUNDARY_BYTES];
    OsRng.fill_bytes(&mut raw);
    raw.iter().map(|byte| format!("{byte:02x}")).collect()
}
