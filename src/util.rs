use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Mutex;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::HeaderMap;
use url::Url;

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn resolve_reference(base: &Url, reference: &str) -> Result<Url, url::ParseError> {
    let is_relative_path = !reference.is_empty()
        && !reference.starts_with('/')
        && !reference.starts_with('?')
        && !reference.starts_with('#')
        && Url::parse(reference).is_err();

    let mut resolved = if is_relative_path && !base.path().ends_with('/') {
        let mut directory = base.clone();
        directory.set_query(None);
        directory.set_fragment(None);
        let path = format!("{}/", directory.path());
        directory.set_path(&path);
        directory.join(reference)?
    } else {
        base.join(reference)?
    };

    if reference.ends_with('/') && !resolved.path().ends_with('/') {
        let path = format!("{}/", resolved.path());
        resolved.set_path(&path);
    }
    Ok(resolved)
}

pub(crate) fn merge_query(url: &mut Url, appended: &[(String, String)]) {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        merged
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    for (name, value) in appended {
        merged.entry(name.clone()).or_default().push(value.clone());
    }

    if merged.is_empty() {
        url.set_query(None);
        return;
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, values) in &merged {
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    let query = serializer.finish();
    url.set_query(Some(&query));
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse()
        .map_err(|source| Error::InvalidHeaderName {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value
        .parse()
        .map_err(|source| Error::InvalidHeaderValue {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let seconds = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

pub(crate) fn classify_transport_error(error: &(dyn StdError + 'static)) -> TransportErrorKind {
    let mut text = String::new();
    let mut current = Some(error);
    while let Some(item) = current {
        text.push_str(&item.to_string().to_ascii_lowercase());
        text.push(' ');
        current = item.source();
    }

    if text.contains("certificate") || text.contains("unknownissuer") || text.contains("unknown issuer") {
        return TransportErrorKind::Certificate;
    }
    if text.contains("tls") || text.contains("handshake") {
        return TransportErrorKind::Tls;
    }
    if text.contains("dns")
        || text.contains("name or service not known")
        || text.contains("failed to lookup address")
    {
        return TransportErrorKind::Dns;
    }
    if text.contains("connect") || text.contains("connection refused") {
        return TransportErrorKind::Connect;
    }
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("incomplete message")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
