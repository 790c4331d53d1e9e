use std::collections::BTreeMap;
use std::sync::Mutex;

use http::{Method, StatusCode, Uri};

use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestLabels {
    pub method: String,
    pub host: String,
    pub path: String,
    pub status: u16,
}

impl RequestLabels {
    pub(crate) fn new(method: &Method, uri: &Uri, status: StatusCode) -> Self {
        Self {
            method: method.as_str().to_owned(),
            host: uri.host().unwrap_or_default().to_owned(),
            path: uri.path().to_owned(),
            status: status.as_u16(),
        }
    }
}

/// Sink for per-response counters. Implementations must not fail or block
/// for long; they are called inline on the request path.
pub trait RequestCounter: Send + Sync {
    fn increment(&self, labels: &RequestLabels);
}

/// In-memory counter vector keyed by [`RequestLabels`].
#[derive(Debug, Default)]
pub struct RequestCounterVec {
    counts: Mutex<BTreeMap<RequestLabels, u64>>,
}

impl RequestCounterVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, labels: &RequestLabels) -> u64 {
        lock_unpoisoned(&self.counts)
            .get(labels)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        lock_unpoisoned(&self.counts).values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<RequestLabels, u64> {
        lock_unpoisoned(&self.counts).clone()
    }
}

impl RequestCounter for RequestCounterVec {
    fn increment(&self, labels: &RequestLabels) {
        let mut counts = lock_unpoisoned(&self.counts);
        *counts.entry(labels.clone()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};

    use super::{RequestCounter, RequestCounterVec, RequestLabels};

    #[test]
    fn counts_are_keyed_by_method_host_path_and_status() {
        let counter = RequestCounterVec::new();
        let url: Uri = "https://rpc.example.com/v1?key=secret".parse().expect("uri");
        let ok = RequestLabels::new(&Method::POST, &url, StatusCode::OK);
        let failed = RequestLabels::new(&Method::POST, &url, StatusCode::BAD_GATEWAY);

        counter.increment(&ok);
        counter.increment(&ok);
        counter.increment(&failed);

        assert_eq!(ok.host, "rpc.example.com");
        assert_eq!(ok.path, "/v1");
        assert_eq!(counter.get(&ok), 2);
        assert_eq!(counter.get(&failed), 1);
        assert_eq!(counter.total(), 3);
        assert_eq!(counter.snapshot().len(), 2);
    }
}
