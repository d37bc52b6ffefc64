// Exchange records and the shared append-only history

use crate::pattern::UrlPattern;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a process-unique request id for drivers that don't supply one.
pub(crate) fn next_request_id() -> String {
    format!("req-{}", NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One observed or synthesized request/response pair.
///
/// Records are never mutated after creation; the history hands out
/// `Arc<ExchangeRecord>` so readers can hold them while dispatch appends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub request_id: String,
    /// Session the exchange was captured on
    pub session_id: String,
    pub url: String,
    pub http_method: String,
    pub timestamp_millis: u64,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    /// Absent for intercepted requests that were forwarded to the network
    pub status_code: Option<u16>,
    pub response_headers: HashMap<String, String>,
    /// Absent when the body could not be read
    pub response_body: Option<String>,
    /// Absent when the driver reported no timing
    pub response_time_millis: Option<u64>,
    pub mocked: bool,
}

impl ExchangeRecord {
    /// Looks up a response header by its captured name, falling back to a
    /// case-insensitive match.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .get(name)
            .or_else(|| {
                self.response_headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// Ordered, append-only log of captured exchanges.
///
/// Appends from dispatch threads and reads from the test thread may
/// interleave freely; readers always work on a snapshot.
#[derive(Debug, Default)]
pub struct ExchangeHistory {
    records: RwLock<Records>,
}

#[derive(Debug, Default)]
struct Records {
    entries: Vec<Arc<ExchangeRecord>>,
    /// Records dropped by `clear` over the history's lifetime
    cleared: usize,
}

impl ExchangeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` and returns the shared handle stored in the history.
    pub fn append(&self, record: ExchangeRecord) -> Arc<ExchangeRecord> {
        let record = Arc::new(record);
        self.records.write().entries.push(record.clone());
        record
    }

    pub fn len(&self) -> usize {
        self.records.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().entries.is_empty()
    }

    /// Removes every record. Cursors taken earlier stay valid.
    pub fn clear(&self) {
        let mut records = self.records.write();
        records.cleared += records.entries.len();
        records.entries.clear();
    }

    /// All records, in dispatch order.
    pub fn snapshot(&self) -> Vec<Arc<ExchangeRecord>> {
        self.records.read().entries.clone()
    }

    /// Position of the next record to be appended.
    ///
    /// Counts every record ever appended, so it keeps growing across
    /// [`clear`](Self::clear).
    pub fn cursor(&self) -> usize {
        let records = self.records.read();
        records.cleared + records.entries.len()
    }

    /// Records appended at or after `cursor` (see [`cursor`](Self::cursor))
    /// that are still held.
    pub fn since(&self, cursor: usize) -> Vec<Arc<ExchangeRecord>> {
        let records = self.records.read();
        let start = cursor
            .saturating_sub(records.cleared)
            .min(records.entries.len());
        records.entries[start..].to_vec()
    }

    /// Records whose URL matches `pattern`.
    pub fn by_url_pattern(&self, pattern: &UrlPattern) -> Vec<Arc<ExchangeRecord>> {
        self.filter(|record| pattern.is_match(&record.url))
    }

    /// Records with the given HTTP method (case-insensitive).
    pub fn by_method(&self, method: &str) -> Vec<Arc<ExchangeRecord>> {
        self.filter(|record| record.http_method.eq_ignore_ascii_case(method))
    }

    /// Records that completed with `status`.
    pub fn by_status(&self, status: u16) -> Vec<Arc<ExchangeRecord>> {
        self.filter(|record| record.status_code == Some(status))
    }

    /// Records answered by an interception rule instead of the network.
    pub fn mocked(&self) -> Vec<Arc<ExchangeRecord>> {
        self.filter(|record| record.mocked)
    }

    /// Most recent record whose URL matches `pattern`.
    pub fn last_matching(&self, pattern: &UrlPattern) -> Option<Arc<ExchangeRecord>> {
        self.records
            .read()
            .entries
            .iter()
            .rev()
            .find(|record| pattern.is_match(&record.url))
            .cloned()
    }

    pub fn count_matching(&self, pattern: &UrlPattern) -> usize {
        self.records
            .read()
            .entries
            .iter()
            .filter(|record| pattern.is_match(&record.url))
            .count()
    }

    fn filter(&self, predicate: impl Fn(&ExchangeRecord) -> bool) -> Vec<Arc<ExchangeRecord>> {
        self.records
            .read()
            .entries
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }
}
