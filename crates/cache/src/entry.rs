//! Cached responses and their persisted metadata.

use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use exn::ResultExt;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A fully buffered response stored under one canonical key.
///
/// Entries are immutable once stored: a refresh writes a brand new entry over
/// the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: OffsetDateTime,
}

impl CachedEntry {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    /// Body length in bytes.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Metadata document stored at the head of each entry blob.
///
/// An entry blob is the compact JSON row, one `\n`, then the raw body.
/// Compact JSON escapes every newline inside strings, so the first `\n` always
/// ends the row. Keeping both halves in one blob makes every entry write a
/// single atomic replace.
///
/// Header values that aren't valid UTF-8 are stored lossily; the entries the
/// gateway caches are static assets whose headers are plain ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EntryRow {
    pub key: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

impl EntryRow {
    pub fn new(key: &str, entry: &CachedEntry) -> Self {
        let headers = entry
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        Self {
            key: key.to_string(),
            status: entry.status.as_u16(),
            headers,
            size: entry.size(),
            stored_at: entry.stored_at,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).or_raise(|| ErrorKind::InvalidData("entry metadata"))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).or_raise(|| ErrorKind::InvalidData("entry metadata"))
    }

    /// Row and body framed into one entry blob.
    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>> {
        let mut blob = self.to_json()?;
        blob.reserve(body.len() + 1);
        blob.push(b'\n');
        blob.extend_from_slice(body);
        Ok(blob)
    }

    /// Split an entry blob back into its row and body.
    pub fn decode(mut blob: Vec<u8>) -> Result<(Self, Vec<u8>)> {
        let Some(end) = blob.iter().position(|byte| *byte == b'\n') else {
            exn::bail!(ErrorKind::InvalidData("entry blob"));
        };
        let row = Self::from_json(&blob[..end])?;
        let body = blob.split_off(end + 1);
        Ok((row, body))
    }

    /// Reassemble the entry once the body blob has been read.
    pub fn into_entry(self, body: Vec<u8>) -> Result<CachedEntry> {
        let status = StatusCode::from_u16(self.status).or_raise(|| ErrorKind::InvalidData("status code"))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).or_raise(|| ErrorKind::InvalidData("header name"))?;
            let value = HeaderValue::from_str(&value).or_raise(|| ErrorKind::InvalidData("header value"))?;
            headers.append(name, value);
        }
        Ok(CachedEntry {
            status,
            headers,
            body: body.into(),
            stored_at: self.stored_at,
        })
    }
}
