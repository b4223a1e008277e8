//! Partial content from fully cached entries.
//!
//! Media elements seek by asking for byte ranges. The cache only ever stores
//! whole bodies, so every `206` is cut out of the full entry on the way out.
//! Nothing here can fail: a header that doesn't parse asks for everything,
//! and out-of-bounds offsets are clamped.

use crate::message::Response;
use bytes::Bytes;
use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use regex::Regex;
use shelter_cache::CachedEntry;
use std::sync::LazyLock;

/// First range of a `bytes=` header. Later ranges of a multi-range request
/// are ignored.
static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*bytes\s*=\s*(\d*)\s*-\s*(\d*)").unwrap());

/// A requested byte range with inclusive, possibly open bounds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    /// The whole resource.
    pub const FULL: Self = Self { start: None, end: None };

    /// Parse a `Range` header value, `None` if it isn't a byte range.
    ///
    /// Offsets too large for a `u64` saturate; they get clamped anyway.
    pub fn parse(header: &str) -> Option<Self> {
        let captures = RANGE_PATTERN.captures(header)?;
        let bound = |index: usize| {
            captures
                .get(index)
                .map(|group| group.as_str())
                .filter(|digits| !digits.is_empty())
                .map(|digits| digits.parse::<u64>().unwrap_or(u64::MAX))
        };
        Some(Self {
            start: bound(1),
            end: bound(2),
        })
    }

    /// Interpret an optional header; anything unusable means [`FULL`](Self::FULL).
    pub fn from_header(value: Option<&HeaderValue>) -> Self {
        value.and_then(|value| value.to_str().ok()).and_then(Self::parse).unwrap_or(Self::FULL)
    }

    /// Inclusive `(start, end)` within a body of `size` bytes, or `None` for
    /// an empty body.
    ///
    /// A missing start means `0` and a missing end means the last byte. Both
    /// are clamped to the body; if the start still lies past the end, the
    /// whole body is returned.
    pub fn clamp(&self, size: u64) -> Option<(u64, u64)> {
        let last = size.checked_sub(1)?;
        let start = self.start.unwrap_or(0).min(last);
        let end = self.end.unwrap_or(last).min(last);
        if start > end { Some((0, last)) } else { Some((start, end)) }
    }
}

/// Cut `range` out of a full entry as a `206 Partial Content` response.
///
/// Entry headers are kept, with the range headers overwritten and
/// `fallback_content_type` filled in if the entry had no `Content-Type`.
///
/// ```
/// use bytes::Bytes;
/// use http::{HeaderMap, HeaderValue, StatusCode};
/// use shelter_cache::CachedEntry;
/// use shelter_gateway::range::{ByteRange, synthesize};
///
/// let entry = CachedEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from(vec![7u8; 1000]));
/// let range = ByteRange::parse("bytes=500-").unwrap();
/// let response = synthesize(&entry, range, &HeaderValue::from_static("audio/mpeg"));
/// assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
/// assert_eq!(response.headers["content-range"], "bytes 500-999/1000");
/// assert_eq!(response.body.len(), 500);
/// ```
pub fn synthesize(entry: &CachedEntry, range: ByteRange, fallback_content_type: &HeaderValue) -> Response {
    let size = entry.size();
    let (content_range, body) = match range.clamp(size) {
        Some((start, end)) => (
            format!("bytes {start}-{end}/{size}"),
            entry.body.slice(start as usize..=end as usize),
        ),
        None => ("bytes 0-0/0".to_string(), Bytes::new()),
    };
    let mut headers = entry.headers.clone();
    headers.insert(
        CONTENT_RANGE,
        HeaderValue::from_str(&content_range).expect("content range is digits and ASCII punctuation"),
    );
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, fallback_content_type.clone());
    }
    Response::new(StatusCode::PARTIAL_CONTENT, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use rstest::rstest;

    fn entry(size: usize) -> CachedEntry {
        let body: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        CachedEntry::new(StatusCode::OK, HeaderMap::new(), body)
    }

    fn mpeg() -> HeaderValue {
        HeaderValue::from_static("audio/mpeg")
    }

    #[rstest]
    #[case("bytes=0-99", Some(0), Some(99))]
    #[case("bytes=500-", Some(500), None)]
    #[case("bytes=-500", None, Some(500))]
    #[case("bytes=-", None, None)]
    #[case(" bytes = 10 - 20 ", Some(10), Some(20))]
    #[case("bytes=0-1,5-9", Some(0), Some(1))]
    #[case("bytes=99999999999999999999999-", Some(u64::MAX), None)]
    fn test_parse(#[case] header: &str, #[case] start: Option<u64>, #[case] end: Option<u64>) {
        assert_eq!(ByteRange::parse(header), Some(ByteRange { start, end }));
    }

    #[rstest]
    #[case("")]
    #[case("items=0-1")]
    #[case("bytes=abc")]
    #[case("bytes 0-1")]
    fn test_malformed(#[case] header: &str) {
        assert_eq!(ByteRange::parse(header), None);
        assert_eq!(ByteRange::from_header(Some(&HeaderValue::from_str(header).unwrap())), ByteRange::FULL);
    }

    #[test]
    fn test_non_ascii_header_is_full_range() {
        let value = HeaderValue::from_bytes(b"bytes=\xff-").unwrap();
        assert_eq!(ByteRange::from_header(Some(&value)), ByteRange::FULL);
        assert_eq!(ByteRange::from_header(None), ByteRange::FULL);
    }

    #[rstest]
    #[case::bounded("bytes=100-199", 100, 199)]
    #[case::open_end("bytes=500-", 500, 999)]
    #[case::single_byte("bytes=999-999", 999, 999)]
    #[case::end_clamped("bytes=900-5000", 900, 999)]
    #[case::start_clamped("bytes=5000-", 999, 999)]
    #[case::both_clamped("bytes=2000-3000", 999, 999)]
    #[case::reversed("bytes=600-100", 0, 999)]
    #[case::suffix_form("bytes=-500", 0, 500)]
    #[case::malformed("bytes=x", 0, 999)]
    fn test_synthesize(#[case] header: &str, #[case] start: u64, #[case] end: u64) {
        let entry = entry(1000);
        let response = synthesize(&entry, ByteRange::from_header(Some(&HeaderValue::from_str(header).unwrap())), &mpeg());
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.status_text(), "Partial Content");
        assert_eq!(response.headers[CONTENT_RANGE], format!("bytes {start}-{end}/1000").as_str());
        assert_eq!(response.headers[CONTENT_LENGTH], (end - start + 1).to_string().as_str());
        assert_eq!(response.headers[ACCEPT_RANGES], "bytes");
        assert_eq!(response.body.len() as u64, end - start + 1);
        assert_eq!(response.body, entry.body.slice(start as usize..=end as usize));
    }

    #[test]
    fn test_empty_body() {
        let response = synthesize(&entry(0), ByteRange::parse("bytes=0-").unwrap(), &mpeg());
        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers[CONTENT_RANGE], "bytes 0-0/0");
        assert_eq!(response.headers[CONTENT_LENGTH], "0");
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_content_type() {
        let response = synthesize(&entry(10), ByteRange::FULL, &mpeg());
        assert_eq!(response.headers[CONTENT_TYPE], "audio/mpeg");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/ogg"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        let typed = CachedEntry::new(StatusCode::OK, headers, vec![0u8; 10]);
        let response = synthesize(&typed, ByteRange::parse("bytes=2-3").unwrap(), &mpeg());
        assert_eq!(response.headers[CONTENT_TYPE], "audio/ogg");
        assert_eq!(response.headers[CONTENT_LENGTH], "2");
    }
}
