//! Single byte-range requests.
//!
//! Only one `bytes=` range is honored. Multiple ranges or a malformed
//! header mean "serve the whole representation".

use crate::http::headers::HeaderMap;

/// An inclusive, normalized byte range: `0 <= start <= end < length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// What to send for a request against a representation of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No usable Range header; send everything with 200.
    Full,
    /// Send this part with 206.
    Partial(ByteRange),
    /// The single range lies outside the representation; 416.
    NotSatisfiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeSpec {
    FromTo(u64, u64),
    From(u64),
    Suffix(u64),
}

fn parse_spec(header: &str) -> Option<RangeSpec> {
    let header = header.trim();
    let (unit, set) = header.split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }
    let set = set.trim();
    if set.contains(',') {
        return None;
    }
    let (first, last) = set.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());
    let number = |s: &str| -> Option<u64> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    };

    match (first.is_empty(), last.is_empty()) {
        (true, true) => None,
        (true, false) => Some(RangeSpec::Suffix(number(last)?)),
        (false, true) => Some(RangeSpec::From(number(first)?)),
        (false, false) => {
            let (start, end) = (number(first)?, number(last)?);
            (start <= end).then_some(RangeSpec::FromTo(start, end))
        }
    }
}

/// Parse and normalize a Range header value against `length` bytes.
///
/// `None` when the header is malformed, multi-range, or not satisfiable.
pub fn parse_range(header: &str, length: u64) -> Option<ByteRange> {
    match evaluate(header, length) {
        RangeOutcome::Partial(range) => Some(range),
        _ => None,
    }
}

fn evaluate(header: &str, length: u64) -> RangeOutcome {
    let Some(spec) = parse_spec(header) else {
        return RangeOutcome::Full;
    };
    if length == 0 {
        return RangeOutcome::Full;
    }
    let last = length - 1;
    match spec {
        RangeSpec::FromTo(start, _) | RangeSpec::From(start) if start > last => RangeOutcome::NotSatisfiable,
        RangeSpec::FromTo(start, end) => RangeOutcome::Partial(ByteRange {
            start,
            end: end.min(last),
        }),
        RangeSpec::From(start) => RangeOutcome::Partial(ByteRange { start, end: last }),
        RangeSpec::Suffix(0) => RangeOutcome::NotSatisfiable,
        RangeSpec::Suffix(n) => RangeOutcome::Partial(ByteRange {
            start: length - n.min(length),
            end: last,
        }),
    }
}

fn if_range_matches(if_range: &str, etag: Option<&str>, last_modified: Option<&str>) -> bool {
    let if_range = if_range.trim();
    if if_range.starts_with('"') || if_range.starts_with("W/") {
        // Strong comparison only; weak validators never match.
        return !if_range.starts_with("W/") && etag.is_some_and(|tag| tag == if_range);
    }
    last_modified.is_some_and(|date| date == if_range)
}

/// Decide how to answer a GET for a representation of `length` bytes.
pub fn evaluate_request(
    headers: &HeaderMap,
    length: u64,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> RangeOutcome {
    let Some(range) = headers.get("range") else {
        return RangeOutcome::Full;
    };
    if headers.get_all("range").count() > 1 {
        return RangeOutcome::Full;
    }
    if let Some(if_range) = headers.get("if-range") {
        if !if_range_matches(if_range, etag, last_modified) {
            return RangeOutcome::Full;
        }
    }
    evaluate(range, length)
}

/// `Content-Range` value for a partial response.
pub fn content_range(range: &ByteRange, length: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end, length)
}

/// `Content-Range` value for a 416 response.
pub fn unsatisfied_content_range(length: u64) -> String {
    format!("bytes */{length}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn normalizes_single_ranges() {
        assert_eq!(parse_range("bytes=0-499", 1000), Some(range(0, 499)));
        assert_eq!(parse_range("bytes=500-", 1000), Some(range(500, 999)));
        assert_eq!(parse_range("bytes=900-5000", 1000), Some(range(900, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some(range(900, 999)));
        assert_eq!(parse_range("bytes=-5000", 1000), Some(range(0, 999)));
        assert_eq!(parse_range("Bytes = 1-1", 10), Some(range(1, 1)));
    }

    #[test]
    fn rejects_unusable_ranges() {
        assert_eq!(parse_range("bytes=0-1,5-6", 1000), None);
        assert_eq!(parse_range("bytes=5-1", 1000), None);
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=abc", 1000), None);
        assert_eq!(parse_range("bytes=-", 1000), None);
        assert_eq!(parse_range("bytes=1000-", 1000), None);
    }

    #[test]
    fn unsatisfiable_start() {
        let mut headers = HeaderMap::new();
        headers.append("Range", "bytes=2000-").unwrap();
        assert_eq!(evaluate_request(&headers, 1000, None, None), RangeOutcome::NotSatisfiable);
        assert_eq!(unsatisfied_content_range(1000), "bytes */1000");
    }

    #[test]
    fn if_range_mismatch_serves_full() {
        let mut headers = HeaderMap::new();
        headers.append("Range", "bytes=0-9").unwrap();
        headers.append("If-Range", "\"v2\"").unwrap();
        assert_eq!(evaluate_request(&headers, 100, Some("\"v1\""), None), RangeOutcome::Full);
        assert_eq!(
            evaluate_request(&headers, 100, Some("\"v2\""), None),
            RangeOutcome::Partial(range(0, 9))
        );

        let mut weak = HeaderMap::new();
        weak.append("Range", "bytes=0-9").unwrap();
        weak.append("If-Range", "W/\"v2\"").unwrap();
        assert_eq!(evaluate_request(&weak, 100, Some("W/\"v2\""), None), RangeOutcome::Full);
    }

    #[test]
    fn content_range_format() {
        let r = range(0, 499);
        assert_eq!(r.len(), 500);
        assert_eq!(content_range(&r, 1234), "bytes 0-499/1234");
    }
}
