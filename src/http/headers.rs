//! Ordered, case-insensitive header collection.
//!
//! Values are stored as text where every char is a single octet
//! (`U+0000..=U+00FF`), so request bytes survive a round trip unchanged.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("invalid header name {0:?}")]
    InvalidName(String),
    #[error("invalid value for header {0}")]
    InvalidValue(String),
    #[error("headers are read-only once the response has started")]
    ReadOnly,
    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),
}

/// RFC 7230 `tchar`.
pub fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
    ) || b.is_ascii_alphanumeric()
}

pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

fn validate_name(name: &str) -> Result<(), HeaderError> {
    if is_token(name) {
        Ok(())
    } else {
        Err(HeaderError::InvalidName(name.to_string()))
    }
}

fn validate_value(name: &str, value: &str) -> Result<(), HeaderError> {
    let ok = value.chars().all(|c| {
        let c = c as u32;
        (0x20..=0xFF).contains(&c) && c != 0x7F
    });
    if ok {
        Ok(())
    } else {
        Err(HeaderError::InvalidValue(name.to_string()))
    }
}

/// Decode raw header bytes one octet per char.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
    read_only: bool,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }

    fn check_writable(&self) -> Result<(), HeaderError> {
        if self.read_only {
            Err(HeaderError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Add a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), HeaderError> {
        self.check_writable()?;
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Replace every value for `name` with `value`.
    ///
    /// The new entry takes the position of the first replaced one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), HeaderError> {
        self.check_writable()?;
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&name, &value)?;

        match self.position(&name) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
        Ok(())
    }

    /// Remove every value for `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> Result<bool, HeaderError> {
        self.check_writable()?;
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        Ok(self.entries.len() != before)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Comma-separated list elements across every value for `name`.
    pub fn tokens<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .map(|t| t.trim_matches(|c| c == ' ' || c == '\t'))
            .filter(|t| !t.is_empty())
    }

    /// Whether the list header `name` contains `token` (case-insensitive).
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }

    /// The validated Content-Length.
    ///
    /// Repeated or list-valued headers are accepted only when every element
    /// is the same non-negative decimal number.
    pub fn content_length(&self) -> Result<Option<u64>, HeaderError> {
        let mut length = None;
        for raw in self.get_all("content-length") {
            for element in raw.split(',') {
                let element = element.trim_matches(|c| c == ' ' || c == '\t');
                if element.is_empty() || !element.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(HeaderError::InvalidContentLength(raw.to_string()));
                }
                let value: u64 = element
                    .parse()
                    .map_err(|_| HeaderError::InvalidContentLength(raw.to_string()))?;
                match length {
                    Some(existing) if existing != value => {
                        return Err(HeaderError::InvalidContentLength(raw.to_string()));
                    }
                    _ => length = Some(value),
                }
            }
        }
        Ok(length)
    }

    /// Serialize as `Name: value\r\n` lines in insertion order.
    pub fn write_to(&self, dst: &mut BytesMut) {
        for (name, value) in &self.entries {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            for c in value.chars() {
                dst.put_u8(c as u32 as u8);
            }
            dst.put_slice(b"\r\n");
        }
    }
}
