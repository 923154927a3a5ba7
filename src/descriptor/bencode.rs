//! Canonical bencode
//!
//! Descriptors are stored as bencode dictionaries. Decoding is strict: keys
//! must be sorted and unique, integers may not carry leading zeros, and the
//! whole input must be consumed. Encoding always emits sorted keys, so a
//! value encodes to exactly one byte string.
//!
//! - Integers:   `i<number>e`
//! - Strings:    `<length>:<data>`
//! - Lists:      `l<items>e`
//! - Dicts:      `d<pairs>e`

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ProtocolErrorKind, Result, SwarmError};

/// Longest byte string accepted while decoding (16 MiB)
const MAX_STRING_LENGTH: usize = 16 * 1024 * 1024;

/// Deepest list/dict nesting accepted while decoding
const MAX_DEPTH: usize = 64;

/// A bencode value
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    /// Byte string, not necessarily UTF-8
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keys are kept sorted by the map
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.len() <= 64 => write!(f, "{:?}", s),
                Ok(_) | Err(_) => write!(f, "<{} bytes>", b.len()),
            },
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Dict(d) => f
                .debug_map()
                .entries(d.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
                .finish(),
        }
    }
}

fn parse_error(message: impl Into<String>) -> SwarmError {
    SwarmError::protocol(ProtocolErrorKind::BencodeParse, message)
}

/// Decode a complete value; trailing bytes are an error
pub fn decode(data: &[u8]) -> Result<Value> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value(0)?;
    if parser.pos != data.len() {
        return Err(parse_error(format!(
            "Trailing data: {} bytes",
            data.len() - parser.pos
        )));
    }
    Ok(value)
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(parse_error("Nesting too deep"));
        }

        match self.peek() {
            None => Err(parse_error("Unexpected end of input")),
            Some(b'i') => self.integer(),
            Some(b'l') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        None => return Err(parse_error("Unterminated list")),
                        Some(b'e') => break,
                        Some(_) => items.push(self.value(depth + 1)?),
                    }
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            Some(b'd') => {
                self.pos += 1;
                let mut entries = BTreeMap::new();
                let mut previous: Option<Vec<u8>> = None;
                loop {
                    match self.peek() {
                        None => return Err(parse_error("Unterminated dict")),
                        Some(b'e') => break,
                        Some(_) => {}
                    }
                    let key = self.bytes()?;
                    if previous.as_ref().is_some_and(|p| &key <= p) {
                        return Err(parse_error("Dict keys not sorted or duplicated"));
                    }
                    let value = self.value(depth + 1)?;
                    previous = Some(key.clone());
                    entries.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(entries))
            }
            Some(b'0'..=b'9') => Ok(Value::Bytes(self.bytes()?)),
            Some(c) => Err(parse_error(format!(
                "Invalid type marker {:?} at offset {}",
                c as char, self.pos
            ))),
        }
    }

    fn integer(&mut self) -> Result<Value> {
        let start = self.pos + 1;
        let end = self.data[start..]
            .iter()
            .position(|&c| c == b'e')
            .map(|p| start + p)
            .ok_or_else(|| parse_error("Unterminated integer"))?;

        let digits = std::str::from_utf8(&self.data[start..end])
            .map_err(|_| parse_error("Invalid integer encoding"))?;

        let unsigned = digits.strip_prefix('-').unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.bytes().all(|c| c.is_ascii_digit()) {
            return Err(parse_error(format!("Invalid integer {:?}", digits)));
        }
        if unsigned.len() > 1 && unsigned.starts_with('0') {
            return Err(parse_error("Invalid integer: leading zero"));
        }
        if digits == "-0" {
            return Err(parse_error("Invalid integer: negative zero"));
        }

        let n = digits
            .parse::<i64>()
            .map_err(|_| parse_error(format!("Integer out of range: {}", digits)))?;
        self.pos = end + 1;
        Ok(Value::Integer(n))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let colon = self.data[self.pos..]
            .iter()
            .position(|&c| c == b':')
            .map(|p| self.pos + p)
            .ok_or_else(|| parse_error("Expected ':' in string"))?;

        let len_str = &self.data[self.pos..colon];
        if len_str.is_empty() || !len_str.iter().all(u8::is_ascii_digit) {
            return Err(parse_error("Invalid string length"));
        }
        if len_str.len() > 1 && len_str[0] == b'0' {
            return Err(parse_error("Invalid string length: leading zero"));
        }
        let len: usize = std::str::from_utf8(len_str)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| parse_error("Invalid string length"))?;

        if len > MAX_STRING_LENGTH {
            return Err(parse_error(format!(
                "String length {} exceeds maximum {}",
                len, MAX_STRING_LENGTH
            )));
        }

        let start = colon + 1;
        let available = self.data.len() - start;
        if len > available {
            return Err(parse_error(format!(
                "String length {} exceeds available data {}",
                len, available
            )));
        }

        self.pos = start + len;
        Ok(self.data[start..self.pos].to_vec())
    }
}

impl Value {
    /// Encode to canonical bencode bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Integer(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Self::Bytes(b) => encode_bytes(b, buf),
            Self::List(items) => {
                buf.push(b'l');
                for item in items {
                    item.encode_to(buf);
                }
                buf.push(b'e');
            }
            Self::Dict(d) => {
                buf.push(b'd');
                for (k, v) in d {
                    encode_bytes(k, buf);
                    v.encode_to(buf);
                }
                buf.push(b'e');
            }
        }
    }

    /// Build a byte string from text
    pub fn text(s: impl AsRef<str>) -> Self {
        Self::Bytes(s.as_ref().as_bytes().to_vec())
    }

    /// Build a dict from `(key, value)` pairs in any order
    pub fn dict<'k>(entries: impl IntoIterator<Item = (&'k str, Value)>) -> Self {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Non-negative integer
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Integer(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a dict entry by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }
}

fn encode_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(b);
}
