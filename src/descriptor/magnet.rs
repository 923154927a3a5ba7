//! Magnet locator
//!
//! A descriptor packed into a single URI:
//!
//! `magnet:?xt=urn:btih:<info hash>&dn=<file name>&tr=<announce>&x.n=<chunk count>&x.c=<chunk size>&x.s=<file size>[&x.h=<algo:hex>]`
//!
//! Values are percent-encoded. The `xt` hash must match the one recomputed
//! from the decoded fields.

use super::metainfo::{ContentHash, Descriptor, Sha1Hash};
use crate::error::{ProtocolErrorKind, Result, SwarmError};

const SCHEME: &str = "magnet:?";
const BTIH_PREFIX: &str = "urn:btih:";

fn invalid(message: impl Into<String>) -> SwarmError {
    SwarmError::protocol(ProtocolErrorKind::InvalidLocator, message)
}

/// Render a descriptor as a magnet locator
pub fn encode(descriptor: &Descriptor) -> String {
    let mut uri = format!(
        "{}xt={}{}&dn={}&tr={}&x.n={}&x.c={}&x.s={}",
        SCHEME,
        BTIH_PREFIX,
        descriptor.info_hash_hex(),
        urlencoding::encode(&descriptor.file_name),
        urlencoding::encode(&descriptor.announce),
        descriptor.chunk_count,
        descriptor.chunk_size,
        descriptor.file_size,
    );
    if let Some(hash) = &descriptor.content_hash {
        uri.push_str("&x.h=");
        uri.push_str(&urlencoding::encode(&hash.to_string()));
    }
    uri
}

/// Parse a magnet locator back into a descriptor
pub fn decode(uri: &str) -> Result<Descriptor> {
    let query = uri
        .strip_prefix(SCHEME)
        .ok_or_else(|| invalid("URI must start with 'magnet:?'"))?;

    let mut params = Params::default();

    for param in query.split('&') {
        if param.is_empty() {
            continue;
        }

        let (key, raw) = param
            .split_once('=')
            .ok_or_else(|| invalid(format!("Parameter without value: {:?}", param)))?;
        let value = url_decode(raw)?;

        let slot = match key {
            "xt" => &mut params.xt,
            "dn" => &mut params.dn,
            "tr" => &mut params.tr,
            "x.n" => &mut params.chunk_count,
            "x.c" => &mut params.chunk_size,
            "x.s" => &mut params.file_size,
            "x.h" => &mut params.content_hash,
            // Unknown parameters are ignored
            _ => continue,
        };
        if slot.replace(value).is_some() {
            return Err(invalid(format!("Duplicate parameter '{}'", key)));
        }
    }

    let xt = params.xt.ok_or_else(|| invalid("Missing 'xt' parameter"))?;
    let info_hash = parse_btih(&xt)?;

    let file_name = params.dn.ok_or_else(|| invalid("Missing 'dn' parameter"))?;
    let announce = params.tr.ok_or_else(|| invalid("Missing 'tr' parameter"))?;
    let chunk_count: u32 = parse_number("x.n", params.chunk_count)?;
    let chunk_size: u64 = parse_number("x.c", params.chunk_size)?;
    let file_size: u64 = parse_number("x.s", params.file_size)?;

    let content_hash = params
        .content_hash
        .map(|text| {
            text.parse::<ContentHash>()
                .map_err(|e| invalid(format!("Malformed 'x.h': {}", e)))
        })
        .transpose()?;

    let descriptor = Descriptor {
        announce,
        file_name,
        chunk_size,
        chunk_count,
        file_size,
        content_hash,
    };
    descriptor
        .validate()
        .map_err(|e| invalid(e.to_string()))?;

    if descriptor.info_hash() != info_hash {
        return Err(invalid(format!(
            "Info hash {} does not match the locator fields (expected {})",
            hex::encode(info_hash),
            descriptor.info_hash_hex()
        )));
    }

    Ok(descriptor)
}

#[derive(Default)]
struct Params {
    xt: Option<String>,
    dn: Option<String>,
    tr: Option<String>,
    chunk_count: Option<String>,
    chunk_size: Option<String>,
    file_size: Option<String>,
    content_hash: Option<String>,
}

fn parse_number<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<T> {
    let value = value.ok_or_else(|| invalid(format!("Missing '{}' parameter", key)))?;
    value
        .parse()
        .map_err(|_| invalid(format!("'{}' is not a number: {:?}", key, value)))
}

/// Parse `urn:btih:<40 hex>`
fn parse_btih(xt: &str) -> Result<Sha1Hash> {
    let hex_hash = xt
        .strip_prefix(BTIH_PREFIX)
        .ok_or_else(|| invalid(format!("Unsupported 'xt' topic: {:?}", xt)))?;

    let mut hash = [0u8; 20];
    hex::decode_to_slice(hex_hash, &mut hash)
        .map_err(|e| invalid(format!("Invalid info hash {:?}: {}", hex_hash, e)))?;
    Ok(hash)
}

/// Percent-decode a query value, reading `+` as a space
fn url_decode(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| invalid(format!("Value is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Descriptor {
        Descriptor::new("http://localhost:5000", "my movie & notes.mp4", 1_000_000, 250_000)
            .unwrap()
    }

    #[test]
    fn test_locator_roundtrip() {
        let d = sample();
        let uri = encode(&d);
        assert!(uri.starts_with("magnet:?xt=urn:btih:"));
        assert!(uri.contains("dn=my%20movie%20%26%20notes.mp4"));
        assert!(uri.contains("&x.n=4&x.c=250000&x.s=1000000"));
        assert_eq!(decode(&uri).unwrap(), d);
    }

    #[test]
    fn test_locator_roundtrip_with_content_hash() {
        let d = sample().with_content_hash(ContentHash::sha256_of(b"bytes"));
        let uri = encode(&d);
        assert!(uri.contains("&x.h=sha256%3A"));
        assert_eq!(decode(&uri).unwrap(), d);
    }

    #[test]
    fn test_plus_decodes_as_space() {
        let d = sample();
        let uri = encode(&d).replace("my%20movie%20", "my+movie+");
        assert_eq!(decode(&uri).unwrap().file_name, "my movie & notes.mp4");
    }

    #[test]
    fn test_unknown_parameters_ignored() {
        let d = sample();
        let uri = format!("{}&ws=http://seed&&", encode(&d));
        assert_eq!(decode(&uri).unwrap(), d);
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        let uri = encode(&sample()).replacen("magnet:?", "http://?", 1);
        assert!(decode(&uri).is_err());
    }

    #[test]
    fn test_rejects_missing_parameters() {
        let uri = encode(&sample());
        for key in ["xt=", "dn=", "tr=", "x.n=", "x.c=", "x.s="] {
            let stripped: Vec<&str> = uri
                .trim_start_matches("magnet:?")
                .split('&')
                .filter(|p| !p.starts_with(key))
                .collect();
            let broken = format!("magnet:?{}", stripped.join("&"));
            let err = decode(&broken).unwrap_err();
            assert!(
                matches!(
                    err,
                    SwarmError::Protocol {
                        kind: ProtocolErrorKind::InvalidLocator,
                        ..
                    }
                ),
                "{} accepted without {}",
                broken,
                key
            );
        }
    }

    #[test]
    fn test_rejects_non_numeric_and_inconsistent() {
        let uri = encode(&sample());
        assert!(decode(&uri.replace("x.s=1000000", "x.s=lots")).is_err());
        assert!(decode(&uri.replace("x.n=4", "x.n=5")).is_err());
    }

    #[test]
    fn test_rejects_mismatched_info_hash() {
        let d = sample();
        let uri = encode(&d).replace(&d.info_hash_hex(), &"0".repeat(40));
        assert!(decode(&uri).is_err());
    }

    #[test]
    fn test_rejects_malformed_content_hash() {
        let uri = format!("{}&x.h=sha256:beef", encode(&sample()));
        assert!(decode(&uri).is_err());
    }

    #[test]
    fn test_rejects_duplicates() {
        let uri = format!("{}&dn=other", encode(&sample()));
        assert!(decode(&uri).is_err());
    }
}
