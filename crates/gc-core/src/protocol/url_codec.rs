//! ISO-8859-1 URL codec for serial payloads, delimiters and feedback values.
//!
//! Serial traffic is arbitrary bytes, but the configuration file and the host
//! channels only carry text.  Bytes therefore cross that boundary URL-encoded
//! with a Latin-1 charset: `%0D%0A` is CR LF, `+` is a space, and every other
//! character stands for the byte with the same code point.

use percent_encoding::{percent_decode, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Characters left untouched by form encoding: alphanumerics and `. - * _`.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'*')
    .remove(b'_');

/// Errors produced when a URL-encoded string cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlCodecError {
    /// A character outside ISO-8859-1 cannot be represented as one byte.
    #[error("character {0:?} is not representable in ISO-8859-1")]
    NotLatin1(char),

    /// A `%` not followed by two hex digits.
    #[error("incomplete or invalid escape at byte offset {0}")]
    InvalidEscape(usize),
}

/// Decodes a URL-encoded ISO-8859-1 string into raw bytes.
///
/// # Errors
///
/// Returns [`UrlCodecError`] for characters above U+00FF or malformed escapes.
///
/// # Examples
///
/// ```rust
/// use gc_core::protocol::decode_latin1;
///
/// assert_eq!(decode_latin1("%0D%0A").unwrap(), vec![b'\r', b'\n']);
/// assert_eq!(decode_latin1("PWR+ON").unwrap(), b"PWR ON".to_vec());
/// ```
pub fn decode_latin1(encoded: &str) -> Result<Vec<u8>, UrlCodecError> {
    let mut latin1 = Vec::with_capacity(encoded.len());
    for ch in encoded.chars() {
        let code = u32::from(ch);
        if ch == '+' {
            latin1.push(b' ');
        } else if code <= 0xFF {
            latin1.push(code as u8);
        } else {
            return Err(UrlCodecError::NotLatin1(ch));
        }
    }

    validate_escapes(&latin1)?;
    Ok(percent_decode(&latin1).collect())
}

/// URL-encodes raw bytes as an ISO-8859-1 string.
///
/// The inverse of [`decode_latin1`]: spaces become `+` and every byte outside
/// the unreserved set becomes an uppercase `%XX` escape.
pub fn encode_latin1(bytes: &[u8]) -> String {
    // A literal '%' is itself escaped as %25, so %20 can only come from a space.
    percent_encode(bytes, FORM_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

fn validate_escapes(bytes: &[u8]) -> Result<(), UrlCodecError> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(UrlCodecError::InvalidEscape(i));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_escaped_control_characters() {
        assert_eq!(decode_latin1("%0D%0A").unwrap(), vec![0x0D, 0x0A]);
    }

    #[test]
    fn test_decode_plain_text_is_unchanged() {
        assert_eq!(decode_latin1("END").unwrap(), b"END".to_vec());
    }

    #[test]
    fn test_decode_plus_is_space() {
        assert_eq!(decode_latin1("a+b").unwrap(), b"a b".to_vec());
    }

    #[test]
    fn test_decode_high_bytes() {
        assert_eq!(decode_latin1("%FF%80").unwrap(), vec![0xFF, 0x80]);
        // A literal Latin-1 character maps to its single-byte code point.
        assert_eq!(decode_latin1("\u{e9}").unwrap(), vec![0xE9]);
    }

    #[test]
    fn test_decode_rejects_non_latin1_characters() {
        assert_eq!(decode_latin1("\u{20ac}"), Err(UrlCodecError::NotLatin1('\u{20ac}')));
    }

    #[test]
    fn test_decode_rejects_malformed_escapes() {
        assert_eq!(decode_latin1("%G1"), Err(UrlCodecError::InvalidEscape(0)));
        assert_eq!(decode_latin1("ab%0"), Err(UrlCodecError::InvalidEscape(2)));
    }

    #[test]
    fn test_encode_control_and_high_bytes() {
        assert_eq!(encode_latin1(&[0x0D, 0x0A]), "%0D%0A");
        assert_eq!(encode_latin1(&[0xE9]), "%E9");
    }

    #[test]
    fn test_encode_space_and_unreserved_characters() {
        assert_eq!(encode_latin1(b"PWR ON"), "PWR+ON");
        assert_eq!(encode_latin1(b"a.b-c*d_e"), "a.b-c*d_e");
        assert_eq!(encode_latin1(b"100%"), "100%25");
    }

    #[test]
    fn test_encoded_feedback_decodes_to_original_bytes() {
        let raw = b"VOL 12\r\n%".to_vec();
        assert_eq!(decode_latin1(&encode_latin1(&raw)).unwrap(), raw);
    }
}
