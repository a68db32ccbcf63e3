//! End-of-message framing for serial passthrough streams.
//!
//! Serial devices behind the controller do not use any framing the network
//! layer understands; the bytes just arrive.  Each serial port is therefore
//! configured with a [`Delimiter`] (for example CR LF, or a vendor token such
//! as `#END`) and the [`FrameScanner`] cuts the stream into messages whenever
//! the accumulated bytes end with that delimiter.
//!
//! # Why scan byte by byte? (for beginners)
//!
//! TCP may deliver a message in several pieces, and a delimiter may itself be
//! split between two reads (`...\r` then `\n`).  Appending one byte at a time
//! and comparing only the *tail* of the buffer with the delimiter makes the
//! split case identical to the contiguous case.

use thiserror::Error;
use tracing::trace;

use crate::protocol::url_codec::{decode_latin1, UrlCodecError};

/// Errors produced when a delimiter cannot be built from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelimiterError {
    #[error("end-of-message delimiter is empty")]
    Empty,

    #[error("end-of-message delimiter is not valid URL-encoded ISO-8859-1: {0}")]
    Decode(#[from] UrlCodecError),
}

/// A non-empty byte sequence marking the end of one serial message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter(Vec<u8>);

impl Delimiter {
    /// Builds a delimiter from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DelimiterError::Empty`] for an empty sequence, which could
    /// never be matched meaningfully.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, DelimiterError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(DelimiterError::Empty);
        }
        Ok(Self(bytes))
    }

    /// Decodes a delimiter from its configured URL-encoded form (e.g. `%0D`).
    ///
    /// # Errors
    ///
    /// Returns [`DelimiterError`] if the string is empty or malformed.
    pub fn from_url_encoded(encoded: &str) -> Result<Self, DelimiterError> {
        Self::new(decode_latin1(encoded)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; a delimiter cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `buffer` ends with this delimiter, byte for byte.
    ///
    /// A buffer shorter than the delimiter never matches.
    pub fn terminates(&self, buffer: &[u8]) -> bool {
        buffer.len() >= self.0.len() && buffer[buffer.len() - self.0.len()..] == self.0[..]
    }
}

/// Accumulates serial bytes and yields complete messages.
///
/// Emitted messages include the delimiter.
#[derive(Debug)]
pub struct FrameScanner {
    delimiter: Delimiter,
    buffer: Vec<u8>,
}

impl FrameScanner {
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            buffer: Vec::new(),
        }
    }

    /// Appends one byte; returns the completed message if it ends one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.buffer.push(byte);
        if self.delimiter.terminates(&self.buffer) {
            trace!("end-of-message delimiter found after {} bytes", self.buffer.len());
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Appends a chunk of bytes and returns every message it completes, in order.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Bytes received since the last complete message.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Discards any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn delimiter(&self) -> &Delimiter {
        &self.delimiter
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn crlf() -> Delimiter {
        Delimiter::new(b"\r\n".to_vec()).unwrap()
    }

    #[test]
    fn test_empty_delimiter_is_rejected() {
        assert_eq!(Delimiter::new(Vec::new()), Err(DelimiterError::Empty));
        assert_eq!(Delimiter::from_url_encoded(""), Err(DelimiterError::Empty));
    }

    #[test]
    fn test_delimiter_decodes_from_url_encoding() {
        let delimiter = Delimiter::from_url_encoded("%0D%0A").unwrap();
        assert_eq!(delimiter, crlf());
    }

    #[test]
    fn test_delimiter_with_malformed_escape_is_rejected() {
        assert!(matches!(
            Delimiter::from_url_encoded("%Z"),
            Err(DelimiterError::Decode(_))
        ));
    }

    #[test]
    fn test_terminates_requires_buffer_at_least_delimiter_length() {
        let delimiter = crlf();
        assert!(!delimiter.terminates(b""));
        assert!(!delimiter.terminates(b"\n"));
        assert!(delimiter.terminates(b"\r\n"));
    }

    #[test]
    fn test_terminates_compares_right_aligned_tail() {
        let delimiter = crlf();
        assert!(delimiter.terminates(b"OK\r\n"));
        assert!(!delimiter.terminates(b"OK\r\nX"));
        assert!(!delimiter.terminates(b"OK\n\r"));
    }

    #[test]
    fn test_scanner_emits_message_including_delimiter() {
        // Arrange
        let mut scanner = FrameScanner::new(crlf());

        // Act
        let messages = scanner.push_slice(b"PWR=1\r\n");

        // Assert
        assert_eq!(messages, vec![b"PWR=1\r\n".to_vec()]);
        assert!(scanner.pending().is_empty());
    }

    #[test]
    fn test_scanner_handles_delimiter_split_across_chunks() {
        let mut scanner = FrameScanner::new(crlf());

        assert!(scanner.push_slice(b"VOL=20\r").is_empty());
        assert_eq!(scanner.pending(), b"VOL=20\r");

        let messages = scanner.push_slice(b"\nMU");
        assert_eq!(messages, vec![b"VOL=20\r\n".to_vec()]);
        assert_eq!(scanner.pending(), b"MU");
    }

    #[test]
    fn test_scanner_emits_multiple_messages_from_one_chunk() {
        let mut scanner = FrameScanner::new(Delimiter::new(b"#".to_vec()).unwrap());
        let messages = scanner.push_slice(b"a#bc##");
        assert_eq!(messages, vec![b"a#".to_vec(), b"bc#".to_vec(), b"#".to_vec()]);
    }

    #[test]
    fn test_scanner_with_multi_byte_token_ignores_partial_prefix() {
        let mut scanner = FrameScanner::new(Delimiter::new(b"END".to_vec()).unwrap());
        assert!(scanner.push_slice(b"xxENxEN").is_empty());
        assert_eq!(scanner.push_slice(b"D"), vec![b"xxENxEND".to_vec()]);
    }

    #[test]
    fn test_reset_discards_partial_message() {
        let mut scanner = FrameScanner::new(crlf());
        scanner.push_slice(b"partial");
        scanner.reset();
        assert!(scanner.pending().is_empty());
        assert_eq!(scanner.push_slice(b"ok\r\n"), vec![b"ok\r\n".to_vec()]);
    }
}
