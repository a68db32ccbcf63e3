//! Hex-to-native infrared code translation.
//!
//! IR codes learned with common tools are usually stored in the "hex" format:
//!
//! ```text
//! 0000 006D 0022 0002 0156 00AC 0015 0015 ...
//!  │    │    │    │    └── burst pairs (on/off durations in carrier cycles)
//!  │    │    │    └─────── length of the repeat sequence (ignored)
//!  │    │    └──────────── length of the first sequence, in burst pairs
//!  │    └───────────────── carrier frequency divisor
//!  └────────────────────── always 0000 (learned code)
//! ```
//!
//! The controller's `sendir` command instead wants the native format
//! `frequency,repeat,offset,b0,b1,...` with every value in decimal.
//! The conversion is a pure function of its input.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Converts the hex frequency divisor into a carrier frequency in Hz.
const FREQUENCY_CONVERSION_FACTOR: u32 = 4_145_146;

/// Learned codes are always sent once; the controller repeats from `offset`.
const REPEAT: u32 = 1;

/// Minimum number of elements: preamble, frequency, two lengths, one burst.
const MIN_ELEMENTS: usize = 5;

/// Errors produced when a hex code cannot be converted.
///
/// Every variant names the element that failed so the caller can log a
/// useful message.  A conversion failure only affects the one command that
/// needed the code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrCodeError {
    /// Fewer than five whitespace-separated elements.
    #[error("hex code is too short: need at least 5 elements, got {0}")]
    TooShort(usize),

    /// Element 0 is not `0000`.
    #[error("illegal hex code element 0: expected 0000, got {0:?}")]
    BadPreamble(String),

    /// An element is not a valid hex number (or the frequency divisor is zero).
    #[error("unable to convert hex code element {index} ({token:?})")]
    InvalidElement { index: usize, token: String },
}

/// Returns `true` if `code` looks like a hex IR code rather than a native one.
///
/// Anything that does not match is assumed to already be in native format.
pub fn is_hex_code(code: &str) -> bool {
    static HEX_CODE: OnceLock<Regex> = OnceLock::new();
    HEX_CODE
        .get_or_init(|| {
            Regex::new("0000( +[0-9A-Fa-f]{4})+").expect("hex code pattern is a valid regex")
        })
        .is_match(code)
}

/// Converts a hex IR code into the controller's native `sendir` format.
///
/// # Errors
///
/// Returns [`IrCodeError`] if the code has fewer than five elements, does not
/// start with `0000`, or contains an element that is not a hex number.
///
/// # Examples
///
/// ```rust
/// use gc_core::convert_hex_to_native;
///
/// let native = convert_hex_to_native("0000 006D 0022 0002 0156 00AC 0015 0015").unwrap();
/// assert_eq!(native, "38028,1,69,342,172,21,21");
/// ```
pub fn convert_hex_to_native(hex_code: &str) -> Result<String, IrCodeError> {
    let elements: Vec<&str> = hex_code.split_whitespace().collect();

    if elements.len() < MIN_ELEMENTS {
        return Err(IrCodeError::TooShort(elements.len()));
    }
    if elements[0] != "0000" {
        return Err(IrCodeError::BadPreamble(elements[0].to_string()));
    }

    // Integer quotient; a zero divisor is malformed input.
    let divisor = parse_element(&elements, 1)?;
    if divisor == 0 {
        return Err(invalid(&elements, 1));
    }
    let frequency = FREQUENCY_CONVERSION_FACTOR / divisor;

    let sequence1_length = parse_element(&elements, 2)?;
    let offset = u64::from(sequence1_length) * 2 + 1;

    // Sequence 2 length is validated but not used.
    parse_element(&elements, 3)?;

    let mut native = format!("{frequency},{REPEAT},{offset}");
    for index in 4..elements.len() {
        let value = parse_element(&elements, index)?;
        native.push(',');
        native.push_str(&value.to_string());
    }
    Ok(native)
}

fn parse_element(elements: &[&str], index: usize) -> Result<u32, IrCodeError> {
    u32::from_str_radix(elements[index], 16).map_err(|_| invalid(elements, index))
}

fn invalid(elements: &[&str], index: usize) -> IrCodeError {
    IrCodeError::InvalidElement {
        index,
        token: elements[index].to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
