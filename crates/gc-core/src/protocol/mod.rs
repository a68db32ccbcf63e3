//! Protocol module: command vocabulary, IR code translation, serial framing
//! and the URL codec used for serial payloads.

pub mod commands;
pub mod framing;
pub mod ir_code;
pub mod sequence;
pub mod url_codec;

pub use commands::{is_error_reply, CommandReply, DeviceCommand, ReplyError};
pub use framing::{Delimiter, DelimiterError, FrameScanner};
pub use ir_code::{convert_hex_to_native, is_hex_code, IrCodeError};
pub use sequence::IrTransactionCounter;
pub use url_codec::{decode_latin1, encode_latin1, UrlCodecError};
