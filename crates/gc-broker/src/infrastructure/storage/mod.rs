//! Storage infrastructure: files read from disk.
//!
//! - **`config`** – the TOML configuration of one controller.
//! - **`code_map`** – the MAP file that turns host command text into IR codes
//!   and serial payloads.

pub mod code_map;
pub mod config;
