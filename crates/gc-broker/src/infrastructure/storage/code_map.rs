//! MAP file lookup of IR codes and serial payloads.
//!
//! The MAP file is a properties-style text file mapping host command text to
//! whatever the device should receive:
//!
//! ```text
//! # IR codes (hex or native)
//! POWER=0000 006D 0022 0002 0156 00AC 0015 0015
//! MUTE=38000,1,1,342,172,21,21
//!
//! ! serial payloads, URL-encoded
//! AMP_ON=PWR%3DON%0D
//! ```
//!
//! The file is read again on every lookup so edits take effect without a
//! restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors produced by a MAP file lookup.
#[derive(Debug, Error)]
pub enum CodeMapError {
    #[error("no MAP file is configured")]
    NotConfigured,

    #[error("could not read MAP file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command {key:?} not found in MAP file {path}")]
    NotFound { key: String, path: PathBuf },

    #[error("command {key:?} has an empty entry in MAP file {path}")]
    Empty { key: String, path: PathBuf },
}

/// A MAP file, identified by its path.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    path: Option<PathBuf>,
}

impl CodeMap {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the file and returns the entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeMapError`] if no file is configured, the file cannot be
    /// read, or `key` is missing or empty.
    pub async fn lookup(&self, key: &str) -> Result<String, CodeMapError> {
        let path = self.path.as_ref().ok_or(CodeMapError::NotConfigured)?;
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CodeMapError::Io {
                path: path.clone(),
                source,
            })?;

        match parse_map(&content).remove(key) {
            Some(value) if value.is_empty() => Err(CodeMapError::Empty {
                key: key.to_string(),
                path: path.clone(),
            }),
            Some(value) => {
                debug!("MAP entry for {key}: {value}");
                Ok(value)
            }
            None => Err(CodeMapError::NotFound {
                key: key.to_string(),
                path: path.clone(),
            }),
        }
    }
}

/// Parses `key=value` lines.
///
/// Blank lines and lines starting with `#` or `!` are ignored.  Keys and
/// values are trimmed; a value may itself contain `=`.  Later entries
/// replace earlier ones.
pub fn parse_map(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
