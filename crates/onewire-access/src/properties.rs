//! Java-style `.properties` text, decoded by `java-properties`

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::error::ConfigError;

/// A line that could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct MalformedLine {
    pub line: usize,
    pub reason: String,
}

impl From<java_properties::PropertiesError> for MalformedLine {
    fn from(e: java_properties::PropertiesError) -> Self {
        Self {
            line: e.line_number().unwrap_or(0),
            reason: e.to_string(),
        }
    }
}

/// Parsed key/value pairs; later duplicates win
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    pub fn parse(text: &str) -> Result<Self, MalformedLine> {
        let entries = java_properties::read(text.as_bytes())?;
        Ok(Self { entries })
    }

    /// Read and parse a file; a missing file is `Ok(None)`
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Self::parse(&text)
            .map(Some)
            .map_err(|malformed| ConfigError::Malformed {
                path: path.to_path_buf(),
                line: malformed.line,
                reason: malformed.reason,
            })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
