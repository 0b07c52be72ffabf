//! Configuration errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reading a properties file.
///
/// These never abort a lookup: the file is logged and treated as missing.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read properties file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed properties file {}: line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
