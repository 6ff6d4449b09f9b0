//! Error types for counter and process reads

use crate::models::SourceKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{} unavailable: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("{kind} counter went backwards")]
    CounterReset { kind: SourceKind },

    #[error("no usable counter source ({})", attempts.join("; "))]
    AllSourcesExhausted { attempts: Vec<String> },
}

impl ReadError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ReadError::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Errors that send the tiered source on to the next tier
    pub fn is_fallthrough(&self) -> bool {
        matches!(self, ReadError::FileUnavailable { .. } | ReadError::Parse { .. })
    }
}

/// Read a whole kernel file, mapping I/O failures to `FileUnavailable`
pub(crate) async fn read_file(path: PathBuf) -> Result<String, ReadError> {
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(source) => Err(ReadError::FileUnavailable { path, source }),
    }
}
