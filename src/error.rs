use std::time::Duration;

use crate::probe::InetReachability;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call error: {0}")]
    System(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Platform not supported: {0}")]
    Unsupported(String),

    #[error("Event source closed")]
    SourceClosed,

    /// The overall probing deadline elapsed before every candidate reported.
    /// Carries the results that did arrive so the caller can still use them.
    #[error("probe timed out after {elapsed:?}; received {received}/{expected} results")]
    ProbeTimeout {
        results: Vec<InetReachability>,
        received: usize,
        expected: usize,
        elapsed: Duration,
    },
}

impl Error {
    pub(crate) fn system<S: Into<String>>(msg: S) -> Self {
        Error::System(msg.into())
    }

    pub(crate) fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Error::InvalidData(msg.into())
    }

    #[allow(dead_code)]
    pub(crate) fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
