//! # Errors
//!
//! Crate-wide error type returned by both reconcilers.
//!
//! The error policy looks at the variant to decide how to retry: validation
//! failures and unrecoverable release states wait for the object to change,
//! conflicts retry quickly, everything else backs off.

use crate::chart::ChartError;
use crate::client::ClientError;
use crate::values::ValuesError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The custom resource is invalid as written; retrying will not help
    #[error("invalid resource: {0}")]
    Validation(String),

    #[error(transparent)]
    Values(#[from] ValuesError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Errors that only a change to the object can fix.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Error::Validation(_) => true,
            Error::Chart(e) => e.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Client(ClientError::Conflict(_)))
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Client(ClientError::Unavailable(_)))
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Values(_) => "values",
            Error::Chart(_) => "chart",
            Error::Client(ClientError::Conflict(_)) => "conflict",
            Error::Client(ClientError::Unavailable(_)) => "unavailable",
            Error::Client(_) => "client",
            Error::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
