use std::sync::Arc;

use thiserror::Error;

use crate::fetch::FetchError;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache operations.
///
/// Best-effort operations (bulk population, storing during a fetch) never
/// surface storage failures through this type; they report `false` instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing {0}")]
    MissingHeader(&'static str),

    #[error("invalid date in {header} header: {value:?}")]
    InvalidDate { header: &'static str, value: String },

    #[error("invalid number in {directive} directive: {value:?}")]
    InvalidNumber {
        directive: &'static str,
        value: String,
    },

    #[error("no entry for {url} in cache {cache}")]
    NotFound { cache: String, url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to open cache {name}: {cause:#}")]
    Open {
        name: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("cache storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl CacheError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Stable identifier used in serialized replies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::MissingHeader(_) => "missing_header",
            Self::InvalidDate { .. } => "invalid_date",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::NotFound { .. } => "not_found",
            Self::Fetch(_) => "fetch",
            Self::Open { .. } => "open",
            Self::Storage(_) => "storage",
        }
    }

    /// True for errors produced by header policy checks on malformed input.
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::MissingHeader(_)
                | Self::InvalidDate { .. }
                | Self::InvalidNumber { .. }
        )
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}
