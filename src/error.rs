//! ==============================================================================
//! error.rs - error taxonomy for telemetry sources and the presenter
//! ==============================================================================
//!
//! purpose:
//!     source failures are typed so the presenter can turn them into
//!     notifications instead of letting them escape. field-level decode
//!     problems never show up here: they degrade to "unavailable" inside
//!     domain.rs.
//!
//! relationships:
//!     - used by: source/* (fetch and subscription failures)
//!     - used by: presenter.rs (start/stop preconditions)
//!
//! ==============================================================================

use thiserror::Error;

/// failure reported by a telemetry source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// network or store unreachable, non-2xx status, stream closed
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// payload shape unexpected as a whole (not an array / object)
    #[error("decode failure: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Unavailable(e.to_string())
        }
    }
}

/// presenter lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("presenter already started")]
    AlreadyStarted,
    #[error("dashboard stopped")]
    Stopped,
}
