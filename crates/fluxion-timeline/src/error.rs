// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Error taxonomy for the timeline engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::view::TabKind;

/// Failure at the fetch boundary (forecast API).
///
/// `Clone` because one coalesced fetch result is handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// HTTP 401/403. Terminal, never retried.
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    /// HTTP >= 500 or a network failure, surfaced after retries ran out
    #[error("temporarily unavailable after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// Any other HTTP 4xx. Not retried.
    #[error("request rejected (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },

    /// Response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors produced by the engine itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The tab has zero intervals or zero mode blocks. Not a failure: renderers show an empty state.
    #[error("no timeline data for {0}")]
    MissingData(TabKind),

    #[error("interval at {0} is out of timestamp order")]
    OutOfOrder(DateTime<Utc>),

    #[error("duplicate interval at {0}")]
    DuplicateInterval(DateTime<Utc>),

    #[error("interval status moves backwards at {0}")]
    StatusRegression(DateTime<Utc>),

    #[error("invalid interval timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type TimelineResult<T> = std::result::Result<T, TimelineError>;

/// What a renderer should show for a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    Ready,
    /// Explicit empty state, distinct from the error states
    Empty,
    Unauthorized,
    TemporarilyUnavailable,
    Unavailable,
}

impl TimelineError {
    pub fn view_state(&self) -> ViewState {
        match self {
            Self::Fetch(FetchError::Auth { .. }) => ViewState::Unauthorized,
            Self::Fetch(FetchError::Transient { .. }) => ViewState::TemporarilyUnavailable,
            Self::MissingData(_) => ViewState::Empty,
            Self::Fetch(FetchError::Permanent { .. } | FetchError::Decode(_))
            | Self::OutOfOrder(_)
            | Self::DuplicateInterval(_)
            | Self::StatusRegression(_)
            | Self::InvalidTimestamp(_) => ViewState::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_state_mapping() {
        assert_eq!(
            TimelineError::from(FetchError::Auth { status: 401 }).view_state(),
            ViewState::Unauthorized
        );
        assert_eq!(
            TimelineError::from(FetchError::Transient {
                attempts: 4,
                message: "boom".to_owned()
            })
            .view_state(),
            ViewState::TemporarilyUnavailable
        );
        assert_eq!(
            TimelineError::from(FetchError::Permanent {
                status: 404,
                message: String::new()
            })
            .view_state(),
            ViewState::Unavailable
        );
        assert_eq!(
            TimelineError::MissingData(TabKind::Today).view_state(),
            ViewState::Empty
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(
            FetchError::Transient {
                attempts: 1,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!FetchError::Auth { status: 403 }.is_retryable());
        assert!(!FetchError::Decode("x".to_owned()).is_retryable());
    }
}
