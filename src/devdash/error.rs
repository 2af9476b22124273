// devdash - Caching API proxy for a weather, GitHub, and AI developer dashboard
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a call to one of the upstream services (or to the proxy itself).
///
/// Variants map one-to-one onto the failure kinds the HTTP layer knows how to
/// translate into a status code. See `http::ApiError` for that mapping.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("authentication failed for {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by upstream for {0}")]
    RateLimited(String),

    #[error("unexpected status {0} for {1}")]
    Upstream(StatusCode, String),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("malformed response from {0}")]
    MalformedResponse(String),

    #[error("{0} is not configured")]
    Configuration(&'static str),

    #[error("all {0} requests failed")]
    Batch(usize),
}

impl ClientError {
    /// Map a non-success upstream status into the matching error kind.
    pub fn from_status<S: Into<String>>(status: StatusCode, target: S) -> Self {
        let target = target.into();
        match status {
            StatusCode::UNAUTHORIZED => Self::Auth(target),
            StatusCode::NOT_FOUND => Self::NotFound(target),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(target),
            _ => Self::Upstream(status, target),
        }
    }

    /// Map a transport level error. Errors carrying a status were produced by
    /// `error_for_status` and are classified like any other status.
    pub fn from_reqwest<S: Into<String>>(err: reqwest::Error, target: S) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(target.into())
        } else if let Some(status) = err.status() {
            Self::from_status(status, target)
        } else {
            Self::Network(err)
        }
    }

    /// Short, stable name for the kind of error, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::RateLimited(_) => "rate_limited",
            Self::Upstream(_, _) => "upstream",
            Self::Network(_) => "network",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Configuration(_) => "configuration",
            Self::Batch(_) => "batch",
        }
    }
}

/// Failure reading or writing one of the client side key/value stores.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
