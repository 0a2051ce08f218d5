//! Domain errors raised while answering a dashboard query.
//!
//! Loading failures stay in `anyhow`; these are the failures a user can
//! trigger by picking a selector value that does not exist.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DashboardError {
    #[error("unknown crime type: {0}")]
    UnknownCrimeType(String),

    #[error("unknown period: {0}")]
    UnknownPeriod(String),

    #[error("period {anchor} has only {available} older periods, a full window needs 11")]
    IncompleteWindow { anchor: String, available: usize },

    #[error("unknown map view: {0}")]
    UnknownView(String),

    #[error("invalid period label: {0}")]
    InvalidPeriodLabel(String),
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownView(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
