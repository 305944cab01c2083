//! Vendor status codes reported by the mock, rendered as envelopes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// A failed call, as the Data API would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    InvalidAccount,
    InvalidToken,
    NoRecordsMatch,
    RecordMissing,
    FieldMissing,
    ScriptMissing,
    LayoutMissing,
    ModIdMismatch,
    DatabaseMissing,
    InvalidParameter,
}

impl Fault {
    pub fn code(self) -> &'static str {
        match self {
            Fault::InvalidAccount => "212",
            Fault::InvalidToken => "952",
            Fault::NoRecordsMatch => "401",
            Fault::RecordMissing => "101",
            Fault::FieldMissing => "102",
            Fault::ScriptMissing => "104",
            Fault::LayoutMissing => "105",
            Fault::ModIdMismatch => "306",
            Fault::DatabaseMissing => "802",
            Fault::InvalidParameter => "960",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Fault::InvalidAccount => "Invalid user account and/or password; please try again",
            Fault::InvalidToken => "Invalid FileMaker Data API token (*)",
            Fault::NoRecordsMatch => "No records match the request",
            Fault::RecordMissing => "Record is missing",
            Fault::FieldMissing => "Field is missing",
            Fault::ScriptMissing => "Script is missing",
            Fault::LayoutMissing => "Layout is missing",
            Fault::ModIdMismatch => "Record modification ID does not match",
            Fault::DatabaseMissing => "Unable to open file",
            Fault::InvalidParameter => "Parameter is invalid",
        }
    }

    /// The real service's HTTP statuses are loose; clients must not rely on them.
    pub fn status(self) -> StatusCode {
        match self {
            Fault::InvalidAccount | Fault::InvalidToken => StatusCode::UNAUTHORIZED,
            Fault::InvalidParameter => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Fault {
    fn into_response(self) -> Response {
        let body = json!({
            "response": {},
            "messages": [{"code": self.code(), "message": self.message()}]
        });
        (self.status(), Json(body)).into_response()
    }
}
