//! The `{response, messages}` wrapper every Data API reply uses.
//!
//! # Design
//! Decoding happens in two steps so that every operation branches the same
//! way: [`parse`] checks the shape (valid JSON, non-empty `messages`) and
//! [`Envelope::into_success`] applies the status rule. Only the first
//! message's code counts; `"0"` is success and everything else is surfaced
//! as [`ApiError::Service`] with code and message untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiError, Result};

/// Vendor status codes this crate gives meaning to.
pub mod codes {
    /// The only success sentinel.
    pub const OK: &str = "0";
    /// Returned by `_find` when the query matched nothing.
    pub const NO_RECORDS_MATCH: &str = "401";
}

/// One entry of the `messages` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Message {
    pub fn is_success(&self) -> bool {
        self.code == codes::OK
    }

    fn into_service_error(self) -> ApiError {
        ApiError::Service {
            code: self.code,
            message: self.message,
        }
    }
}

/// A decoded reply: the endpoint-specific `response` plus its messages.
///
/// Only [`parse`] builds one, so `messages` is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    response: T,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct Wire {
    #[serde(default = "empty_object")]
    response: Value,
    messages: Option<Vec<Message>>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Check the envelope shape without looking at the status code.
pub fn parse(body: &str) -> Result<Envelope<Value>> {
    let wire: Wire = serde_json::from_str(body)
        .map_err(|e| ApiError::MalformedResponse(format!("invalid envelope: {e}")))?;
    let messages = wire
        .messages
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::MalformedResponse("envelope has no messages".to_string()))?;
    let response = if wire.response.is_null() { empty_object() } else { wire.response };
    tracing::debug!(code = %messages[0].code, "decoded envelope");
    Ok(Envelope { response, messages })
}

/// Parse and require success, decoding `response` into `T`.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    parse(body)?.into_success()?.decode()
}

/// Parse and require success, discarding the response payload.
pub fn expect_success(body: &str) -> Result<()> {
    parse(body)?.into_success().map(|_| ())
}

impl<T> Envelope<T> {
    pub fn response(&self) -> &T {
        &self.response
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The authoritative message (the first one).
    pub fn status(&self) -> &Message {
        &self.messages[0]
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// Keep the envelope on code `"0"`, otherwise turn it into a service error.
    pub fn into_success(mut self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.messages.swap_remove(0).into_service_error())
        }
    }
}

impl Envelope<Value> {
    /// Decode the raw `response` object into an endpoint-specific shape.
    /// Missing required fields are reported as malformed.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.response)
            .map_err(|e| ApiError::MalformedResponse(format!("unexpected response shape: {e}")))
    }
}
