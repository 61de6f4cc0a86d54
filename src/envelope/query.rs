use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a query did not produce a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFailure {
    /// No reply arrived before the request timeout.
    Timeout,
    /// No subscriber matched the query topic; resolved immediately.
    NoResponder,
    /// The bus stopped while the request was waiting.
    Cancelled,
}

impl QueryFailure {
    /// Stable human-readable form (`"timeout"`, `"no responder"`, `"cancelled"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryFailure::Timeout => "timeout",
            QueryFailure::NoResponder => "no responder",
            QueryFailure::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `request()`.
///
/// Expected failures (timeout, nobody listening) are values, not errors, so
/// callers have to look at `ok`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// `true` when a reply arrived.
    pub ok: bool,
    /// The reply payload, exactly as the responder sent it.
    pub data: Option<Value>,
    /// Set when `ok` is `false`.
    pub error: Option<QueryFailure>,
}

impl QueryResult {
    /// A successful reply.
    pub fn reply(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed request.
    pub fn failed(reason: QueryFailure) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(reason),
        }
    }

    /// Converts into a `Result` for `?`-style callers.
    ///
    /// # Example
    /// ```
    /// use serde_json::json;
    /// use switchboard::{QueryFailure, QueryResult};
    ///
    /// assert_eq!(QueryResult::reply(json!(3)).into_result(), Ok(json!(3)));
    /// assert_eq!(
    ///     QueryResult::failed(QueryFailure::Timeout).into_result(),
    ///     Err(QueryFailure::Timeout)
    /// );
    /// ```
    pub fn into_result(self) -> Result<Value, QueryFailure> {
        match (self.ok, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (true, None, _) => Ok(Value::Null),
            (false, _, err) => Err(err.unwrap_or(QueryFailure::Cancelled)),
        }
    }
}
