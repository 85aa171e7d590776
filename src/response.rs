//! Mock response types and status classification.
//!
//! Every public operation resolves to a `MockResponse`: a canned payload
//! document plus a status classification that maps onto the HTTP-analog
//! codes of the real service.

use serde::Serialize;
use serde_json::Value;

/// Status classification attached to every response.
///
/// - `Success` -> 200
/// - `MfaRequired` -> 201 (a challenge or delivery-method list follows)
/// - `Error` -> 402 (simulated domain fault; fully recoverable by retrying
///   with different inputs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    MfaRequired,
    Error,
}

impl StatusClass {
    /// HTTP-analog status code for this classification.
    #[inline]
    pub fn status_code(&self) -> u16 {
        match self {
            StatusClass::Success => 200,
            StatusClass::MfaRequired => 201,
            StatusClass::Error => 402,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Success => "success",
            StatusClass::MfaRequired => "mfa_required",
            StatusClass::Error => "error",
        }
    }
}

/// A canned response: payload document + status classification.
#[derive(Debug, Clone, Serialize)]
pub struct MockResponse {
    pub data: Value,
    pub status: StatusClass,
}

impl MockResponse {
    pub fn success(data: Value) -> Self {
        Self {
            data,
            status: StatusClass::Success,
        }
    }

    pub fn mfa_required(data: Value) -> Self {
        Self {
            data,
            status: StatusClass::MfaRequired,
        }
    }

    pub fn error(data: Value) -> Self {
        Self {
            data,
            status: StatusClass::Error,
        }
    }

    /// HTTP-analog status code (200 / 201 / 402).
    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status.status_code()
    }

    /// Continuation token attached to the payload, if any.
    pub fn token(&self) -> Option<&str> {
        self.data.get("access_token").and_then(Value::as_str)
    }
}
