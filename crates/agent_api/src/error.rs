use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum AgentApiError {
    MissingToken,
    Request(reqwest::Error),
    Status(StatusCode, String),
    /// Billing or payment rejection; surfaced distinctly so callers can
    /// show a payment-specific message instead of a generic failure.
    Billing {
        message: String,
    },
    /// The backend does not know this run; a permanent condition.
    RunNotFound {
        run_id: String,
    },
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    Serde(JsonError),
    Unknown(String),
}

impl AgentApiError {
    /// True for authorization failures that must not be retried.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::MissingToken
                | Self::Status(StatusCode::UNAUTHORIZED, _)
                | Self::Status(StatusCode::FORBIDDEN, _)
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

impl ErrorPayloadFields {
    fn code_or_type(&self) -> &str {
        self.code
            .as_deref()
            .and_then(non_empty_string)
            .or_else(|| self.type_.as_deref().and_then(non_empty_string))
            .unwrap_or("")
    }
}

impl fmt::Display for AgentApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "bearer token is required"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Billing { message } => write!(f, "billing rejected: {message}"),
            Self::RunNotFound { run_id } => write!(f, "agent run '{run_id}' not found"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error:?})"
                )
            }
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AgentApiError {}

impl From<reqwest::Error> for AgentApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for AgentApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a human-readable error message from an HTTP error body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let parsed = match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload,
        Err(_) => return fallback_message(status, body),
    };

    if let Some(error) = parsed.value {
        if let Some(message) = error.message.as_deref().and_then(non_empty_string) {
            return message.to_owned();
        }
    }

    fallback_message(status, body)
}

/// Classify a payment-rejected response into the billing error class.
///
/// Billing is matched on HTTP 402 or the backend's explicit billing
/// error codes, whichever arrives.
pub fn billing_error(status: StatusCode, body: &str) -> Option<AgentApiError> {
    let code = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.value)
        .map(|fields| fields.code_or_type().to_ascii_lowercase())
        .unwrap_or_default();

    let is_billing = status == StatusCode::PAYMENT_REQUIRED
        || code == "billing_required"
        || code == "payment_required";
    if !is_billing {
        return None;
    }

    Some(AgentApiError::Billing {
        message: parse_error_message(status, body),
    })
}

fn fallback_message(status: StatusCode, body: &str) -> String {
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
