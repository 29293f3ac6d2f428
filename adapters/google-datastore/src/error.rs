//! Mapping of HTTP, transport, and auth failures onto `NotebookError`.

use google_auth::AuthError;
use notebook::NotebookError;
use serde::Deserialize;

/// gRPC status names Datastore reports for conditions worth retrying.
const TRANSIENT_STATUSES: &[&str] = &[
    "UNAVAILABLE",
    "ABORTED",
    "DEADLINE_EXCEEDED",
    "RESOURCE_EXHAUSTED",
    "INTERNAL",
];

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Classify a non-2xx response from `method`.
pub fn classify_http(method: &str, status: u16, body: &str) -> NotebookError {
    let parsed: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let detail = if parsed.error.message.is_empty() {
        body.trim().to_string()
    } else {
        parsed.error.message
    };
    let label = if parsed.error.status.is_empty() {
        status.to_string()
    } else {
        format!("{} {}", status, parsed.error.status)
    };
    let msg = format!("{method}: {label}: {detail}");

    let transient_status = matches!(status, 429 | 500 | 502 | 503 | 504);
    if transient_status || TRANSIENT_STATUSES.contains(&parsed.error.status.as_str()) {
        NotebookError::TransientStore(msg)
    } else {
        NotebookError::StoreUnavailable(msg)
    }
}

pub fn map_transport_err(method: &str, e: reqwest::Error) -> NotebookError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        NotebookError::TransientStore(format!("{method}: {e}"))
    } else {
        NotebookError::StoreUnavailable(format!("{method}: {e}"))
    }
}

pub fn map_auth_err(e: AuthError) -> NotebookError {
    if e.is_transient() {
        NotebookError::TransientStore(format!("access token: {e}"))
    } else {
        NotebookError::StoreUnavailable(format!("access token: {e}"))
    }
}
