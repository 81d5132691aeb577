//! Fleet API façade.
//!
//! This crate defines the backend contract the grid, picker and CLI depend on.
//! `HttpApi` talks to the REST backend; `MockApi` serves an in-memory dataset
//! for tests.

#![forbid(unsafe_code)]

use fleet_core::query::{QueryRequest, QueryResponse};
use fleet_core::{Collection, Row, RowId};
use serde::Deserialize;

mod config;
mod http;
mod mock;

pub use config::ApiConfig;
pub use http::HttpApi;
pub use mock::MockApi;

/// Client-side view of backend failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum FleetError {
    /// Network unreachable, connection reset, TLS failure.
    #[error("transport: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    /// Non-success response without a structured conflict body.
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    /// Structured conflict, e.g. delete blocked by dependents.
    #[error("conflict: {message}")]
    Conflict { code: Option<String>, message: String, ref_count: Option<u64> },
    /// Body could not be decoded.
    #[error("decode: {0}")]
    Decode(String),
    #[error("validation: {0}")]
    Validation(String),
}

impl FleetError {
    /// Transport-level failures the user can retry by re-triggering the action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::Transport(_) | FleetError::Timeout)
    }

    /// Delete blocked because other records still reference the target.
    pub fn needs_reassign(&self) -> bool {
        match self {
            FleetError::Conflict { code, ref_count, .. } => {
                code.as_deref() == Some("FK_CONSTRAINT") || ref_count.is_some()
            }
            _ => false,
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

/// Error body shape returned by the backend's exception mappers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    pub code: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub ref_count: Option<u64>,
}

impl ErrorBody {
    pub(crate) fn into_error(self, status: u16) -> FleetError {
        if status == 409 {
            let message = self.message.unwrap_or_else(|| "conflict".to_string());
            let code = self.code.or(self.error);
            let ref_count = match code.as_deref() {
                None | Some("FK_CONSTRAINT") => self.ref_count.or_else(|| first_number(&message)),
                Some(_) => self.ref_count,
            };
            return FleetError::Conflict { code, message, ref_count };
        }
        let message = self.message.unwrap_or_else(|| format!("HTTP {}", status));
        FleetError::Status { status, message }
    }
}

/// First integer in a human message ("referenced by 3 vehicles").
fn first_number(message: &str) -> Option<u64> {
    let re = regex::Regex::new(r"\d+").ok()?;
    re.find(message).and_then(|m| m.as_str().parse().ok())
}

/// Backend contract used by the grid (query), picker (search) and edit forms (mutations).
#[async_trait::async_trait]
pub trait FleetApi: Send + Sync {
    /// Fetch one window of rows under the given sort and filter.
    async fn query_rows(&self, collection: Collection, req: &QueryRequest) -> FleetResult<QueryResponse>;

    /// Reference search for typeahead suggestions.
    async fn search(&self, collection: Collection, query: &str, limit: usize) -> FleetResult<Vec<Row>>;

    async fn get(&self, collection: Collection, id: RowId) -> FleetResult<Row>;

    /// Create a record; returns the server-assigned id.
    async fn create(&self, collection: Collection, body: &serde_json::Value) -> FleetResult<RowId>;

    async fn update(&self, collection: Collection, id: RowId, body: &serde_json::Value) -> FleetResult<()>;

    /// Delete a record, optionally moving its dependents to `reassign_to` first.
    async fn delete(&self, collection: Collection, id: RowId, reassign_to: Option<RowId>) -> FleetResult<()>;

    /// Vehicle with the smallest distance travelled; `None` when no vehicle has one.
    async fn min_distance_vehicle(&self) -> FleetResult<Option<Row>>;

    /// Number of vehicles whose fuel consumption is strictly above `threshold`.
    async fn count_fuel_above(&self, threshold: f64) -> FleetResult<u64>;
}

/// Fuel thresholds must be finite and positive.
pub fn check_fuel_threshold(threshold: f64) -> FleetResult<()> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(FleetError::Validation(format!("fuel threshold must be a number > 0, got {}", threshold)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_body_maps_to_reassign_prompt() {
        let body = ErrorBody {
            code: Some("FK_CONSTRAINT".into()),
            message: Some("referenced by 3 vehicles".into()),
            ..Default::default()
        };
        let err = body.into_error(409);
        assert!(err.needs_reassign());
        assert_eq!(
            err,
            FleetError::Conflict {
                code: Some("FK_CONSTRAINT".into()),
                message: "referenced by 3 vehicles".into(),
                ref_count: Some(3)
            }
        );
    }

    #[test]
    fn non_conflict_status_is_generic() {
        let err = ErrorBody::default().into_error(500);
        assert_eq!(err, FleetError::Status { status: 500, message: "HTTP 500".into() });
        assert!(!err.needs_reassign());
        assert!(!err.is_retryable());
        assert!(FleetError::Timeout.is_retryable());
    }
}
