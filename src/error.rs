//! # Error Types
//!
//! Structured errors for the conversion workflow and the classification the job
//! runner uses to decide between retrying, dead-lettering and giving up.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigurationError;

/// Postgres SQLSTATE codes that indicate contention rather than a bad request
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57014"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NavetteError {
    /// Matched items were ordered by more than one doctor and no selection was made
    #[error("Items of fiche navette {fiche_navette_id} span multiple doctors: {doctor_ids:?}")]
    MultipleDoctors {
        fiche_navette_id: i64,
        package_id: i64,
        doctor_ids: Vec<i64>,
    },
    #[error("Doctor {doctor_id} is not one of the conflicting doctors {doctor_ids:?}")]
    InvalidDoctorSelection { doctor_id: i64, doctor_ids: Vec<i64> },
    #[error("Stale item state on fiche navette {fiche_navette_id}: {reason}")]
    StaleItemState {
        fiche_navette_id: i64,
        item_ids: Vec<i64>,
        reason: String,
    },
    #[error("Fiche navette {0} not found")]
    RequestNotFound(i64),
    #[error("Prestation package {0} not found")]
    PackageNotFound(i64),
    #[error("Item {item_id} not found on fiche navette {fiche_navette_id}")]
    ItemNotFound { fiche_navette_id: i64, item_id: i64 },
    #[error("Total of fiche navette {fiche_navette_id} would become negative ({computed})")]
    NegativeTotal {
        fiche_navette_id: i64,
        computed: Decimal,
    },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Event error: {0}")]
    Event(String),
}

/// How a failure should be treated by callers and by the job runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The user can fix it (422-equivalent), never retried automatically
    ClientCorrectable,
    /// Precondition no longer holds, retrying cannot help
    StaleState,
    /// Contention or connectivity, retried with backoff
    Transient,
    /// Missing data or programmer error, fail fast
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::ClientCorrectable => write!(f, "client_correctable"),
            ErrorCategory::StaleState => write!(f, "stale_state"),
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

impl NavetteError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            NavetteError::MultipleDoctors { .. }
            | NavetteError::InvalidDoctorSelection { .. }
            | NavetteError::Validation(_) => ErrorCategory::ClientCorrectable,
            NavetteError::StaleItemState { .. } | NavetteError::ItemNotFound { .. } => {
                ErrorCategory::StaleState
            }
            NavetteError::Transient(_) => ErrorCategory::Transient,
            NavetteError::RequestNotFound(_)
            | NavetteError::PackageNotFound(_)
            | NavetteError::NegativeTotal { .. }
            | NavetteError::Database(_)
            | NavetteError::Configuration(_)
            | NavetteError::Queue(_)
            | NavetteError::Event(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Short machine-readable code for logs and dead-letter records
    pub fn error_code(&self) -> &'static str {
        match self {
            NavetteError::MultipleDoctors { .. } => "multiple_doctors",
            NavetteError::InvalidDoctorSelection { .. } => "invalid_doctor_selection",
            NavetteError::StaleItemState { .. } => "stale_item_state",
            NavetteError::RequestNotFound(_) => "request_not_found",
            NavetteError::PackageNotFound(_) => "package_not_found",
            NavetteError::ItemNotFound { .. } => "item_not_found",
            NavetteError::NegativeTotal { .. } => "negative_total",
            NavetteError::Database(_) => "database",
            NavetteError::Transient(_) => "transient",
            NavetteError::Validation(_) => "validation",
            NavetteError::Configuration(_) => "configuration",
            NavetteError::Queue(_) => "queue",
            NavetteError::Event(_) => "event",
        }
    }
}

impl From<sqlx::Error> for NavetteError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                NavetteError::Transient(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if TRANSIENT_SQLSTATES.contains(&code.as_ref()) => {
                    NavetteError::Transient(err.to_string())
                }
                _ => NavetteError::Database(err.to_string()),
            },
            _ => NavetteError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for NavetteError {
    fn from(error: serde_json::Error) -> Self {
        NavetteError::Event(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for NavetteError {
    fn from(error: ConfigurationError) -> Self {
        NavetteError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavetteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_doctors_is_client_correctable() {
        let err = NavetteError::MultipleDoctors {
            fiche_navette_id: 7,
            package_id: 100,
            doctor_ids: vec![3, 9],
        };
        assert_eq!(err.category(), ErrorCategory::ClientCorrectable);
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "multiple_doctors");
        assert!(err.to_string().contains("[3, 9]"));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(NavetteError::Transient("lock timeout".into()).is_retryable());
        assert!(!NavetteError::RequestNotFound(1).is_retryable());
        assert!(!NavetteError::PackageNotFound(1).is_retryable());
        assert!(!NavetteError::StaleItemState {
            fiche_navette_id: 1,
            item_ids: vec![2],
            reason: "paid".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_transient() {
        let err: NavetteError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err: NavetteError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.category(), ErrorCategory::Permanent);
    }
}
