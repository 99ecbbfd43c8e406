use crate::db::errors::DbError;
use crate::db::models::reservations::ReservationStatus;
use crate::types::{PoolClass, ReservationId};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No connection became available within the pool's wait timeout.
    /// Transient: callers may retry with backoff.
    #[error("Connection pool '{class}' exhausted")]
    PoolExhausted { class: PoolClass },

    /// The backing store is unreachable or the session could not be prepared
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Malformed interval or rule window, rejected before touching the store
    #[error("Invalid interval: {message}")]
    InvalidInterval { message: String },

    /// Requested entity not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Reservation status transition that the lifecycle does not allow
    #[error("Reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Build the error for a failed pool acquisition.
    ///
    /// Timeouts become [`Error::PoolExhausted`]; everything else that prevents
    /// getting a usable connection becomes [`Error::Connection`].
    pub fn from_acquire(class: PoolClass, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Error::PoolExhausted { class },
            other => Error::Connection {
                message: format!("{class} pool: {other}"),
            },
        }
    }

    /// Whether the caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. } | Error::Connection { .. })
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::PoolExhausted { .. } => "Service is busy, please retry shortly".to_string(),
            Error::Connection { .. } => "Service temporarily unavailable".to_string(),
            Error::InvalidInterval { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::InvalidTransition { from, to, .. } => format!("Reservation cannot move from {from} to {to}"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation {
                    table, conflicting_value, ..
                } => match (table.as_deref(), conflicting_value) {
                    (Some("tenants"), Some(subdomain)) => format!("Subdomain '{subdomain}' is already taken"),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ExclusionViolation { .. } => "The requested slot is already taken".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

/// Connectivity failures surface as [`Error::Connection`]; everything else is
/// categorised by [`DbError`].
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => Error::Connection {
                message: err.to_string(),
            },
            other => Error::Database(DbError::from(other)),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let err = Error::from_acquire(PoolClass::Interactive, sqlx::Error::PoolTimedOut);
        assert!(matches!(err, Error::PoolExhausted { class: PoolClass::Interactive }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_closed_pool_maps_to_connection_error() {
        let err = Error::from_acquire(PoolClass::Background, sqlx::Error::PoolClosed);
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.to_string().contains("background"));
    }

    #[test]
    fn test_invalid_interval_is_not_retryable() {
        let err = Error::InvalidInterval {
            message: "end must be after start".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.user_message(), "end must be after start");
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::Other(anyhow::anyhow!("secret connection string leaked"));
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn test_subdomain_conflict_message() {
        let err = Error::Database(DbError::UniqueViolation {
            constraint: Some("tenants_subdomain_key".to_string()),
            table: Some("tenants".to_string()),
            message: "duplicate key".to_string(),
            conflicting_value: Some("acme".to_string()),
        });
        assert_eq!(err.user_message(), "Subdomain 'acme' is already taken");
    }
}
