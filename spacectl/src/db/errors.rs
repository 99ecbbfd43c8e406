use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when an `EXCLUDE` constraint rejects a row
const EXCLUSION_VIOLATION: &str = "23P01";

/// Unified error type for database operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
        /// The conflicting value that caused the violation (if extractable)
        conflicting_value: Option<String>,
    },

    /// Exclusion constraint violation, e.g. two active reservations overlapping
    #[error("Exclusion constraint violation")]
    ExclusionViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Check constraint violation
    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// True when the store rejected an overlapping active reservation
    pub fn is_exclusion_violation(&self) -> bool {
        matches!(self, DbError::ExclusionViolation { .. })
    }
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let constraint = db_err.constraint().map(|s| s.to_string());

                    let conflicting_value = match db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
                        Some(pg_err) => pg_err
                            .detail()
                            .and_then(|detail| extract_conflicting_subdomain(detail, constraint.as_deref())),
                        None => None,
                    };

                    DbError::UniqueViolation {
                        constraint,
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                        conflicting_value,
                    }
                } else if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION) {
                    DbError::ExclusionViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else {
                    // All other database errors are non-recoverable - convert to anyhow
                    DbError::Other(anyhow::Error::from(err))
                }
            }
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Extract the conflicting subdomain from a PostgreSQL unique violation detail.
/// Only applies to the tenant subdomain constraint.
fn extract_conflicting_subdomain(detail: &str, constraint: Option<&str>) -> Option<String> {
    if constraint != Some("tenants_subdomain_key") {
        return None;
    }
    // "Key (subdomain)=(acme) already exists."
    let start = detail.find("=(")?;
    let end = detail[start + 2..].find(')')?;
    Some(detail[start + 2..start + 2 + end].to_string())
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_conflicting_subdomain() {
        assert_eq!(
            extract_conflicting_subdomain("Key (subdomain)=(acme) already exists.", Some("tenants_subdomain_key")),
            Some("acme".to_string())
        );
        assert_eq!(
            extract_conflicting_subdomain("Key (subdomain)=(acme) already exists.", Some("other_constraint")),
            None
        );
        assert_eq!(extract_conflicting_subdomain("garbage", Some("tenants_subdomain_key")), None);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::NotFound));
    }
}
