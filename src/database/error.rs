use crate::payments::types::TransactionState;
use std::fmt;

/// Storage-layer failure.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// Unique constraint on the transaction reference was hit.
    DuplicateReference { reference: String },
    /// Conditional transition lost: the row is not in the expected state.
    StaleState {
        reference: String,
        expected: String,
        actual: String,
    },
    /// Requested move is not an edge of the transaction lifecycle.
    InvalidTransition {
        reference: String,
        from: TransactionState,
        to: TransactionState,
    },
    UniqueViolation { constraint: String },
    ConnectionError { message: String },
    PoolExhausted,
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        })
    }

    /// Rejects moves the lifecycle does not allow, before any row is read.
    pub fn check_transition(
        reference: &str,
        from: TransactionState,
        to: TransactionState,
    ) -> Result<(), Self> {
        if from.can_transition_to(to) {
            return Ok(());
        }
        Err(Self::new(DatabaseErrorKind::InvalidTransition {
            reference: reference.to_string(),
            from,
            to,
        }))
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolExhausted
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            DatabaseErrorKind::DuplicateReference { reference } => {
                write!(f, "duplicate transaction reference: {}", reference)
            }
            DatabaseErrorKind::StaleState {
                reference,
                expected,
                actual,
            } => write!(
                f,
                "stale state for {}: expected {}, found {}",
                reference, expected, actual
            ),
            DatabaseErrorKind::InvalidTransition {
                reference,
                from,
                to,
            } => write!(f, "illegal transition for {}: {} -> {}", reference, from, to),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::PoolExhausted => write!(f, "database pool exhausted"),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "quote" => {
                AppErrorKind::Domain(DomainError::QuoteNotFound { quote_id: id })
            }
            DatabaseErrorKind::NotFound { id, .. } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { reference: id })
            }
            DatabaseErrorKind::DuplicateReference { reference } => {
                AppErrorKind::Domain(DomainError::DuplicateReference { reference })
            }
            DatabaseErrorKind::StaleState { reference, .. } => {
                AppErrorKind::Domain(DomainError::StaleState { reference })
            }
            DatabaseErrorKind::InvalidTransition {
                reference,
                from,
                to,
            } => AppErrorKind::Domain(DomainError::InvalidTransition {
                reference,
                from: from.to_string(),
                to: to.to_string(),
            }),
            other => {
                let err = DatabaseError::new(other);
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: err.to_string(),
                    is_retryable: err.is_retryable(),
                })
            }
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorCode};

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }

    #[test]
    fn stale_state_converts_to_conflict() {
        let app: AppError = DatabaseError::new(DatabaseErrorKind::StaleState {
            reference: "QP_1".to_string(),
            expected: "pending".to_string(),
            actual: "completed".to_string(),
        })
        .into();
        assert_eq!(app.status_code(), 409);
        assert_eq!(app.error_code(), ErrorCode::StaleState);
    }

    #[test]
    fn lifecycle_edges_are_checked() {
        assert!(DatabaseError::check_transition(
            "QP_1",
            TransactionState::Completed,
            TransactionState::Refunded
        )
        .is_ok());

        let err = DatabaseError::check_transition(
            "QP_1",
            TransactionState::Failed,
            TransactionState::Completed,
        )
        .unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::InvalidTransition { .. }));
        let app: AppError = err.into();
        assert_eq!(app.error_code(), ErrorCode::InvalidTransition);
        assert_eq!(app.status_code(), 409);
    }

    #[test]
    fn missing_quote_converts_to_quote_not_found() {
        let app: AppError = DatabaseError::not_found("quote", "q-1").into();
        assert_eq!(app.error_code(), ErrorCode::QuoteNotFound);
    }
}
