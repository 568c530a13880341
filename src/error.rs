use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// The store could not be reached or failed to run a statement.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] tokio_rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Only storage failures are worth retrying from the scheduler.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }

    pub fn not_found(what: &str, id: i64) -> Self {
        AppError::NotFound(format!("{} {}", what, id))
    }
}

/// Constraint failures are caused by the input, not by the store, so they
/// are not reported as storage outages.
impl From<tokio_rusqlite::Error> for AppError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, message)) =
            &err
        {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = message.clone().unwrap_or_else(|| failure.to_string());
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                    return AppError::NotFound(detail);
                }
                return AppError::Validation(detail);
            }
        }
        AppError::StorageUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_errors_are_retryable() {
        let storage = AppError::StorageUnavailable(tokio_rusqlite::Error::ConnectionClosed);
        assert!(storage.is_retryable());
        assert!(!AppError::not_found("episode", 7).is_retryable());
        assert!(!AppError::Validation("cap must be positive".into()).is_retryable());
    }

    fn sqlite_failure(extended_code: i32, message: &str) -> tokio_rusqlite::Error {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(extended_code),
            Some(message.to_string()),
        ))
    }

    #[test]
    fn constraint_failures_are_not_storage_outages() {
        let check: AppError =
            sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK, "CHECK constraint failed").into();
        let unique: AppError =
            sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE, "UNIQUE constraint failed").into();
        let foreign: AppError =
            sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY, "FOREIGN KEY constraint failed")
                .into();
        let busy: AppError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY, "database is locked").into();

        assert!(matches!(check, AppError::Validation(_)));
        assert!(matches!(unique, AppError::Validation(_)));
        assert!(matches!(foreign, AppError::NotFound(_)));
        assert!(!check.is_retryable() && !unique.is_retryable() && !foreign.is_retryable());
        assert!(matches!(busy, AppError::StorageUnavailable(_)));
        assert!(busy.is_retryable());
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = AppError::not_found("user", 42);
        assert_eq!(err.to_string(), "Not found: user 42");
    }
}
