// sqlx error mapping
// Orphan rules keep `From<sqlx::Error> for AppError` out of reach, so every
// adapter maps through this function instead.

use quarry_core::error::AppError;

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes
const TRANSIENT_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
const UNIQUE_CODES: &[&str] = &["2067", "1555"];

pub(crate) fn map_sqlx_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::RowNotFound => AppError::NotFound(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => AppError::TransientStore(e.to_string()),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            let code = code.as_deref().unwrap_or_default();
            if TRANSIENT_CODES.contains(&code) {
                AppError::TransientStore(db_err.message().to_string())
            } else if UNIQUE_CODES.contains(&code) {
                AppError::Conflict(db_err.message().to_string())
            } else {
                AppError::Database(db_err.message().to_string())
            }
        }
        _ => AppError::Database(e.to_string()),
    }
}
