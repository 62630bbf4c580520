// sqlx::Error -> AppError mapping
//
// Orphan rules keep `From<sqlx::Error> for AppError` out of reach, so every
// adapter maps explicitly.

use gearflow_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return AppError::Database(format!("Database error: {}", db_err.message()));
            };

            // SQLite extended result codes: https://www.sqlite.org/rescode.html
            match code.as_ref() {
                // UNIQUE / PRIMARY KEY constraint
                "2067" | "1555" => {
                    AppError::Conflict(format!("Duplicate record: {}", db_err.message()))
                }
                "787" | "3850" => AppError::Database(format!(
                    "Foreign key constraint violation: {} ({})",
                    db_err.message(),
                    code
                )),
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                other => AppError::Database(format!(
                    "Database error [{}]: {}",
                    other,
                    db_err.message()
                )),
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// Decode a JSON document column into a domain value
pub(crate) fn decode<T: serde::de::DeserializeOwned>(document: &str) -> Result<T, AppError> {
    Ok(serde_json::from_str(document)?)
}

/// Encode a domain value for a JSON document column
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    Ok(serde_json::to_string(value)?)
}
