//! RPC Error Types
//!
//! Maps application errors to stable JSON-RPC error codes.

use gearflow_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    /// Lost a compare-and-swap race; safe to retry
    pub const CONFLICT: i32 = 4002;
    pub const STATE_ILLEGAL: i32 = 4003;
    pub const PERMISSION_DENIED: i32 = 4004;
    pub const PRECONDITION_FAILED: i32 = 4005;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const DB_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = if err.is_state_illegal() {
        code::STATE_ILLEGAL
    } else {
        match &err {
            AppError::Validation(_) | AppError::Serialization(_) | AppError::Domain(_) => {
                code::VALIDATION_ERROR
            }
            AppError::NotFound(_) => code::NOT_FOUND,
            AppError::Conflict(_) => code::CONFLICT,
            AppError::Permission(_) => code::PERMISSION_DENIED,
            AppError::PreconditionFailed(_) => code::PRECONDITION_FAILED,
            AppError::Database(_) => code::DB_ERROR,
            AppError::Config(_) | AppError::Internal(_) | AppError::InvalidState(_) => {
                code::INTERNAL_ERROR
            }
        }
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}
