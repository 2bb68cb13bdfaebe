//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::contracts::ContractError;
use crate::rpc_client::RpcError;
use crate::transaction_composer::{FailureKind, TransactionError};

/// API Error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub request_id: String,
    pub timestamp: i64,
}

/// Error detail structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub help: Option<String>,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    // Client errors (4xx)
    InvalidAddress { address: String },
    NotFound(String),

    // Server errors (5xx)
    Internal(String),
    ExternalServiceError { service: String, error: String },
    PriceUnavailable(String),

    // Chain errors
    BlockchainError(String),
    TransactionFailed { hash: Option<String>, error: String, kind: FailureKind },
}

impl AppError {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidAddress { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
            AppError::PriceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            AppError::BlockchainError(_) => StatusCode::BAD_GATEWAY,
            AppError::TransactionFailed {
                kind: FailureKind::Cancelled,
                ..
            } => StatusCode::CONFLICT,
            AppError::TransactionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Get error code
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidAddress { .. } => "INVALID_ADDRESS",
            AppError::NotFound(_) => "NOT_FOUND",

            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::PriceUnavailable(_) => "PRICE_UNAVAILABLE",

            AppError::BlockchainError(_) => "BLOCKCHAIN_ERROR",
            AppError::TransactionFailed {
                kind: FailureKind::Cancelled,
                ..
            } => "TRANSACTION_CANCELLED",
            AppError::TransactionFailed { .. } => "TRANSACTION_FAILED",
        }
    }

    /// Get user-friendly message
    pub fn message(&self) -> String {
        match self {
            AppError::InvalidAddress { address } => format!("'{}' is not a valid Starknet address", address),
            AppError::NotFound(msg) => msg.clone(),

            AppError::Internal(_) => "Internal server error occurred".to_string(),
            AppError::ExternalServiceError { service, error } => {
                format!("External service '{}' error: {}", service, error)
            }
            AppError::PriceUnavailable(msg) => format!("Price unavailable: {}", msg),

            AppError::BlockchainError(msg) => format!("Blockchain error: {}", msg),
            AppError::TransactionFailed { error, .. } => error.clone(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InvalidAddress { address } => Some(serde_json::json!({
                "address": address
            })),
            AppError::TransactionFailed { hash, kind, .. } => Some(serde_json::json!({
                "transaction_hash": hash,
                "kind": kind,
            })),
            _ => None,
        }
    }

    fn help(&self) -> Option<String> {
        match self {
            AppError::InvalidAddress { .. } => {
                Some("Addresses are 0x-prefixed hex field elements".to_string())
            }
            AppError::PriceUnavailable(_) => Some("Retry in a few seconds".to_string()),
            AppError::TransactionFailed {
                kind: FailureKind::Cancelled,
                ..
            } => Some("The request was cancelled in the wallet; submit again to retry".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.message(),
                details: self.details(),
                help: self.help(),
            },
            request_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        if status.is_server_error() {
            tracing::error!(
                request_id = %error_response.request_id,
                error_code = %error_response.error.code,
                status = %status,
                "API error occurred"
            );
        } else {
            tracing::warn!(
                request_id = %error_response.request_id,
                error_code = %error_response.error.code,
                status = %status,
                "API request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        AppError::BlockchainError(err.to_string())
    }
}

impl From<ContractError> for AppError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::Rpc(rpc) => rpc.into(),
            decode @ ContractError::Decode { .. } => AppError::BlockchainError(decode.to_string()),
        }
    }
}

impl From<TransactionError> for AppError {
    fn from(err: TransactionError) -> Self {
        let notice = err.notice();
        let hash = match &err {
            TransactionError::Reverted { hash, .. }
            | TransactionError::Rejected { hash }
            | TransactionError::Timeout { hash, .. } => Some(hash.clone()),
            TransactionError::Wallet(_) | TransactionError::Rpc(_) => None,
        };
        AppError::TransactionFailed {
            hash,
            error: err.to_string(),
            kind: notice.kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let error = AppError::InvalidAddress {
            address: "0xzz".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.error_code(), "INVALID_ADDRESS");
        assert!(error.help().is_some());

        let error = AppError::ExternalServiceError {
            service: "starknet".to_string(),
            error: "timeout".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_cancelled_transaction_maps_to_conflict() {
        let error: AppError = TransactionError::Wallet("User rejected request".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.error_code(), "TRANSACTION_CANCELLED");

        let error: AppError = TransactionError::Reverted {
            hash: "0x1".to_string(),
            reason: "u256_sub Overflow".to_string(),
        }
        .into();
        assert_eq!(error.error_code(), "TRANSACTION_FAILED");
        assert_eq!(error.details().unwrap()["transaction_hash"], "0x1");
    }

    #[test]
    fn test_internal_message_is_generic() {
        let error: AppError = anyhow::anyhow!("secret stack detail").into();
        assert_eq!(error.message(), "Internal server error occurred");
    }
}
