//! Canonical RPC status codes and their retriability

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Canonical status codes shared by the control plane and plugin RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Terminal codes abort retries; every other code may succeed on a later attempt.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            RpcCode::InvalidArgument
                | RpcCode::NotFound
                | RpcCode::AlreadyExists
                | RpcCode::PermissionDenied
                | RpcCode::FailedPrecondition
                | RpcCode::Unimplemented
                | RpcCode::Unauthenticated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCode::Cancelled => "Cancelled",
            RpcCode::Unknown => "Unknown",
            RpcCode::InvalidArgument => "InvalidArgument",
            RpcCode::DeadlineExceeded => "DeadlineExceeded",
            RpcCode::NotFound => "NotFound",
            RpcCode::AlreadyExists => "AlreadyExists",
            RpcCode::PermissionDenied => "PermissionDenied",
            RpcCode::ResourceExhausted => "ResourceExhausted",
            RpcCode::FailedPrecondition => "FailedPrecondition",
            RpcCode::Aborted => "Aborted",
            RpcCode::OutOfRange => "OutOfRange",
            RpcCode::Unimplemented => "Unimplemented",
            RpcCode::Internal => "Internal",
            RpcCode::Unavailable => "Unavailable",
            RpcCode::DataLoss => "DataLoss",
            RpcCode::Unauthenticated => "Unauthenticated",
        }
    }

    /// Parse a code name as carried in error bodies. Unknown names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Cancelled" | "CANCELLED" => RpcCode::Cancelled,
            "InvalidArgument" | "INVALID_ARGUMENT" => RpcCode::InvalidArgument,
            "DeadlineExceeded" | "DEADLINE_EXCEEDED" => RpcCode::DeadlineExceeded,
            "NotFound" | "NOT_FOUND" => RpcCode::NotFound,
            "AlreadyExists" | "ALREADY_EXISTS" => RpcCode::AlreadyExists,
            "PermissionDenied" | "PERMISSION_DENIED" => RpcCode::PermissionDenied,
            "ResourceExhausted" | "RESOURCE_EXHAUSTED" => RpcCode::ResourceExhausted,
            "FailedPrecondition" | "FAILED_PRECONDITION" => RpcCode::FailedPrecondition,
            "Aborted" | "ABORTED" => RpcCode::Aborted,
            "OutOfRange" | "OUT_OF_RANGE" => RpcCode::OutOfRange,
            "Unimplemented" | "UNIMPLEMENTED" => RpcCode::Unimplemented,
            "Internal" | "INTERNAL" => RpcCode::Internal,
            "Unavailable" | "UNAVAILABLE" => RpcCode::Unavailable,
            "DataLoss" | "DATA_LOSS" => RpcCode::DataLoss,
            "Unauthenticated" | "UNAUTHENTICATED" => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    /// Map an HTTP status to a code when the peer sent no error body.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST => RpcCode::InvalidArgument,
            StatusCode::UNAUTHORIZED => RpcCode::Unauthenticated,
            StatusCode::FORBIDDEN => RpcCode::PermissionDenied,
            StatusCode::NOT_FOUND => RpcCode::NotFound,
            StatusCode::CONFLICT => RpcCode::AlreadyExists,
            StatusCode::PRECONDITION_FAILED => RpcCode::FailedPrecondition,
            StatusCode::TOO_MANY_REQUESTS => RpcCode::ResourceExhausted,
            StatusCode::NOT_IMPLEMENTED => RpcCode::Unimplemented,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => RpcCode::Unavailable,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => RpcCode::DeadlineExceeded,
            StatusCode::INTERNAL_SERVER_ERROR => RpcCode::Internal,
            _ => RpcCode::Unknown,
        }
    }

    /// HTTP status used when serving an error with this code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            RpcCode::InvalidArgument | RpcCode::OutOfRange => StatusCode::BAD_REQUEST,
            RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::AlreadyExists | RpcCode::Aborted => StatusCode::CONFLICT,
            RpcCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            RpcCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            RpcCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RpcCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed RPC call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: RpcCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcCode::NotFound, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unimplemented, message)
    }
}
