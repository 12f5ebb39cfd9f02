//! Error kinds and their outward statuses.
//!
//! Every module error maps onto one [`ErrorKind`]. The protocol layer turns a
//! kind into a transport status with [`ErrorKind::status`]; the mapping is
//! stable and distinct per kind, and never carries retry counts or backoff
//! timing.

/// Transport-neutral status codes, numbered like `google.rpc.Code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    InvalidArgument = 3,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    FailedPrecondition = 9,
    Aborted = 10,
    Internal = 13,
    Unavailable = 14,
    Unauthenticated = 16,
}

/// Outward status for an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    /// Coarse transport code.
    pub code: StatusCode,
    /// Stable machine-readable reason, unique per kind.
    pub reason: &'static str,
}

/// Every error kind surfaced by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedAuthorization,
    InvalidToken,
    ExpiredToken,
    PermissionDenied,
    SessionNotFound,
    SessionBlocked,
    SessionMismatch,
    SessionExpired,
    TransactionConflict,
    TransactionAborted,
    EnqueueFailed,
    TaskMalformed,
    TaskTransientFailure,
    NotFound,
    AlreadyExists,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::MalformedAuthorization,
        Self::InvalidToken,
        Self::ExpiredToken,
        Self::PermissionDenied,
        Self::SessionNotFound,
        Self::SessionBlocked,
        Self::SessionMismatch,
        Self::SessionExpired,
        Self::TransactionConflict,
        Self::TransactionAborted,
        Self::EnqueueFailed,
        Self::TaskMalformed,
        Self::TaskTransientFailure,
        Self::NotFound,
        Self::AlreadyExists,
        Self::Unavailable,
        Self::Internal,
    ];

    /// Outward status for this kind.
    #[must_use]
    pub const fn status(self) -> Status {
        let (code, reason) = match self {
            Self::MalformedAuthorization => {
                (StatusCode::Unauthenticated, "MALFORMED_AUTHORIZATION")
            }
            Self::InvalidToken => (StatusCode::Unauthenticated, "INVALID_TOKEN"),
            Self::ExpiredToken => (StatusCode::Unauthenticated, "EXPIRED_TOKEN"),
            Self::PermissionDenied => (StatusCode::PermissionDenied, "PERMISSION_DENIED"),
            Self::SessionNotFound => (StatusCode::NotFound, "SESSION_NOT_FOUND"),
            Self::SessionBlocked => (StatusCode::Unauthenticated, "SESSION_BLOCKED"),
            Self::SessionMismatch => (StatusCode::Unauthenticated, "SESSION_MISMATCH"),
            Self::SessionExpired => (StatusCode::Unauthenticated, "SESSION_EXPIRED"),
            Self::TransactionConflict => (StatusCode::Aborted, "TRANSACTION_CONFLICT"),
            Self::TransactionAborted => (StatusCode::FailedPrecondition, "TRANSACTION_ABORTED"),
            Self::EnqueueFailed => (StatusCode::Unavailable, "ENQUEUE_FAILED"),
            Self::TaskMalformed => (StatusCode::InvalidArgument, "TASK_MALFORMED"),
            Self::TaskTransientFailure => (StatusCode::Unavailable, "TASK_TRANSIENT_FAILURE"),
            Self::NotFound => (StatusCode::NotFound, "NOT_FOUND"),
            Self::AlreadyExists => (StatusCode::AlreadyExists, "ALREADY_EXISTS"),
            Self::Unavailable => (StatusCode::Unavailable, "UNAVAILABLE"),
            Self::Internal => (StatusCode::Internal, "INTERNAL"),
        };
        Status { code, reason }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status().reason)
    }
}
