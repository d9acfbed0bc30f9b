use thiserror::Error;

pub type CResult<T> = Result<T, CoreError>;

/// The abstract error kinds of the protocol core (wire framing, auth,
/// transaction, and backend-driver faults). Every fallible public
/// operation in the workspace returns `CResult<T>`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeatureError(String),

    #[error("authentication failed: {0}")]
    AuthenticationError(String),

    #[error("access denied: {0}")]
    AccessError(String),

    #[error("disabled capability: {0:#x}")]
    DisabledCapabilityError(u64),

    #[error("no type descriptor available: {0}")]
    TypeSpecNotFoundError(String),

    #[error("current transaction is aborted: {0}")]
    TransactionError(String),

    #[error("backend error: {0}")]
    BackendError(String),

    #[error("backend query cancelled")]
    BackendQueryCancelledError,

    #[error("connection aborted")]
    ConnectionAbortedError,

    #[error("internal server error: {0}")]
    InternalServerError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// True for errors that must close the connection outright rather than
    /// being reported as an `ErrorResponse` frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::ConnectionAbortedError | CoreError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_capability_formats_as_hex() {
        let err = CoreError::DisabledCapabilityError(0x04);
        assert_eq!(err.to_string(), "disabled capability: 0x4");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Json(_)));
    }
}
