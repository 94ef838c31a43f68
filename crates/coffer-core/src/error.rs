use thiserror::Error;

pub type CofferResult<T> = Result<T, CofferError>;

/// Error taxonomy shared across all coffer crates.
///
/// Every variant is recoverable and carries a human-readable message; the
/// discriminant is stable so callers can branch on it (the CLI maps
/// `Auth` to "wrong password or key file" and `CorruptFile` to "damaged
/// database", which must never be conflated).
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("no key: the composite key has no factors")]
    NoKey,

    #[error("authentication failed: wrong password or key file")]
    Auth,

    #[error("corrupt database file: {0}")]
    CorruptFile(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("broker error: {0}")]
    Broker(String),
}

impl CofferError {
    /// Stable machine-readable discriminant, used by the broker to report
    /// errors across the RPC boundary without losing the taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            CofferError::NoKey => "no-key",
            CofferError::Auth => "auth",
            CofferError::CorruptFile(_) => "corrupt-file",
            CofferError::NotFound(_) => "not-found",
            CofferError::Conflict(_) => "conflict",
            CofferError::Io(_) => "io",
            CofferError::Validation(_) => "validation",
            CofferError::Broker(_) => "broker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CofferError::NoKey.code(), "no-key");
        assert_eq!(CofferError::Auth.code(), "auth");
        assert_eq!(CofferError::CorruptFile("x".into()).code(), "corrupt-file");
        assert_eq!(CofferError::NotFound("x".into()).code(), "not-found");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CofferError = io.into();
        assert_eq!(err.code(), "io");
    }
}
