use thiserror::Error;

/// Root error of the crate. Every operation surfaces one of these kinds to its
/// immediate caller; nothing is retried internally.
#[derive(Error, Debug)]
pub enum TensorlabError {
    /// Caller supplied data that fails validation.
    #[error("{0}")]
    IllegalArgument(String),
    /// The operation would break a structural invariant.
    #[error("{0}")]
    InvalidState(String),
    /// A referenced group, model or attribute does not exist.
    #[error("{0}")]
    Lookup(String),
    /// The storage could not be created or opened.
    #[error("{0}")]
    StorageInstantiation(String),
    #[error("Internal invariant violated: {0}")]
    Internal(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Project hook failed: {0}")]
    Hook(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TensorlabError>;

impl TensorlabError {
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }

    pub fn storage_instantiation(message: impl Into<String>) -> Self {
        Self::StorageInstantiation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

// Helper conversions
impl From<rusqlite::Error> for TensorlabError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<config::ConfigError> for TensorlabError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for TensorlabError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Turns unique-constraint violations into `InvalidState` with the given
/// message and passes every other database failure through unchanged.
pub(crate) fn on_constraint(e: rusqlite::Error, message: impl FnOnce() -> String) -> TensorlabError {
    if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
        TensorlabError::invalid_state(message())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_keep_the_message() {
        let err = TensorlabError::illegal_argument("bad value");
        assert!(matches!(err, TensorlabError::IllegalArgument(_)));
        assert_eq!(err.to_string(), "bad value");

        let err = TensorlabError::internal("dangling id");
        assert_eq!(err.to_string(), "Internal invariant violated: dangling id");
    }

    #[test]
    fn constraint_violations_become_invalid_state() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("create table T (name text unique); insert into T values ('a');")
            .unwrap();
        let e = conn.execute("insert into T values ('a')", []).unwrap_err();
        let err = on_constraint(e, || "duplicate".to_string());
        assert!(matches!(err, TensorlabError::InvalidState(ref m) if m == "duplicate"));
    }
}
