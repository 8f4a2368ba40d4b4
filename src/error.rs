// Error taxonomy for credential issuance and pool management
use std::time::Duration;
use thiserror::Error;

/// Failures while obtaining credentials from the identity service
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("missing required configuration: {0}")]
    NotConfigured(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("credential issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("credential issuance timed out after {0:?}")]
    Timeout(Duration),

    #[error("incomplete credential received from the identity service")]
    Incomplete,
}

/// Failures while building or using the managed connection pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Credentials(#[from] SourceError),

    #[error("failed to establish database connection: {0}")]
    Construction(String),

    #[error("authentication rejected by the database: {0}")]
    Authentication(String),

    #[error("no connection available: {0}")]
    Unavailable(String),

    #[error("connection pool is shut down")]
    Shutdown,
}

/// Classification of an error observed while a connection was in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying by the caller; leaves cache and pool untouched
    Transient,
    /// Credential no longer accepted; cache and pool must be discarded
    Authentication,
    /// Misconfiguration; retrying cannot succeed
    Fatal,
}

const AUTH_MARKERS: [&str; 3] = ["authentication", "credential", "password"];

/// Classify a database-layer error.
///
/// Structured SQLSTATE codes are preferred when the driver exposes them
/// (class 28 = invalid authorization specification). Errors that only
/// surface a message fall back to substring matching, which mirrors the
/// behavior of drivers that wrap authentication failures in plain text.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorClass {
    let mut text = String::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(sqlx::Error::Database(db)) = e.downcast_ref::<sqlx::Error>() {
            if let Some(code) = db.code() {
                if code.starts_with("28") {
                    return ErrorClass::Authentication;
                }
            }
        }

        if let Some(source_err) = e.downcast_ref::<SourceError>() {
            return classify_source(source_err);
        }

        if let Some(pool_err) = e.downcast_ref::<PoolError>() {
            match pool_err {
                PoolError::Credentials(source_err) => return classify_source(source_err),
                PoolError::Authentication(_) => return ErrorClass::Authentication,
                PoolError::Shutdown => return ErrorClass::Fatal,
                // Construction and Unavailable carry driver text; let the
                // fallback below decide
                _ => {}
            }
        }

        text.push_str(&e.to_string().to_lowercase());
        text.push(' ');
        current = e.source();
    }

    if AUTH_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ErrorClass::Authentication;
    }

    ErrorClass::Transient
}

fn classify_source(err: &SourceError) -> ErrorClass {
    match err {
        SourceError::NotConfigured(_) | SourceError::InvalidConfiguration(_) => ErrorClass::Fatal,
        // Issuance failures are retryable upstream conditions, not a sign
        // that the current credential went bad
        _ => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[derive(Debug)]
    struct StubDbError {
        message: String,
        code: Option<String>,
    }

    impl std::fmt::Display for StubDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl std::error::Error for StubDbError {}

    impl sqlx::error::DatabaseError for StubDbError {
        fn message(&self) -> &str {
            &self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.as_deref().map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(message: &str, code: Option<&str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(StubDbError {
            message: message.to_string(),
            code: code.map(|c| c.to_string()),
        }))
    }

    #[test]
    fn sqlstate_class_28_is_authentication() {
        let err = db_error("role rejected", Some("28P01"));
        assert_eq!(classify(&err), ErrorClass::Authentication);

        let err = db_error("invalid authorization", Some("28000"));
        assert_eq!(classify(&err), ErrorClass::Authentication);
    }

    #[test]
    fn other_sqlstate_falls_back_to_text() {
        let err = db_error("duplicate key value violates unique constraint", Some("23505"));
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn auth_substrings_detected_in_plain_errors() {
        for message in [
            "FATAL: password authentication failed for user \"app\"",
            "credential has been revoked",
            "Authentication token expired",
        ] {
            let err = std::io::Error::new(std::io::ErrorKind::Other, message);
            assert_eq!(classify(&err), ErrorClass::Authentication, "{}", message);
        }
    }

    #[test]
    fn unrelated_errors_are_transient() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn configuration_errors_are_fatal() {
        let err = PoolError::Credentials(SourceError::NotConfigured("DB_INSTANCE_NAME"));
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn issuance_failures_are_transient_despite_wording() {
        // The variant's display text mentions "credential"; classification
        // must come from the variant, not the message
        let err = SourceError::IssuanceFailed("service returned 503".to_string());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }
}
