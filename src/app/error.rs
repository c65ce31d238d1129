use serde::Serialize;
use std::fmt;

pub const ERR_NOT_CONFIGURED: &str = "ERR_NOT_CONFIGURED";
pub const ERR_BACKEND_QUERY: &str = "ERR_BACKEND_QUERY";
pub const ERR_COMMAND_FAILED: &str = "ERR_COMMAND_FAILED";
pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_TIMEOUT: &str = "ERR_TIMEOUT";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConfigured,
    BackendQuery,
    CommandFailed,
    Validation,
    Timeout,
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn not_configured(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NOT_CONFIGURED, message, trace_id)
    }

    pub fn backend_query(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_BACKEND_QUERY, message, trace_id)
    }

    pub fn command_failed(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_COMMAND_FAILED, message, trace_id)
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TIMEOUT, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            ERR_NOT_CONFIGURED => ErrorKind::NotConfigured,
            ERR_BACKEND_QUERY => ErrorKind::BackendQuery,
            ERR_COMMAND_FAILED => ErrorKind::CommandFailed,
            ERR_VALIDATION => ErrorKind::Validation,
            ERR_TIMEOUT => ErrorKind::Timeout,
            _ => ErrorKind::System,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_code() {
        assert_eq!(AppError::timeout("slow", "t").kind(), ErrorKind::Timeout);
        assert_eq!(
            AppError::not_configured("missing", "t").kind(),
            ErrorKind::NotConfigured
        );
        assert_eq!(AppError::new("ERR_OTHER", "x", "t").kind(), ErrorKind::System);
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::command_failed("quit failed", "trace-9");
        assert_eq!(err.to_string(), "quit failed (ERR_COMMAND_FAILED)");
    }
}
