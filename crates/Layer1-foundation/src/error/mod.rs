//! Error types for Beacon
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Beacon 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 백엔드 관련
    // ========================================================================
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 라이프사이클 관련
    // ========================================================================
    #[error("Invalid state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Registry already destroyed")]
    Destroyed,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    ///
    /// 일시적인 백엔드 장애(타임아웃, 연결 끊김)만 재시도 대상이며,
    /// 설정 에러나 상태 에러는 재시도해도 의미가 없다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Connection(_))
    }

    /// 상태 에러 생성 헬퍼
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout("register".into()).is_retryable());
        assert!(Error::Connection("reset by peer".into()).is_retryable());

        assert!(!Error::Config("bad address".into()).is_retryable());
        assert!(!Error::Destroyed.is_retryable());
        assert!(!Error::NotFound("key".into()).is_retryable());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::invalid_state("STARTED", "INITIALIZED");
        assert_eq!(
            err.to_string(),
            "Invalid state: expected STARTED, actual INITIALIZED"
        );
    }
}
