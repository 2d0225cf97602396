//! # beacon-foundation
//!
//! Foundation layer for Beacon:
//! - Error: 중앙 에러 타입 (재시도 분류 포함)
//! - Config: 레지스트리/서버/프로바이더/컨슈머 설정 표면
//! - Endpoint: 엔드포인트 기술자와 ProviderGroup 값 타입
//! - Key: 구독 키 해석 (인터페이스 + 변형 + 카테고리)
//! - Retry: 제한된 지수 백오프

pub mod config;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod retry;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    resolve_bound_address, ConsumerConfig, ProviderConfig, RegistryConfig, ServerConfig,
};

// ============================================================================
// Model
// ============================================================================
pub use endpoint::{registered_endpoint, Endpoint, ProviderGroup};
pub use key::{SubscriptionKey, CATEGORY_PROVIDERS};

// ============================================================================
// Retry
// ============================================================================
pub use retry::{with_retry, RetryConfig};
