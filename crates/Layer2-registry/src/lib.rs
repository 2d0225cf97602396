//! # beacon-registry
//!
//! 서비스 디스커버리 레지스트리 클라이언트 런타임:
//! - Gateway: 코디네이션 백엔드 경계 (`BackendGateway`, `MemoryBackend`)
//! - Cache: 키별 로컬 스냅샷과 구독 수명 관리
//! - Dispatch: 리스너별 순서 보장 전달 (`ProviderListener`)
//! - Client: 수명 주기 상태 기계를 가진 파사드 (`RegistryClient`)
//! - Factory: 설정 지문 기준 인스턴스 공유 (`RegistryClientFactory`)

pub mod cache;
pub mod client;
pub mod dispatch;
pub mod factory;
pub mod gateway;

// ============================================================================
// Gateway
// ============================================================================
pub use gateway::{
    BackendEvent, BackendGateway, BatchItemResult, BatchReport, MemoryBackend, WatchHandle,
};

// ============================================================================
// Cache / Dispatch
// ============================================================================
pub use cache::{CacheStats, KeyStats, SnapshotCache};
pub use dispatch::{ChangeEvent, ProviderListener};

// ============================================================================
// Client / Factory
// ============================================================================
pub use client::{RegistryClient, RegistryState};
pub use factory::{BackendConnector, MemoryConnector, RegistryClientFactory};
