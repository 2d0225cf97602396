//! Backend Gateway - 코디네이션 백엔드 경계
//!
//! 외부 코디네이션 서비스의 register/deregister/watch 프리미티브를 얇게
//! 감싼 타입 있는 경계. watch는 콜백 쌍 대신 키별 이벤트 채널로
//! 표현한다 - 백엔드 전달 스레드와 리스너 실행을 분리하기 위해
//! 디스패처가 채널의 유일한 소비자가 된다.
//!
//! 백엔드는 최종 일관성이고, 급격한 등록/해제 연쇄를 하나의 스냅샷으로
//! 합칠 수 있다. 호출자는 네트워크 연산 하나가 콜백 하나에 대응한다고
//! 가정하면 안 된다.

use beacon_foundation::{Endpoint, ProviderGroup, Result, SubscriptionKey};
use tokio::sync::mpsc;

pub mod memory;

pub use memory::MemoryBackend;

/// 키별 watch 채널 용량
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// BackendEvent - 백엔드가 전달하는 이벤트
// ============================================================================

/// watch 채널로 전달되는 백엔드 이벤트
///
/// `Snapshot`은 watch 설치 직후 최소 한 번 전달되며 (비어 있을 수
/// 있음), 이후 델타가 해당 키의 백엔드 전달 순서대로 이어진다. 다른
/// 키의 델타와의 순서는 보장되지 않는다.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// 전체 스냅샷 - 집합 전체 교체
    Snapshot(ProviderGroup),

    /// 새로 추가된 엔드포인트들
    Added(ProviderGroup),

    /// 제거된 엔드포인트들
    Removed(ProviderGroup),

    /// 카테고리 전체 교체 델타
    Replaced(ProviderGroup),
}

impl BackendEvent {
    /// 이벤트가 속한 구독 키
    pub fn key(&self) -> &SubscriptionKey {
        match self {
            Self::Snapshot(group)
            | Self::Added(group)
            | Self::Removed(group)
            | Self::Replaced(group) => &group.key,
        }
    }

    /// 로깅용 이벤트 종류
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
            Self::Replaced(_) => "replaced",
        }
    }
}

// ============================================================================
// WatchHandle
// ============================================================================

/// watch 설치 핸들
///
/// 설치마다 고유한 세대 번호를 가진다. `unwatch` 이후 같은 핸들로는
/// 어떤 이벤트도 관찰되지 않는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub(crate) u64);

impl std::fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

// ============================================================================
// BackendGateway trait
// ============================================================================

/// 코디네이션 백엔드 게이트웨이
#[async_trait::async_trait]
pub trait BackendGateway: Send + Sync {
    /// 백엔드 핸드셰이크 - `start()`가 타임아웃 안에서 기다린다
    async fn connect(&self) -> Result<()>;

    /// 엔드포인트 등록 - 같은 주소의 동일 엔드포인트 재등록은 no-op
    async fn register(&self, key: &SubscriptionKey, endpoint: &Endpoint) -> Result<()>;

    /// 엔드포인트 해제 - 존재하지 않는 엔드포인트는 조용히 무시
    async fn deregister(&self, key: &SubscriptionKey, endpoint: &Endpoint) -> Result<()>;

    /// watch 설치 - 첫 이벤트는 항상 현재 상태의 `Snapshot`
    async fn watch(
        &self,
        key: &SubscriptionKey,
    ) -> Result<(WatchHandle, mpsc::Receiver<BackendEvent>)>;

    /// watch 해제 - 반환 이후 해당 핸들로는 이벤트가 전달되지 않는다
    async fn unwatch(&self, handle: WatchHandle) -> Result<()>;

    /// 연결 해제 - destroy() 경로에서 호출
    async fn shutdown(&self) -> Result<()>;
}

// ============================================================================
// Batch 결과 - 항목별 보고, 트랜잭션 아님
// ============================================================================

/// 배치 연산의 항목별 결과
#[derive(Debug)]
pub struct BatchItemResult {
    /// 입력 목록에서의 위치
    pub index: usize,

    /// 항목의 인터페이스 식별자
    pub interface_id: String,

    /// 항목 결과 - 한 항목의 실패가 다른 항목을 중단시키지 않는다
    pub result: Result<()>,
}

/// 배치 연산 보고
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItemResult>,
}

impl BatchReport {
    pub fn push(&mut self, index: usize, interface_id: impl Into<String>, result: Result<()>) {
        self.items.push(BatchItemResult {
            index,
            interface_id: interface_id.into(),
            result,
        });
    }

    /// 성공한 항목 수
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    /// 실패한 항목 수
    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn is_all_ok(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_foundation::Error;

    #[test]
    fn test_batch_report_counts() {
        let mut report = BatchReport::default();
        report.push(0, "com.acme.A", Ok(()));
        report.push(1, "com.acme.B", Err(Error::Timeout("register".into())));

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_all_ok());
    }

    #[test]
    fn test_event_kind_and_key() {
        let key = SubscriptionKey::new("com.acme.A", "", "providers");
        let event = BackendEvent::Snapshot(ProviderGroup::empty(key.clone()));
        assert_eq!(event.kind(), "snapshot");
        assert_eq!(event.key(), &key);
    }
}
