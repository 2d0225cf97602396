//! Change Dispatcher - 리스너별 순서 보장 전달
//!
//! 리스너 하나마다 유한 큐와 전용 전달 태스크를 둔다. 한 키의 이벤트는
//! 캐시의 펌프 태스크가 순서대로 큐에 넣고, 전달 태스크가 하나씩 꺼내
//! 콜백을 실행하므로 리스너 안에서 이벤트가 겹치지 않는다. 큐가 차면
//! 펌프가 송신에서 대기한다 - 이벤트를 버리지 않는 백프레셔.
//!
//! 리스너 콜백의 패닉은 격리된다: 해당 이벤트 전달만 실패로 기록하고
//! 다음 이벤트는 계속 전달된다.

use beacon_foundation::{ProviderGroup, SubscriptionKey};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

// ============================================================================
// ProviderListener trait
// ============================================================================

/// 프로바이더 변경 리스너
///
/// 네 콜백 모두 기본 구현이 비어 있으므로 필요한 것만 구현하면 된다.
/// 콜백은 전용 태스크에서 실행되며, 같은 리스너의 콜백은 절대 동시에
/// 실행되지 않는다.
#[async_trait::async_trait]
pub trait ProviderListener: Send + Sync {
    /// 로깅용 리스너 이름
    fn name(&self) -> &str;

    /// 구독 직후 또는 백엔드 재수렴 시의 전체 스냅샷
    async fn on_snapshot(&self, group: ProviderGroup) {
        let _ = group;
    }

    /// 추가된 엔드포인트들
    async fn on_added(&self, group: ProviderGroup) {
        let _ = group;
    }

    /// 제거된 엔드포인트들
    async fn on_removed(&self, group: ProviderGroup) {
        let _ = group;
    }

    /// 카테고리 전체 교체
    async fn on_replaced(&self, group: ProviderGroup) {
        let _ = group;
    }
}

// ============================================================================
// ChangeEvent
// ============================================================================

/// 리스너에게 전달되는 변경 이벤트
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Snapshot(ProviderGroup),
    Added(ProviderGroup),
    Removed(ProviderGroup),
    Replaced(ProviderGroup),
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
            Self::Replaced(_) => "replaced",
        }
    }

    pub fn group(&self) -> &ProviderGroup {
        match self {
            Self::Snapshot(group)
            | Self::Added(group)
            | Self::Removed(group)
            | Self::Replaced(group) => group,
        }
    }

    async fn deliver(self, listener: &dyn ProviderListener) {
        match self {
            Self::Snapshot(group) => listener.on_snapshot(group).await,
            Self::Added(group) => listener.on_added(group).await,
            Self::Removed(group) => listener.on_removed(group).await,
            Self::Replaced(group) => listener.on_replaced(group).await,
        }
    }
}

// ============================================================================
// ListenerSlot - 리스너 하나의 전달 경로
// ============================================================================

/// 등록된 리스너 하나의 큐와 전달 태스크
pub(crate) struct ListenerSlot {
    /// 이 슬롯을 소유한 컨슈머
    pub consumer_id: u64,

    /// 펌프 -> 전달 태스크 유한 큐
    pub tx: mpsc::Sender<ChangeEvent>,

    /// false가 되면 전달 태스크가 다음 이벤트부터 중단한다
    pub live: Arc<AtomicBool>,

    /// 전달 태스크 - 구독 해제 시 join해서 진행 중인 콜백 완료를 기다린다
    pub task: JoinHandle<()>,
}

impl ListenerSlot {
    /// 구독 해제 - 반환 이후 이 리스너의 콜백은 실행되지 않는다
    ///
    /// 순서가 중요하다: live를 내리고 tx를 버려 큐를 닫은 뒤 태스크를
    /// join한다. 진행 중이던 콜백 하나는 완료까지 기다린다.
    pub async fn retire(self) {
        self.live.store(false, Ordering::Release);
        drop(self.tx);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "listener dispatch task failed during retire");
            }
        }
    }
}

/// 리스너 전달 경로 기동
pub(crate) fn spawn_listener(
    key: SubscriptionKey,
    consumer_id: u64,
    listener: Arc<dyn ProviderListener>,
    queue_size: usize,
) -> ListenerSlot {
    let (tx, mut rx) = mpsc::channel::<ChangeEvent>(queue_size.max(1));
    let live = Arc::new(AtomicBool::new(true));
    let task_live = live.clone();

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !task_live.load(Ordering::Acquire) {
                break;
            }

            let kind = event.kind();
            trace!(key = %key, listener = listener.name(), kind, "delivering change event");

            // 패닉 격리 - 이 이벤트만 버리고 다음 이벤트는 계속 전달
            let outcome = AssertUnwindSafe(event.deliver(listener.as_ref()))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                warn!(
                    key = %key,
                    listener = listener.name(),
                    kind,
                    "listener callback panicked; event dropped for this listener"
                );
            }
        }
    });

    ListenerSlot {
        consumer_id,
        tx,
        live,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_foundation::Endpoint;
    use std::sync::Mutex;

    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ProviderListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_snapshot(&self, group: ProviderGroup) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("snapshot:{}", group.len()));
        }

        async fn on_added(&self, group: ProviderGroup) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("added:{}", group.len()));
        }

        async fn on_removed(&self, group: ProviderGroup) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("removed:{}", group.len()));
        }
    }

    struct PanicsOnAdd;

    #[async_trait::async_trait]
    impl ProviderListener for PanicsOnAdd {
        fn name(&self) -> &str {
            "panics-on-add"
        }

        async fn on_added(&self, _group: ProviderGroup) {
            panic!("listener bug");
        }
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("com.acme.EchoService", "", "providers")
    }

    fn group_of(n: usize) -> ProviderGroup {
        let endpoints = (0..n)
            .map(|i| Endpoint::new(format!("10.0.0.{}", i + 1), 12200))
            .collect();
        ProviderGroup::new(key(), endpoints)
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let recorder = Recorder::new();
        let slot = spawn_listener(key(), 1, recorder.clone(), 8);

        slot.tx
            .send(ChangeEvent::Snapshot(group_of(2)))
            .await
            .unwrap();
        slot.tx.send(ChangeEvent::Added(group_of(1))).await.unwrap();
        slot.tx
            .send(ChangeEvent::Removed(group_of(1)))
            .await
            .unwrap();

        slot.retire().await;

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["snapshot:2", "added:1", "removed:1"]);
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_dispatch() {
        let slot = spawn_listener(key(), 1, Arc::new(PanicsOnAdd), 8);

        slot.tx.send(ChangeEvent::Added(group_of(1))).await.unwrap();
        slot.tx.send(ChangeEvent::Added(group_of(1))).await.unwrap();

        // retire는 태스크 join까지 포함하므로, 패닉으로 태스크가 죽었다면
        // 여기서 드러난다
        slot.retire().await;
    }

    #[tokio::test]
    async fn test_no_delivery_after_retire() {
        let recorder = Recorder::new();
        let slot = spawn_listener(key(), 1, recorder.clone(), 8);

        slot.tx
            .send(ChangeEvent::Snapshot(group_of(1)))
            .await
            .unwrap();
        slot.retire().await;

        let calls = recorder.calls.lock().unwrap().clone();
        // retire 시점에 진행 중이던 전달까지는 허용, 이후 추가 전달 없음
        assert!(calls.len() <= 1);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(recorder.calls.lock().unwrap().len(), calls.len());
    }
}
