//! Snapshot Cache - 키별 로컬 스냅샷과 구독 수명 관리
//!
//! 백엔드 watch 채널 하나당 펌프 태스크 하나를 둔다. 펌프가 키의
//! 엔드포인트 집합을 갱신하는 유일한 쓰기 주체이므로 집합 갱신과
//! 리스너 팬아웃이 백엔드 전달 순서 그대로 직렬화된다.
//!
//! 첫 구독자가 watch를 설치하고, 마지막 구독자가 떠나면 watch를
//! 해제한다. 같은 키의 구독자들은 채널 하나를 공유한다.

use crate::dispatch::{spawn_listener, ChangeEvent, ListenerSlot, ProviderListener};
use crate::gateway::{BackendEvent, BackendGateway, WatchHandle};
use beacon_foundation::{Endpoint, Error, ProviderGroup, Result, SubscriptionKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// 키 하나의 상태
// ============================================================================

/// 키 하나의 엔드포인트 집합과 리스너들
///
/// 뮤텍스 하나가 집합 갱신, 팬아웃, 리스너 추가/제거를 직렬화한다.
/// 팬아웃이 유한 큐 송신에서 대기할 수 있지만, 전달 태스크는 이 락을
/// 잡지 않으므로 큐는 언제나 빠진다.
struct KeyInner {
    endpoints: Vec<Endpoint>,
    listeners: HashMap<u64, ListenerSlot>,

    /// 첫 스냅샷 처리 완료 여부
    ready: bool,
    ready_tx: watch::Sender<bool>,

    last_event_at: Option<DateTime<Utc>>,
}

impl KeyInner {
    /// 백엔드 이벤트를 집합에 적용하고 리스너용 변경 이벤트로 바꾼다
    fn apply(&mut self, event: BackendEvent) -> ChangeEvent {
        match event {
            BackendEvent::Snapshot(group) => {
                self.endpoints = dedup_by_addr(group.endpoints);
                ChangeEvent::Snapshot(ProviderGroup::new(group.key, self.endpoints.clone()))
            }
            BackendEvent::Added(group) => {
                for endpoint in &group.endpoints {
                    upsert_by_addr(&mut self.endpoints, endpoint);
                }
                ChangeEvent::Added(group)
            }
            BackendEvent::Removed(group) => {
                for endpoint in &group.endpoints {
                    let addr = endpoint.addr();
                    self.endpoints.retain(|e| e.addr() != addr);
                }
                ChangeEvent::Removed(group)
            }
            BackendEvent::Replaced(group) => {
                self.endpoints = dedup_by_addr(group.endpoints);
                ChangeEvent::Replaced(ProviderGroup::new(group.key, self.endpoints.clone()))
            }
        }
    }
}

/// host:port 기준 중복 제거, 첫 등장 우선
fn dedup_by_addr(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut seen = std::collections::HashSet::new();
    endpoints
        .into_iter()
        .filter(|e| seen.insert(e.addr()))
        .collect()
}

/// 같은 주소가 있으면 교체, 없으면 추가
fn upsert_by_addr(endpoints: &mut Vec<Endpoint>, endpoint: &Endpoint) {
    let addr = endpoint.addr();
    match endpoints.iter_mut().find(|e| e.addr() == addr) {
        Some(slot) => *slot = endpoint.clone(),
        None => endpoints.push(endpoint.clone()),
    }
}

/// 구독 중인 키 하나의 레코드
struct SubscriptionRecord {
    state: Arc<Mutex<KeyInner>>,
    ready_rx: watch::Receiver<bool>,
    handle: WatchHandle,
    pump: JoinHandle<()>,
}

// ============================================================================
// 통계
// ============================================================================

/// 캐시 통계 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub keys: usize,
    pub listeners: usize,
    pub entries: Vec<KeyStats>,
}

/// 키 하나의 통계
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub key: String,
    pub endpoints: usize,
    pub listeners: usize,
    pub last_event_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SnapshotCache
// ============================================================================

/// 로컬 스냅샷 캐시
pub struct SnapshotCache {
    backend: Arc<dyn BackendGateway>,
    records: RwLock<HashMap<SubscriptionKey, SubscriptionRecord>>,

    /// 리스너별 전달 큐 용량
    queue_size: usize,
}

impl SnapshotCache {
    pub fn new(backend: Arc<dyn BackendGateway>, queue_size: usize) -> Self {
        Self {
            backend,
            records: RwLock::new(HashMap::new()),
            queue_size,
        }
    }

    /// 리스너 구독
    ///
    /// 키의 첫 구독자라면 백엔드 watch를 설치하고 펌프를 기동한다.
    /// 이미 첫 스냅샷이 도착한 키라면 새 리스너에게 현재 집합의
    /// 스냅샷을 합성해서 먼저 전달한다. 반환된 수신기는 첫 스냅샷
    /// 처리 시점에 true가 된다.
    pub async fn subscribe(
        &self,
        key: &SubscriptionKey,
        consumer_id: u64,
        listener: Arc<dyn ProviderListener>,
    ) -> Result<watch::Receiver<bool>> {
        let mut records = self.records.write().await;

        if let Some(record) = records.get(key) {
            let mut inner = record.state.lock().await;
            if inner.listeners.contains_key(&consumer_id) {
                return Err(Error::Config(format!(
                    "consumer {} already subscribed to {}",
                    consumer_id, key
                )));
            }

            let slot = spawn_listener(key.clone(), consumer_id, listener, self.queue_size);
            if inner.ready {
                // 늦게 합류한 리스너도 초기 스냅샷 한 번을 받는다
                let snapshot =
                    ChangeEvent::Snapshot(ProviderGroup::new(key.clone(), inner.endpoints.clone()));
                if slot.tx.send(snapshot).await.is_err() {
                    warn!(key = %key, consumer_id, "listener queue closed before first snapshot");
                }
            }
            inner.listeners.insert(consumer_id, slot);
            debug!(key = %key, consumer_id, "listener added to existing subscription");
            return Ok(record.ready_rx.clone());
        }

        // 첫 구독자 - watch 설치 후 펌프 기동
        let (handle, rx) = self.backend.watch(key).await?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let slot = spawn_listener(key.clone(), consumer_id, listener, self.queue_size);
        let mut listeners = HashMap::new();
        listeners.insert(consumer_id, slot);

        let state = Arc::new(Mutex::new(KeyInner {
            endpoints: Vec::new(),
            listeners,
            ready: false,
            ready_tx,
            last_event_at: None,
        }));

        let pump = spawn_pump(key.clone(), state.clone(), rx);
        records.insert(
            key.clone(),
            SubscriptionRecord {
                state,
                ready_rx: ready_rx.clone(),
                handle,
                pump,
            },
        );

        info!(key = %key, consumer_id, handle = %handle, "subscription installed");
        Ok(ready_rx)
    }

    /// 리스너 구독 해제
    ///
    /// 반환 이후 해당 리스너의 콜백은 실행되지 않는다. 키의 마지막
    /// 리스너였다면 백엔드 watch도 해제한다. 모르는 키/컨슈머는
    /// 조용히 무시한다.
    pub async fn unsubscribe(&self, key: &SubscriptionKey, consumer_id: u64) -> Result<()> {
        let mut records = self.records.write().await;

        let Some(record) = records.get(key) else {
            debug!(key = %key, consumer_id, "unsubscribe of unknown key ignored");
            return Ok(());
        };

        let (slot, remaining) = {
            let mut inner = record.state.lock().await;
            let slot = inner.listeners.remove(&consumer_id);
            (slot, inner.listeners.len())
        };

        let Some(slot) = slot else {
            debug!(key = %key, consumer_id, "unsubscribe of unknown consumer ignored");
            return Ok(());
        };

        let retired_record = if remaining == 0 {
            records.remove(key)
        } else {
            None
        };
        drop(records);

        slot.retire().await;
        debug!(key = %key, consumer_id, "listener removed");

        if let Some(record) = retired_record {
            self.teardown(key, record).await;
        }
        Ok(())
    }

    /// 현재 스냅샷 조회 - 구독 중이 아니면 None
    pub async fn current(&self, key: &SubscriptionKey) -> Option<ProviderGroup> {
        let records = self.records.read().await;
        let record = records.get(key)?;
        let inner = record.state.lock().await;
        Some(ProviderGroup::new(key.clone(), inner.endpoints.clone()))
    }

    /// 구독 중인 키 수
    pub async fn subscription_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// 통계 스냅샷
    pub async fn stats(&self) -> CacheStats {
        let records = self.records.read().await;
        let mut entries = Vec::with_capacity(records.len());
        let mut listeners = 0;
        for (key, record) in records.iter() {
            let inner = record.state.lock().await;
            listeners += inner.listeners.len();
            entries.push(KeyStats {
                key: key.to_string(),
                endpoints: inner.endpoints.len(),
                listeners: inner.listeners.len(),
                last_event_at: inner.last_event_at,
            });
        }
        CacheStats {
            keys: entries.len(),
            listeners,
            entries,
        }
    }

    /// 모든 구독 해제 - destroy 경로
    pub async fn clear(&self) {
        let drained: Vec<(SubscriptionKey, SubscriptionRecord)> =
            self.records.write().await.drain().collect();

        for (key, record) in drained {
            let slots: Vec<ListenerSlot> = {
                let mut inner = record.state.lock().await;
                inner.listeners.drain().map(|(_, slot)| slot).collect()
            };
            for slot in slots {
                slot.retire().await;
            }
            self.teardown(&key, record).await;
        }
    }

    /// 마지막 리스너 이후의 키 정리 - unwatch 후 펌프 종료 대기
    async fn teardown(&self, key: &SubscriptionKey, record: SubscriptionRecord) {
        if let Err(e) = self.backend.unwatch(record.handle).await {
            warn!(key = %key, error = %e, "backend unwatch failed during teardown");
        }
        // unwatch로 sink가 제거되면 채널이 닫혀 펌프가 끝난다
        if let Err(e) = record.pump.await {
            if !e.is_cancelled() {
                error!(key = %key, error = %e, "pump task failed during teardown");
            }
        }
        info!(key = %key, "subscription removed");
    }
}

/// 펌프 태스크 - 키 하나의 유일한 쓰기 주체
fn spawn_pump(
    key: SubscriptionKey,
    state: Arc<Mutex<KeyInner>>,
    mut rx: mpsc::Receiver<BackendEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mut inner = state.lock().await;
            let change = inner.apply(event);
            inner.last_event_at = Some(Utc::now());

            debug!(
                key = %key,
                kind = change.kind(),
                delta = change.group().len(),
                total = inner.endpoints.len(),
                "snapshot updated"
            );

            for slot in inner.listeners.values() {
                if !slot.live.load(Ordering::Acquire) {
                    continue;
                }
                // 유한 큐가 차면 여기서 대기 - 이벤트를 버리지 않는다
                if slot.tx.send(change.clone()).await.is_err() {
                    debug!(key = %key, consumer_id = slot.consumer_id, "listener queue closed");
                }
            }

            if !inner.ready {
                inner.ready = true;
                let _ = inner.ready_tx.send(true);
            }
        }
        debug!(key = %key, "pump finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryBackend;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        calls: StdMutex<Vec<(String, usize)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(k, _)| k.clone())
                .collect()
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
                .push(("snapshot".into(), group.len()));
        }

        async fn on_added(&self, group: ProviderGroup) {
            self.calls
                .lock()
                .unwrap()
                .push(("added".into(), group.len()));
        }

        async fn on_removed(&self, group: ProviderGroup) {
            self.calls
                .lock()
                .unwrap()
                .push(("removed".into(), group.len()));
        }
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("com.acme.EchoService", "", "providers")
    }

    async fn wait_ready(mut ready: watch::Receiver<bool>) {
        while !*ready.borrow() {
            ready.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_subscriber_gets_snapshot() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .register(&key(), &Endpoint::new("10.0.0.1", 12200))
            .await
            .unwrap();

        let cache = SnapshotCache::new(backend, 8);
        let recorder = Recorder::new();
        let ready = cache.subscribe(&key(), 1, recorder.clone()).await.unwrap();
        wait_ready(ready).await;

        let group = cache.current(&key()).await.unwrap();
        assert_eq!(group.len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_synthesized_snapshot() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .register(&key(), &Endpoint::new("10.0.0.1", 12200))
            .await
            .unwrap();

        let cache = SnapshotCache::new(backend, 8);
        let first = Recorder::new();
        let ready = cache.subscribe(&key(), 1, first).await.unwrap();
        wait_ready(ready).await;

        let late = Recorder::new();
        cache.subscribe(&key(), 2, late.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let kinds = late.kinds();
        assert_eq!(kinds.first().map(String::as_str), Some("snapshot"));
    }

    #[tokio::test]
    async fn test_deltas_follow_snapshot_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SnapshotCache::new(backend.clone(), 8);

        let recorder = Recorder::new();
        let ready = cache.subscribe(&key(), 1, recorder.clone()).await.unwrap();
        wait_ready(ready).await;

        let a = Endpoint::new("10.0.0.1", 12200);
        let b = Endpoint::new("10.0.0.2", 12200);
        backend.register(&key(), &a).await.unwrap();
        backend.register(&key(), &b).await.unwrap();
        backend.deregister(&key(), &a).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(recorder.kinds(), vec!["snapshot", "added", "added", "removed"]);
        let group = cache.current(&key()).await.unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group.endpoints[0].addr(), "10.0.0.2:12200");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_callbacks() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SnapshotCache::new(backend.clone(), 8);

        let recorder = Recorder::new();
        let ready = cache.subscribe(&key(), 1, recorder.clone()).await.unwrap();
        wait_ready(ready).await;

        cache.unsubscribe(&key(), 1).await.unwrap();
        let calls_at_unsubscribe = recorder.kinds().len();

        backend
            .register(&key(), &Endpoint::new("10.0.0.1", 12200))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(recorder.kinds().len(), calls_at_unsubscribe);
        assert_eq!(cache.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_one_of_two_consumers_unsubscribes() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SnapshotCache::new(backend.clone(), 8);

        let staying = Recorder::new();
        let leaving = Recorder::new();
        let ready = cache.subscribe(&key(), 1, staying.clone()).await.unwrap();
        cache.subscribe(&key(), 2, leaving.clone()).await.unwrap();
        wait_ready(ready).await;

        cache.unsubscribe(&key(), 2).await.unwrap();
        assert_eq!(cache.subscription_count().await, 1);

        backend
            .register(&key(), &Endpoint::new("10.0.0.1", 12200))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(staying.kinds().contains(&"added".to_string()));
        assert!(!leaving.kinds().contains(&"added".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SnapshotCache::new(backend, 8);

        cache.subscribe(&key(), 1, Recorder::new()).await.unwrap();
        let result = cache.subscribe(&key(), 1, Recorder::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SnapshotCache::new(backend.clone(), 8);

        let other = SubscriptionKey::new("com.acme.OtherService", "", "providers");
        cache.subscribe(&key(), 1, Recorder::new()).await.unwrap();
        cache.subscribe(&other, 2, Recorder::new()).await.unwrap();

        cache.clear().await;
        assert_eq!(cache.subscription_count().await, 0);
        assert!(cache.current(&key()).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_reflects_subscriptions() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .register(&key(), &Endpoint::new("10.0.0.1", 12200))
            .await
            .unwrap();

        let cache = SnapshotCache::new(backend, 8);
        let ready = cache.subscribe(&key(), 1, Recorder::new()).await.unwrap();
        cache.subscribe(&key(), 2, Recorder::new()).await.unwrap();
        wait_ready(ready).await;

        let stats = cache.stats().await;
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.listeners, 2);
        assert_eq!(stats.entries[0].endpoints, 1);
        assert!(stats.entries[0].last_event_at.is_some());
    }
}
