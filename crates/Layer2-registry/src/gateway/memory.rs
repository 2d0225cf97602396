//! Memory Backend - 인프로세스 코디네이션 백엔드
//!
//! 테스트와 임베디드 배포에서 쓰는 시스템 오브 레코드 대역.
//! 키 하나의 변경과 watch 팬아웃이 같은 배타 구간 안에서 일어나므로
//! 키별 전달 순서는 변경 순서와 같다.

use super::{BackendEvent, BackendGateway, WatchHandle, EVENT_CHANNEL_CAPACITY};
use beacon_foundation::{Endpoint, Error, ProviderGroup, Result, SubscriptionKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

/// 키 하나의 서비스 상태
#[derive(Default)]
struct ServiceState {
    /// 등록 순서 유지, addr 기준 유일
    endpoints: Vec<Endpoint>,
    watches: Vec<WatchSink>,
}

impl ServiceState {
    fn group(&self, key: &SubscriptionKey) -> ProviderGroup {
        ProviderGroup::new(key.clone(), self.endpoints.clone())
    }

    fn position(&self, addr: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.addr() == addr)
    }
}

struct WatchSink {
    handle: WatchHandle,
    tx: mpsc::Sender<BackendEvent>,
}

#[derive(Default)]
struct Inner {
    services: HashMap<SubscriptionKey, ServiceState>,
    /// handle -> key 역인덱스 (unwatch용)
    watch_index: HashMap<WatchHandle, SubscriptionKey>,
}

/// 인프로세스 백엔드
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    watch_seq: AtomicU64,

    /// 주입된 일시 장애 예산 - register/deregister가 소진될 때까지 실패
    fail_budget: AtomicU32,

    /// 핸드셰이크 지연 주입 (밀리초) - start() 타임아웃 경로 테스트용
    connect_delay_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            watch_seq: AtomicU64::new(0),
            fail_budget: AtomicU32::new(0),
            connect_delay_ms: AtomicU64::new(0),
        }
    }

    /// 다음 n개의 register/deregister 호출을 일시 장애로 실패시킨다
    pub fn fail_next(&self, n: u32) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    /// 핸드셰이크 지연 주입
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> Result<()> {
        let mut budget = self.fail_budget.load(Ordering::SeqCst);
        while budget > 0 {
            match self.fail_budget.compare_exchange(
                budget,
                budget - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(Error::Connection("injected connection reset".into())),
                Err(actual) => budget = actual,
            }
        }
        Ok(())
    }

    /// 키의 watch들에게 이벤트 전달, 끊긴 sink는 정리
    async fn fan_out(inner: &mut Inner, key: &SubscriptionKey, event: BackendEvent) {
        let mut dead = Vec::new();
        if let Some(state) = inner.services.get_mut(key) {
            for sink in &state.watches {
                if sink.tx.send(event.clone()).await.is_err() {
                    dead.push(sink.handle);
                }
            }
            if !dead.is_empty() {
                state.watches.retain(|s| !dead.contains(&s.handle));
            }
        }
        for handle in dead {
            inner.watch_index.remove(&handle);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BackendGateway for MemoryBackend {
    async fn connect(&self) -> Result<()> {
        let delay_ms = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(())
    }

    async fn register(&self, key: &SubscriptionKey, endpoint: &Endpoint) -> Result<()> {
        self.take_injected_failure()?;

        let mut inner = self.inner.write().await;
        let state = inner.services.entry(key.clone()).or_default();

        let event = match state.position(&endpoint.addr()) {
            Some(pos) if state.endpoints[pos] == *endpoint => {
                // 동일 엔드포인트 재등록은 no-op
                trace!(key = %key, addr = %endpoint.addr(), "duplicate register ignored");
                return Ok(());
            }
            Some(pos) => {
                // 같은 주소, 다른 메타데이터 - 교체 후 전체 교체 델타
                state.endpoints[pos] = endpoint.clone();
                BackendEvent::Replaced(state.group(key))
            }
            None => {
                state.endpoints.push(endpoint.clone());
                BackendEvent::Added(ProviderGroup::new(key.clone(), vec![endpoint.clone()]))
            }
        };

        debug!(key = %key, addr = %endpoint.addr(), kind = event.kind(), "endpoint registered");
        Self::fan_out(&mut inner, key, event).await;
        Ok(())
    }

    async fn deregister(&self, key: &SubscriptionKey, endpoint: &Endpoint) -> Result<()> {
        self.take_injected_failure()?;

        let mut inner = self.inner.write().await;
        let Some(state) = inner.services.get_mut(key) else {
            debug!(key = %key, addr = %endpoint.addr(), "deregister of unknown key ignored");
            return Ok(());
        };

        let Some(pos) = state.position(&endpoint.addr()) else {
            // 이미 없는 엔드포인트 - 이전 해제와의 경합 허용
            debug!(key = %key, addr = %endpoint.addr(), "deregister of absent endpoint ignored");
            return Ok(());
        };

        let removed = state.endpoints.remove(pos);
        debug!(key = %key, addr = %removed.addr(), "endpoint deregistered");
        let event = BackendEvent::Removed(ProviderGroup::new(key.clone(), vec![removed]));
        Self::fan_out(&mut inner, key, event).await;
        Ok(())
    }

    async fn watch(
        &self,
        key: &SubscriptionKey,
    ) -> Result<(WatchHandle, mpsc::Receiver<BackendEvent>)> {
        let handle = WatchHandle(self.watch_seq.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut inner = self.inner.write().await;
        let state = inner.services.entry(key.clone()).or_default();

        // 설치 직후 현재 상태의 스냅샷을 최소 한 번 전달 (비어 있을 수 있음)
        let snapshot = BackendEvent::Snapshot(state.group(key));
        tx.send(snapshot)
            .await
            .map_err(|_| Error::Backend("watch channel closed during install".into()))?;

        state.watches.push(WatchSink {
            handle,
            tx,
        });
        inner.watch_index.insert(handle, key.clone());

        debug!(key = %key, handle = %handle, "watch installed");
        Ok((handle, rx))
    }

    async fn unwatch(&self, handle: WatchHandle) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(key) = inner.watch_index.remove(&handle) {
            if let Some(state) = inner.services.get_mut(&key) {
                state.watches.retain(|s| s.handle != handle);
            }
            debug!(key = %key, handle = %handle, "watch removed");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        for state in inner.services.values_mut() {
            state.watches.clear();
        }
        inner.watch_index.clear();
        debug!("memory backend shut down");
        Ok(())
    }
}
