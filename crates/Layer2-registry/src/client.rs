//! Registry Client - 레지스트리 클라이언트 파사드
//!
//! 수명 주기 상태 기계를 가진 단일 진입점:
//! `Uninitialized → Initialized → Started → Destroyed`.
//! 등록/구독 연산은 `Started`에서만 허용되고, `Destroyed`는 종착
//! 상태다. `start()`는 핸드셰이크 타임아웃을 에러가 아니라 `false`로
//! 돌려줘 호출자가 재시도하게 한다.

use crate::cache::{CacheStats, SnapshotCache};
use crate::dispatch::ProviderListener;
use crate::gateway::{BackendGateway, BatchReport};
use beacon_foundation::{
    registered_endpoint, with_retry, ConsumerConfig, Error, ProviderConfig, ProviderGroup,
    RegistryConfig, Result, SubscriptionKey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// ============================================================================
// RegistryState
// ============================================================================

/// 클라이언트 수명 주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    Initialized,
    Started,
    Destroyed,
}

impl RegistryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RegistryClient
// ============================================================================

/// 레지스트리 클라이언트
pub struct RegistryClient {
    config: RegistryConfig,
    backend: Arc<dyn BackendGateway>,
    cache: SnapshotCache,
    state: RwLock<RegistryState>,
}

impl RegistryClient {
    /// 새 클라이언트 - 아직 init() 전
    pub fn new(config: RegistryConfig, backend: Arc<dyn BackendGateway>) -> Self {
        let cache = SnapshotCache::new(backend.clone(), config.dispatch_queue_size);
        Self {
            config,
            backend,
            cache,
            state: RwLock::new(RegistryState::Uninitialized),
        }
    }

    pub async fn state(&self) -> RegistryState {
        *self.state.read().await
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    async fn ensure_started(&self) -> Result<()> {
        match *self.state.read().await {
            RegistryState::Started => Ok(()),
            RegistryState::Destroyed => Err(Error::Destroyed),
            actual => Err(Error::invalid_state(
                RegistryState::Started.as_str(),
                actual.as_str(),
            )),
        }
    }

    // ========================================================================
    // 수명 주기
    // ========================================================================

    /// 설정 검증 및 준비 - `Uninitialized → Initialized`
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            RegistryState::Uninitialized => {}
            RegistryState::Destroyed => return Err(Error::Destroyed),
            actual => {
                return Err(Error::invalid_state(
                    RegistryState::Uninitialized.as_str(),
                    actual.as_str(),
                ))
            }
        }

        self.config.validate()?;
        *state = RegistryState::Initialized;
        info!(registry = %self.config.fingerprint(), "registry client initialized");
        Ok(())
    }

    /// 백엔드 핸드셰이크 - `Initialized → Started`
    ///
    /// 핸드셰이크가 연결 타임아웃 안에 끝나지 않으면 `Ok(false)`를
    /// 돌려주고 `Initialized`에 머문다. 호출자는 재시도하면 된다.
    pub async fn start(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        match *state {
            RegistryState::Initialized => {}
            RegistryState::Started => return Ok(true),
            RegistryState::Destroyed => return Err(Error::Destroyed),
            actual => {
                return Err(Error::invalid_state(
                    RegistryState::Initialized.as_str(),
                    actual.as_str(),
                ))
            }
        }

        let window = Duration::from_millis(self.config.connect_timeout_ms);
        match timeout(window, self.backend.connect()).await {
            Ok(Ok(())) => {
                *state = RegistryState::Started;
                info!(registry = %self.config.fingerprint(), "registry client started");
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    registry = %self.config.fingerprint(),
                    timeout_ms = self.config.connect_timeout_ms,
                    "backend handshake timed out"
                );
                Ok(false)
            }
        }
    }

    /// 종착 해체 - 모든 구독과 연결을 정리한다
    ///
    /// 멱등이며, 진행 중인 연산은 셧다운을 막지 않고 조용히 실패한다.
    pub async fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == RegistryState::Destroyed {
                return Ok(());
            }
            *state = RegistryState::Destroyed;
        }

        self.cache.clear().await;
        if let Err(e) = self.backend.shutdown().await {
            warn!(error = %e, "backend shutdown reported an error during destroy");
        }
        info!(registry = %self.config.fingerprint(), "registry client destroyed");
        Ok(())
    }

    // ========================================================================
    // 등록
    // ========================================================================

    /// 프로바이더 등록 - 부착된 서버마다 엔드포인트 하나
    ///
    /// 레지스트리 또는 프로바이더의 register 플래그가 꺼져 있으면
    /// no-op. 가상 주소 치환은 엔드포인트가 게이트웨이에 닿기 전에
    /// 적용된다. 일시 장애는 재시도 설정에 따라 재시도 후 표면화된다.
    pub async fn register(&self, provider: &ProviderConfig) -> Result<()> {
        self.ensure_started().await?;

        if !self.config.register || !provider.register {
            debug!(interface = %provider.interface_id, "register flag off; skipping");
            return Ok(());
        }
        provider.validate()?;

        let key = SubscriptionKey::for_provider(provider);
        for server in &provider.servers {
            let endpoint = registered_endpoint(provider, server)?;
            with_retry(&self.config.retry, "register", || {
                let endpoint = endpoint.clone();
                let key = key.clone();
                async move { self.backend.register(&key, &endpoint).await }
            })
            .await?;
            info!(key = %key, addr = %endpoint.addr(), "provider registered");
        }
        Ok(())
    }

    /// 프로바이더 등록 해제
    pub async fn unregister(&self, provider: &ProviderConfig) -> Result<()> {
        self.ensure_started().await?;

        if !self.config.register || !provider.register {
            debug!(interface = %provider.interface_id, "register flag off; skipping unregister");
            return Ok(());
        }

        let key = SubscriptionKey::for_provider(provider);
        for server in &provider.servers {
            let endpoint = registered_endpoint(provider, server)?;
            with_retry(&self.config.retry, "unregister", || {
                let endpoint = endpoint.clone();
                let key = key.clone();
                async move { self.backend.deregister(&key, &endpoint).await }
            })
            .await?;
            info!(key = %key, addr = %endpoint.addr(), "provider unregistered");
        }
        Ok(())
    }

    /// 배치 등록 - 항목별 보고, 트랜잭션 아님
    pub async fn batch_register(&self, providers: &[ProviderConfig]) -> Result<BatchReport> {
        self.ensure_started().await?;

        let mut report = BatchReport::default();
        for (index, provider) in providers.iter().enumerate() {
            let result = self.register(provider).await;
            if let Err(e) = &result {
                warn!(interface = %provider.interface_id, error = %e, "batch register item failed");
            }
            report.push(index, &provider.interface_id, result);
        }
        Ok(report)
    }

    /// 배치 등록 해제 - 한 항목의 실패가 나머지를 중단시키지 않는다
    pub async fn batch_unregister(&self, providers: &[ProviderConfig]) -> Result<BatchReport> {
        self.ensure_started().await?;

        let mut report = BatchReport::default();
        for (index, provider) in providers.iter().enumerate() {
            let result = self.unregister(provider).await;
            if let Err(e) = &result {
                warn!(interface = %provider.interface_id, error = %e, "batch unregister item failed");
            }
            report.push(index, &provider.interface_id, result);
        }
        Ok(report)
    }

    // ========================================================================
    // 구독
    // ========================================================================

    /// 컨슈머 구독
    ///
    /// 구독 타임아웃 안에서 첫 스냅샷을 기다린 뒤 현재 알려진 그룹을
    /// 돌려준다 (비어 있을 수 있고, 권위 있는 값은 리스너로 온다).
    /// 타임아웃이 0이면 기다리지 않는다. subscribe 플래그가 꺼져
    /// 있으면 watch 없이 빈 결과를 돌려준다.
    pub async fn subscribe(
        &self,
        consumer: &ConsumerConfig,
        listener: Arc<dyn ProviderListener>,
    ) -> Result<Vec<ProviderGroup>> {
        self.ensure_started().await?;

        if !self.config.subscribe || !consumer.subscribe {
            debug!(interface = %consumer.interface_id, "subscribe flag off; skipping");
            return Ok(Vec::new());
        }
        consumer.validate()?;

        let key = SubscriptionKey::for_consumer(consumer);
        let mut ready = self
            .cache
            .subscribe(&key, consumer.consumer_id(), listener)
            .await?;

        if self.config.subscribe_timeout_ms > 0 {
            let window = Duration::from_millis(self.config.subscribe_timeout_ms);
            let wait = async {
                while !*ready.borrow() {
                    if ready.changed().await.is_err() {
                        break;
                    }
                }
            };
            if timeout(window, wait).await.is_err() {
                warn!(key = %key, timeout_ms = self.config.subscribe_timeout_ms,
                    "first snapshot not observed within subscribe window");
            }
        }

        let groups = match self.cache.current(&key).await {
            Some(group) if !group.is_empty() => vec![group],
            _ => Vec::new(),
        };
        info!(key = %key, consumer_id = consumer.consumer_id(), groups = groups.len(),
            "consumer subscribed");
        Ok(groups)
    }

    /// 컨슈머 구독 해제 - 반환 이후 이 컨슈머의 콜백은 실행되지 않는다
    pub async fn unsubscribe(&self, consumer: &ConsumerConfig) -> Result<()> {
        self.ensure_started().await?;

        let key = SubscriptionKey::for_consumer(consumer);
        self.cache.unsubscribe(&key, consumer.consumer_id()).await?;
        info!(key = %key, consumer_id = consumer.consumer_id(), "consumer unsubscribed");
        Ok(())
    }

    /// 배치 구독 해제
    pub async fn batch_unsubscribe(&self, consumers: &[ConsumerConfig]) -> Result<BatchReport> {
        self.ensure_started().await?;

        let mut report = BatchReport::default();
        for (index, consumer) in consumers.iter().enumerate() {
            let result = self.unsubscribe(consumer).await;
            if let Err(e) = &result {
                warn!(interface = %consumer.interface_id, error = %e, "batch unsubscribe item failed");
            }
            report.push(index, &consumer.interface_id, result);
        }
        Ok(report)
    }

    /// 캐시 통계
    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
