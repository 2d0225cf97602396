//! Registry Client Factory - 설정 지문 기준 인스턴스 공유
//!
//! 프로세스 전역 싱글턴 대신 팩토리 값 하나가 소유 범위가 된다. 같은
//! 지문(protocol + address)의 설정은 클라이언트 하나를 공유하고,
//! 참조 수가 0이 되는 release에서 destroy된다. 프로토콜별 백엔드는
//! `BackendConnector`로 플러그인한다.

use crate::client::RegistryClient;
use crate::gateway::{BackendGateway, MemoryBackend};
use beacon_foundation::{Error, RegistryConfig, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// BackendConnector
// ============================================================================

/// 프로토콜 하나의 백엔드 생성자
///
/// 여기서는 게이트웨이 값만 만든다. 실제 핸드셰이크는 클라이언트의
/// `start()`가 수행한다.
pub trait BackendConnector: Send + Sync {
    /// 이 커넥터가 담당하는 프로토콜 선택자
    fn protocol(&self) -> &str;

    /// 게이트웨이 생성
    fn build(&self, config: &RegistryConfig) -> Result<Arc<dyn BackendGateway>>;
}

/// 인프로세스 백엔드 커넥터
pub struct MemoryConnector;

impl BackendConnector for MemoryConnector {
    fn protocol(&self) -> &str {
        "memory"
    }

    fn build(&self, _config: &RegistryConfig) -> Result<Arc<dyn BackendGateway>> {
        Ok(Arc::new(MemoryBackend::new()))
    }
}

// ============================================================================
// RegistryClientFactory
// ============================================================================

struct Entry {
    client: Arc<RegistryClient>,
    refcount: usize,
}

/// 레지스트리 클라이언트 팩토리
pub struct RegistryClientFactory {
    connectors: Mutex<HashMap<String, Arc<dyn BackendConnector>>>,
    instances: Mutex<HashMap<String, Entry>>,
}

impl RegistryClientFactory {
    /// 인프로세스 커넥터가 기본 등록된 팩토리
    pub fn new() -> Self {
        let factory = Self {
            connectors: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        };
        factory.register_connector(Arc::new(MemoryConnector));
        factory
    }

    /// 커넥터 등록 - 같은 프로토콜은 마지막 등록이 이긴다
    pub fn register_connector(&self, connector: Arc<dyn BackendConnector>) {
        let protocol = connector.protocol().to_string();
        debug!(protocol = %protocol, "backend connector registered");
        self.connectors.lock().insert(protocol, connector);
    }

    /// 클라이언트 획득 - 같은 지문은 공유, 참조 수 증가
    ///
    /// 반환된 클라이언트는 아직 `init()`/`start()` 전일 수 있다.
    pub fn acquire(&self, config: &RegistryConfig) -> Result<Arc<RegistryClient>> {
        let fingerprint = config.fingerprint();
        let mut instances = self.instances.lock();

        if let Some(entry) = instances.get_mut(&fingerprint) {
            entry.refcount += 1;
            debug!(registry = %fingerprint, refcount = entry.refcount, "registry client shared");
            return Ok(entry.client.clone());
        }

        let connector = self
            .connectors
            .lock()
            .get(&config.protocol)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no backend connector for protocol '{}'",
                    config.protocol
                ))
            })?;

        let backend = connector.build(config)?;
        let client = Arc::new(RegistryClient::new(config.clone(), backend));
        instances.insert(
            fingerprint.clone(),
            Entry {
                client: client.clone(),
                refcount: 1,
            },
        );
        info!(registry = %fingerprint, "registry client created");
        Ok(client)
    }

    /// 클라이언트 반납 - 참조 수가 0이 되면 destroy
    ///
    /// 모르는 지문의 반납은 조용히 무시한다.
    pub async fn release(&self, config: &RegistryConfig) -> Result<()> {
        let fingerprint = config.fingerprint();

        let to_destroy = {
            let mut instances = self.instances.lock();
            match instances.get_mut(&fingerprint) {
                Some(entry) if entry.refcount > 1 => {
                    entry.refcount -= 1;
                    debug!(registry = %fingerprint, refcount = entry.refcount, "registry client released");
                    None
                }
                Some(_) => instances.remove(&fingerprint).map(|e| e.client),
                None => {
                    debug!(registry = %fingerprint, "release of unknown registry ignored");
                    None
                }
            }
        };

        if let Some(client) = to_destroy {
            client.destroy().await?;
            info!(registry = %fingerprint, "registry client destroyed by factory");
        }
        Ok(())
    }

    /// 살아 있는 인스턴스 수
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for RegistryClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RegistryState;

    fn config(address: &str) -> RegistryConfig {
        RegistryConfig::new()
            .with_protocol("memory")
            .with_address(address)
    }

    #[tokio::test]
    async fn test_same_fingerprint_shares_instance() {
        let factory = RegistryClientFactory::new();
        let a = factory.acquire(&config("127.0.0.1:8848")).unwrap();
        let b = factory.acquire(&config("127.0.0.1:8848")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.instance_count(), 1);

        let c = factory.acquire(&config("127.0.0.1:9999")).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(factory.instance_count(), 2);
    }

    #[tokio::test]
    async fn test_release_destroys_at_refcount_zero() {
        let factory = RegistryClientFactory::new();
        let client = factory.acquire(&config("127.0.0.1:8848")).unwrap();
        factory.acquire(&config("127.0.0.1:8848")).unwrap();

        client.init().await.unwrap();
        client.start().await.unwrap();

        factory.release(&config("127.0.0.1:8848")).await.unwrap();
        assert_eq!(client.state().await, RegistryState::Started);
        assert_eq!(factory.instance_count(), 1);

        factory.release(&config("127.0.0.1:8848")).await.unwrap();
        assert_eq!(client.state().await, RegistryState::Destroyed);
        assert_eq!(factory.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_protocol_rejected() {
        let factory = RegistryClientFactory::new();
        let config = RegistryConfig::new()
            .with_protocol("zookeeper")
            .with_address("127.0.0.1:2181");
        assert!(matches!(factory.acquire(&config), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_release_unknown_is_silent() {
        let factory = RegistryClientFactory::new();
        assert!(factory.release(&config("127.0.0.1:8848")).await.is_ok());
    }
}
