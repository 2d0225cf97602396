//! Endpoint Descriptor - 네트워크 엔드포인트 값 타입
//!
//! 하나의 인터페이스 변형을 제공하는, 도달 가능한 엔드포인트 하나를
//! 기술한다. 생성 이후 불변이며, 집합 연산의 동일성 기준은 언제나
//! `addr()` (host:port)이다 - 같은 주소에 메타데이터만 다른 기술자는
//! 같은 엔드포인트다.

use crate::config::{resolve_bound_address, ProviderConfig, ServerConfig};
use crate::error::Result;
use crate::key::SubscriptionKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Endpoint
// ============================================================================

/// 엔드포인트 기술자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub weight: u32,
    pub serialization: String,
    pub timeout_ms: u64,

    /// 임의의 문자열 속성
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "tcp".to_string(),
            weight: 100,
            serialization: "json".to_string(),
            timeout_ms: 3000,
            attributes: HashMap::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_serialization(mut self, serialization: impl Into<String>) -> Self {
        self.serialization = serialization.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// 집합 동일성 키 - "host:port"
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.protocol, self.addr())
    }
}

/// 등록용 엔드포인트 구성 - 가상 주소 치환 포함
///
/// 바인딩 주소를 해석한 뒤, 가상 호스트/포트가 설정돼 있으면 백엔드로
/// 나가기 전에 치환한다. 치환은 등록 시점에 원자적이며, 이후의
/// host:port 중복 제거는 치환된 값 기준이다. 가상 포트가 설정되지
/// 않았으면 가상 호스트가 있어도 바인딩 포트가 그대로 등록된다.
pub fn registered_endpoint(provider: &ProviderConfig, server: &ServerConfig) -> Result<Endpoint> {
    let (bound_host, bound_port) = resolve_bound_address(server)?;

    let host = match &server.virtual_host {
        Some(virtual_host) if !virtual_host.is_empty() => virtual_host.clone(),
        _ => bound_host,
    };
    let port = server.virtual_port.unwrap_or(bound_port);

    let mut endpoint = Endpoint::new(host, port)
        .with_protocol(&server.protocol)
        .with_weight(provider.weight)
        .with_serialization(&provider.serialization)
        .with_timeout_ms(provider.timeout_ms);
    if !provider.app_name.is_empty() {
        endpoint = endpoint.with_attribute("appName", &provider.app_name);
    }
    Ok(endpoint)
}

// ============================================================================
// ProviderGroup
// ============================================================================

/// 한 구독 키에 속하는 엔드포인트 묶음
///
/// 백엔드의 스냅샷 하나 또는 델타 하나를 표현한다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderGroup {
    pub key: SubscriptionKey,
    pub endpoints: Vec<Endpoint>,
}

impl ProviderGroup {
    pub fn new(key: SubscriptionKey, endpoints: Vec<Endpoint>) -> Self {
        Self { key, endpoints }
    }

    pub fn empty(key: SubscriptionKey) -> Self {
        Self {
            key,
            endpoints: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_identity() {
        let a = Endpoint::new("10.0.0.1", 12200).with_weight(100);
        let b = Endpoint::new("10.0.0.1", 12200).with_weight(555);
        assert_eq!(a.addr(), b.addr());
        assert_ne!(a, b);
    }

    #[test]
    fn test_registered_endpoint_virtual_substitution() {
        // client -> proxy 127.7.7.7:8888 -> bind 0.0.0.0:12200
        let server = ServerConfig::new()
            .with_host("0.0.0.0")
            .with_port(12200)
            .with_adaptive_port(false)
            .with_virtual_host("127.7.7.7")
            .with_virtual_port(8888);
        let provider = ProviderConfig::new("com.acme.EchoService").with_weight(222);

        let endpoint = registered_endpoint(&provider, &server).unwrap();
        assert_eq!(endpoint.host, "127.7.7.7");
        assert_eq!(endpoint.port, 8888);
        assert_eq!(endpoint.addr(), "127.7.7.7:8888");
        assert_eq!(endpoint.weight, 222);
    }

    #[test]
    fn test_registered_endpoint_virtual_host_only() {
        // 가상 포트가 없으면 바인딩 포트 유지
        let server = ServerConfig::new()
            .with_host("0.0.0.0")
            .with_port(12200)
            .with_adaptive_port(false)
            .with_virtual_host("127.7.7.7");
        let provider = ProviderConfig::new("com.acme.EchoService");

        let endpoint = registered_endpoint(&provider, &server).unwrap();
        assert_eq!(endpoint.host, "127.7.7.7");
        assert_eq!(endpoint.port, 12200);
    }

    #[test]
    fn test_registered_endpoint_no_virtual() {
        let server = ServerConfig::new()
            .with_host("10.1.2.3")
            .with_port(12200)
            .with_adaptive_port(false);
        let provider = ProviderConfig::new("com.acme.EchoService")
            .with_app_name("echo-app")
            .with_serialization("json")
            .with_timeout_ms(4444);

        let endpoint = registered_endpoint(&provider, &server).unwrap();
        assert_eq!(endpoint.addr(), "10.1.2.3:12200");
        assert_eq!(endpoint.timeout_ms, 4444);
        assert_eq!(endpoint.attributes.get("appName").unwrap(), "echo-app");
    }
}
