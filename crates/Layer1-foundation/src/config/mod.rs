//! Beacon 설정 - Registry / Server / Provider / Consumer
//!
//! 레지스트리 클라이언트가 소비하는 설정 표면 전체를 정의한다.
//! 모든 설정은 builder 스타일 `with_*` 세터로 구성하며, 생성 이후에는
//! 값으로 전달된다.

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};

/// 기본 백엔드 핸드셰이크 타임아웃 (밀리초)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// 기본 초기 스냅샷 대기 타임아웃 (밀리초)
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 2000;

/// 리스너별 디스패치 큐 기본 용량
pub const DEFAULT_DISPATCH_QUEUE_SIZE: usize = 64;

/// adaptive port 탐색 범위 (선언 포트부터 위로)
const PORT_SCAN_RANGE: u16 = 128;

/// 와일드카드 호스트가 해석되는 로컬 주소
const LOCALHOST: &str = "127.0.0.1";

// ============================================================================
// RegistryConfig - 레지스트리 연결 설정
// ============================================================================

/// 레지스트리 클라이언트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// 백엔드 프로토콜 선택자 ("memory" 등)
    pub protocol: String,

    /// 백엔드 주소 ("host:port")
    pub address: String,

    /// subscribe() 호출 시 watch 설치 여부
    #[serde(default = "default_true")]
    pub subscribe: bool,

    /// register() 호출 허용 여부 (false면 no-op 가드)
    #[serde(default = "default_true")]
    pub register: bool,

    /// start() 핸드셰이크 타임아웃 (밀리초)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// subscribe()가 초기 스냅샷을 동기로 기다리는 타임아웃 (밀리초, 0이면 대기 안함)
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_ms: u64,

    /// 리스너별 디스패치 큐 용량
    #[serde(default = "default_queue_size")]
    pub dispatch_queue_size: usize,

    /// 백엔드 호출 재시도 설정
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_subscribe_timeout() -> u64 {
    DEFAULT_SUBSCRIBE_TIMEOUT_MS
}

fn default_queue_size() -> usize {
    DEFAULT_DISPATCH_QUEUE_SIZE
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            protocol: "memory".to_string(),
            address: String::new(),
            subscribe: true,
            register: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            subscribe_timeout_ms: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            dispatch_queue_size: DEFAULT_DISPATCH_QUEUE_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_subscribe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.subscribe_timeout_ms = timeout_ms;
        self
    }

    pub fn with_dispatch_queue_size(mut self, size: usize) -> Self {
        self.dispatch_queue_size = size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 설정 검증 - 잘못된 주소는 `Error::Config`
    pub fn validate(&self) -> Result<()> {
        if self.protocol.is_empty() {
            return Err(Error::Config("registry protocol is empty".into()));
        }
        parse_address(&self.address)?;
        if self.dispatch_queue_size == 0 {
            return Err(Error::Config("dispatch queue size must be > 0".into()));
        }
        Ok(())
    }

    /// 인스턴스 공유용 지문 (protocol + address)
    pub fn fingerprint(&self) -> String {
        format!("{}://{}", self.protocol, self.address)
    }
}

/// "host:port" 주소 파싱
fn parse_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("malformed registry address: '{}'", address)))?;
    if host.is_empty() {
        return Err(Error::Config(format!(
            "malformed registry address: '{}'",
            address
        )));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Config(format!("invalid port in registry address: '{}'", address)))?;
    Ok((host.to_string(), port))
}

// ============================================================================
// ServerConfig - 바인딩 주소와 가상 주소
// ============================================================================

/// 프로바이더가 엔드포인트를 노출하는 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// 전송 프로토콜
    pub protocol: String,

    /// 바인딩 호스트 (와일드카드 허용)
    pub host: String,

    /// 선언 포트
    pub port: u16,

    /// 포트 재협상 허용 여부 (false면 선언 포트 그대로)
    #[serde(default = "default_true")]
    pub adaptive_port: bool,

    /// 프록시/NAT 뒤에서 도달 가능한 가상 호스트
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<String>,

    /// 가상 포트 (설정 시에만 치환)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: "tcp".to_string(),
            host: "0.0.0.0".to_string(),
            port: 12200,
            adaptive_port: true,
            virtual_host: None,
            virtual_port: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_adaptive_port(mut self, adaptive: bool) -> Self {
        self.adaptive_port = adaptive;
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }

    pub fn with_virtual_port(mut self, port: u16) -> Self {
        self.virtual_port = Some(port);
        self
    }
}

/// 서버 설정에서 실제 바인딩 주소를 해석한다.
///
/// - 와일드카드/빈 호스트는 구체적인 로컬 호스트로 해석된다.
/// - `adaptive_port`가 켜져 있으면 선언 포트부터 위로 올라가며 바인딩
///   가능한 첫 포트를 고르고, 선언 포트가 0이면 OS가 할당한 포트를 쓴다.
/// - `adaptive_port`가 꺼져 있으면 선언 포트를 그대로 돌려준다.
pub fn resolve_bound_address(config: &ServerConfig) -> Result<(String, u16)> {
    let host = if config.host.is_empty() || config.host == "0.0.0.0" || config.host == "::" {
        LOCALHOST.to_string()
    } else {
        config.host.clone()
    };

    let port = if config.adaptive_port {
        find_available_port(&host, config.port)?
    } else {
        config.port
    };

    Ok((host, port))
}

/// `start`부터 위로 올라가며 바인딩 가능한 첫 포트 탐색
fn find_available_port(host: &str, start: u16) -> Result<u16> {
    if start == 0 {
        let listener = TcpListener::bind((host, 0))?;
        return Ok(listener.local_addr()?.port());
    }

    let end = start.saturating_add(PORT_SCAN_RANGE);
    for port in start..=end {
        if TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }

    Err(Error::Config(format!(
        "no available port in range {}..={} on {}",
        start, end, host
    )))
}

// ============================================================================
// ProviderConfig - 프로바이더 측 설정
// ============================================================================

/// 프로바이더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// 인터페이스 식별자
    pub interface_id: String,

    /// 애플리케이션 이름
    pub app_name: String,

    /// 변형 식별자 (빈 문자열이면 기본 변형)
    #[serde(default)]
    pub unique_id: String,

    /// 등록 허용 여부 (false면 register가 no-op)
    #[serde(default = "default_true")]
    pub register: bool,

    /// 가중치
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// 호출 타임아웃 (밀리초)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// 직렬화 방식
    #[serde(default = "default_serialization")]
    pub serialization: String,

    /// 엔드포인트를 노출하는 서버들 (서버당 엔드포인트 하나)
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

fn default_weight() -> u32 {
    100
}

fn default_timeout() -> u64 {
    3000
}

fn default_serialization() -> String {
    "json".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            interface_id: String::new(),
            app_name: String::new(),
            unique_id: String::new(),
            register: true,
            weight: default_weight(),
            timeout_ms: default_timeout(),
            serialization: default_serialization(),
            servers: Vec::new(),
        }
    }
}

impl ProviderConfig {
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            ..Default::default()
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_serialization(mut self, serialization: impl Into<String>) -> Self {
        self.serialization = serialization.into();
        self
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.servers.push(server);
        self
    }

    /// 서버 추가 (등록 이후 재등록 시나리오용)
    pub fn add_server(&mut self, server: ServerConfig) {
        self.servers.push(server);
    }

    /// 필수 인터페이스 식별자 검증
    pub fn validate(&self) -> Result<()> {
        if self.interface_id.is_empty() {
            return Err(Error::Config("provider interface id is empty".into()));
        }
        Ok(())
    }
}

// ============================================================================
// ConsumerConfig - 컨슈머 측 설정
// ============================================================================

/// 컨슈머 식별자 시퀀스
static CONSUMER_SEQ: AtomicU64 = AtomicU64::new(0);

/// 컨슈머 설정
///
/// `consumer_id`는 생성 시 부여되는 프로세스 내 고유 식별자로,
/// 같은 인터페이스/변형을 구독하는 컨슈머들을 구분한다 (구독 키에는
/// 포함되지 않는다).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConfig {
    /// 인터페이스 식별자
    pub interface_id: String,

    /// 애플리케이션 이름
    pub app_name: String,

    /// 변형 식별자 (빈 문자열이면 기본 변형)
    #[serde(default)]
    pub unique_id: String,

    /// 구독 허용 여부 (false면 subscribe가 watch를 설치하지 않음)
    #[serde(default = "default_true")]
    pub subscribe: bool,

    /// 직렬화 방식
    #[serde(default = "default_serialization")]
    pub serialization: String,

    /// 호출 방식 (sync / oneway 등)
    #[serde(default = "default_invoke_type")]
    pub invoke_type: String,

    /// 호출 타임아웃 (밀리초)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    #[serde(skip, default = "next_consumer_id")]
    consumer_id: u64,
}

fn default_invoke_type() -> String {
    "sync".to_string()
}

fn next_consumer_id() -> u64 {
    CONSUMER_SEQ.fetch_add(1, Ordering::SeqCst)
}

impl ConsumerConfig {
    pub fn new(interface_id: impl Into<String>) -> Self {
        Self {
            interface_id: interface_id.into(),
            app_name: String::new(),
            unique_id: String::new(),
            subscribe: true,
            serialization: default_serialization(),
            invoke_type: default_invoke_type(),
            timeout_ms: default_timeout(),
            consumer_id: next_consumer_id(),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_subscribe(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn with_serialization(mut self, serialization: impl Into<String>) -> Self {
        self.serialization = serialization.into();
        self
    }

    pub fn with_invoke_type(mut self, invoke_type: impl Into<String>) -> Self {
        self.invoke_type = invoke_type.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// 프로세스 내 고유 컨슈머 식별자
    pub fn consumer_id(&self) -> u64 {
        self.consumer_id
    }

    /// 필수 인터페이스 식별자 검증
    pub fn validate(&self) -> Result<()> {
        if self.interface_id.is_empty() {
            return Err(Error::Config("consumer interface id is empty".into()));
        }
        Ok(())
    }
}
