//! Subscription Key - 구독 키 해석

use crate::config::{ConsumerConfig, ProviderConfig};
use serde::{Deserialize, Serialize};

/// 프로바이더 엔드포인트가 속하는 카테고리
pub const CATEGORY_PROVIDERS: &str = "providers";

/// 구독 키
///
/// {인터페이스 식별자, 변형 식별자, 카테고리}에서 결정적으로 유도되며,
/// 프로바이더 등록과 컨슈머 구독이 같은 백엔드 리소스로 수렴하는 기준이
/// 된다. 변형 식별자가 다르면 다른 키이고, 일치하는 프로바이더가 없는
/// 키로 구독하면 빈 엔드포인트 집합이 나온다 (에러 아님).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub interface_id: String,
    pub unique_id: String,
    pub category: String,
}

impl SubscriptionKey {
    pub fn new(
        interface_id: impl Into<String>,
        unique_id: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            unique_id: unique_id.into(),
            category: category.into(),
        }
    }

    /// 프로바이더 설정에서 키 유도
    pub fn for_provider(config: &ProviderConfig) -> Self {
        Self::new(&config.interface_id, &config.unique_id, CATEGORY_PROVIDERS)
    }

    /// 컨슈머 설정에서 키 유도 - 동등한 프로바이더 설정과 같은 키가 나온다
    pub fn for_consumer(config: &ConsumerConfig) -> Self {
        Self::new(&config.interface_id, &config.unique_id, CATEGORY_PROVIDERS)
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unique_id.is_empty() {
            write!(f, "{}/{}", self.category, self.interface_id)
        } else {
            write!(f, "{}/{}#{}", self.category, self.interface_id, self.unique_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_consumer_keys_match() {
        let provider = ProviderConfig::new("com.acme.EchoService").with_unique_id("blue");
        let consumer = ConsumerConfig::new("com.acme.EchoService").with_unique_id("blue");

        assert_eq!(
            SubscriptionKey::for_provider(&provider),
            SubscriptionKey::for_consumer(&consumer)
        );
    }

    #[test]
    fn test_unique_id_mismatch_is_different_key() {
        let provider = ProviderConfig::new("com.acme.EchoService").with_unique_id("blue");
        let consumer = ConsumerConfig::new("com.acme.EchoService");

        assert_ne!(
            SubscriptionKey::for_provider(&provider),
            SubscriptionKey::for_consumer(&consumer)
        );
    }

    #[test]
    fn test_display() {
        let plain = SubscriptionKey::new("com.acme.EchoService", "", CATEGORY_PROVIDERS);
        assert_eq!(plain.to_string(), "providers/com.acme.EchoService");

        let variant = SubscriptionKey::new("com.acme.EchoService", "blue", CATEGORY_PROVIDERS);
        assert_eq!(variant.to_string(), "providers/com.acme.EchoService#blue");
    }
}
