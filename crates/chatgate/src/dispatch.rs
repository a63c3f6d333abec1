//! Dispatch router.
//!
//! Adapters live in a registry keyed by provider name; the aggregator is
//! held apart because it doubles as the fallback target. The policy caps
//! retries at exactly one fallback hop to bound worst-case latency:
//! whichever adapter runs second is the last word.

use std::collections::HashMap;
use std::sync::Arc;

use chatgate_core::{AdapterRequest, Error, ProviderAdapter, ResponseEnvelope, Result};
use chatgate_providers::env_bool;

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Route everything through the aggregator first.
    pub force_aggregator: bool,
    /// Allow the single fallback hop (and unknown-provider rerouting).
    pub fallback_enabled: bool,
}

impl DispatchPolicy {
    pub fn from_env() -> Self {
        Self {
            force_aggregator: env_bool("CHATGATE_FORCE_OPENROUTER"),
            fallback_enabled: !env_bool("CHATGATE_DISABLE_FALLBACK"),
        }
    }
}

pub struct ProviderRegistry {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
    aggregator: Arc<dyn ProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new(aggregator: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapters: HashMap::new(),
            aggregator,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    fn native(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        if provider == self.aggregator.name() {
            return Some(Arc::clone(&self.aggregator));
        }
        self.adapters.get(provider).cloned()
    }

    /// Route one request. Outcomes:
    /// - forced-aggregator mode calls the aggregator first; on failure it
    ///   propagates when fallback is disabled, else falls through to the
    ///   native adapter (whose verdict is final);
    /// - otherwise the native adapter runs; on failure, one retry via the
    ///   aggregator, unless the aggregator is what just failed;
    /// - unknown providers reroute to the aggregator when fallback is
    ///   enabled, else fail as unsupported.
    pub async fn dispatch(
        &self,
        policy: &DispatchPolicy,
        provider: &str,
        req: &AdapterRequest,
    ) -> Result<ResponseEnvelope> {
        let aggregator_is_native = provider == self.aggregator.name();

        if policy.force_aggregator && !aggregator_is_native {
            return match self.aggregator.complete(req).await {
                Ok(envelope) => Ok(envelope),
                Err(err) if policy.fallback_enabled => {
                    tracing::warn!(provider, error = %err, "forced aggregator failed, falling through to native adapter");
                    match self.native(provider) {
                        Some(native) => native.complete(req).await,
                        None => Err(err),
                    }
                }
                Err(err) => Err(err),
            };
        }

        match self.native(provider) {
            Some(native) => match native.complete(req).await {
                Ok(envelope) => Ok(envelope),
                Err(err) if !aggregator_is_native && policy.fallback_enabled => {
                    tracing::warn!(provider, error = %err, "native adapter failed, retrying once via aggregator");
                    self.aggregator.complete(req).await
                }
                Err(err) => Err(err),
            },
            None if policy.fallback_enabled => {
                tracing::warn!(provider, "unknown provider, routing to aggregator");
                self.aggregator.complete(req).await
            }
            None => Err(Error::UnsupportedProvider(provider.to_string())),
        }
    }
}
