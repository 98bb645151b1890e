//! Core gateway orchestration service.
//!
//! The `GatewayService` owns the routing state shared by every request: the
//! service registry, the load balancer cursors and the per-service circuit
//! breakers. It is constructed once at startup and handed to the HTTP layer
//! behind an `Arc`; nothing here is ambient global state.
use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::GatewayConfig,
    core::{
        circuit_breaker::{BreakerSettings, BreakerState, CircuitBreakerManager},
        load_balancer::{LoadBalancingStrategy, RoundRobinBalancer},
        proxy::ProxyForwarder,
        registry::{InstanceUrl, RegistryResult, Service, ServiceRegistry},
    },
    ports::http_client::HttpClient,
};

/// Registry entry plus the live state of its breaker, as listed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: Service,
    pub circuit_breaker: BreakerState,
}

/// Central owner of routing and resilience state.
pub struct GatewayService {
    registry: Arc<ServiceRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    forwarder: ProxyForwarder,
}

impl GatewayService {
    /// Build from configuration: statically configured services are
    /// registered, breakers take the configured thresholds.
    pub fn new(config: &GatewayConfig, client: Arc<dyn HttpClient>) -> Self {
        let registry = Arc::new(ServiceRegistry::from_config(&config.services));
        let breakers = Arc::new(CircuitBreakerManager::new(BreakerSettings::from(
            &config.circuit_breaker,
        )));
        Self::from_parts(registry, Arc::new(RoundRobinBalancer::new()), breakers, client)
    }

    pub fn from_parts(
        registry: Arc<ServiceRegistry>,
        balancer: Arc<dyn LoadBalancingStrategy>,
        breakers: Arc<CircuitBreakerManager>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        let forwarder = ProxyForwarder::new(registry.clone(), balancer, breakers.clone(), client);
        tracing::info!(services = registry.len(), "Gateway service initialized");
        Self {
            registry,
            breakers,
            forwarder,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn forwarder(&self) -> &ProxyForwarder {
        &self.forwarder
    }

    /// Validate instance URLs, then register. Nothing is stored when any URL
    /// is rejected.
    pub fn register_service(
        &self,
        name: &str,
        urls: Vec<String>,
        health_path: impl Into<String>,
    ) -> RegistryResult<()> {
        let urls = urls
            .iter()
            .map(|url| InstanceUrl::new(url).map(InstanceUrl::into_string))
            .collect::<RegistryResult<Vec<_>>>()?;
        self.registry.register(name, urls, health_path);
        Ok(())
    }

    /// Every registered service with its breaker state, sorted by name.
    pub fn service_views(&self) -> Vec<ServiceView> {
        let mut services = self.registry.list();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
            .into_iter()
            .map(|service| ServiceView {
                circuit_breaker: self
                    .breakers
                    .state(&service.name)
                    .unwrap_or(BreakerState::Closed),
                service,
            })
            .collect()
    }
}
