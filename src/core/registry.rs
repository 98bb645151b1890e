//! Catalog of named backend services.
//!
//! The registry owns every [`Service`] entry behind a single reader/writer
//! lock: lookups run concurrently with each other but never overlap a
//! mutation, so every operation observes a consistent catalog.
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use thiserror::Error;

use crate::config::models::ServiceConfig;

/// Errors returned by registry lookups and mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// No entry exists under the requested name
    #[error("service not found: {0}")]
    NotFound(String),

    /// The entry exists but has been deactivated
    #[error("service is inactive: {0}")]
    Inactive(String),

    /// Instance URL failed validation
    #[error("invalid instance URL: {0}")]
    InvalidUrl(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A validated backend instance base URL (`http://` or `https://`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceUrl {
    url: String,
    is_secure: bool,
}

impl InstanceUrl {
    /// Validate and wrap an instance URL.
    pub fn new(url: &str) -> RegistryResult<Self> {
        let is_secure = url.starts_with("https://");
        let is_http = url.starts_with("http://");

        if !is_secure && !is_http {
            return Err(RegistryError::InvalidUrl(format!(
                "instance URL must start with http:// or https://, got: {url}"
            )));
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| RegistryError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.host().is_none() {
            return Err(RegistryError::InvalidUrl(format!("{url}: missing host")));
        }

        Ok(Self {
            url: url.to_string(),
            is_secure,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn into_string(self) -> String {
        self.url
    }
}

impl FromStr for InstanceUrl {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceUrl::new(s)
    }
}

impl fmt::Display for InstanceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A named backend service and its ordered instance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub name: String,
    pub urls: Vec<String>,
    /// Advisory only; the gateway never probes it.
    pub health_path: String,
    pub active: bool,
}

/// Thread-safe service catalog keyed by service name.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with the statically configured services.
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let registry = Self::new();
        for svc in services {
            registry.register(&svc.name, svc.urls.clone(), svc.health_path.clone());
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Service>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Service>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `name`, marking it active.
    pub fn register(&self, name: &str, urls: Vec<String>, health_path: impl Into<String>) {
        let service = Service {
            name: name.to_string(),
            urls,
            health_path: health_path.into(),
            active: true,
        };
        tracing::info!(
            service = %name,
            instances = service.urls.len(),
            "Registering service"
        );
        self.write().insert(name.to_string(), service);
    }

    /// Remove the entry for `name`.
    pub fn unregister(&self, name: &str) -> RegistryResult<()> {
        match self.write().remove(name) {
            Some(_) => {
                tracing::info!(service = %name, "Unregistered service");
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Look up an active service. Inactive entries are reported as such,
    /// never returned.
    pub fn get(&self, name: &str) -> RegistryResult<Service> {
        let services = self.read();
        let service = services
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !service.active {
            return Err(RegistryError::Inactive(name.to_string()));
        }
        Ok(service.clone())
    }

    /// Snapshot of every entry, active or not. Order is unspecified.
    pub fn list(&self) -> Vec<Service> {
        self.read().values().cloned().collect()
    }

    pub fn set_active(&self, name: &str, active: bool) -> RegistryResult<()> {
        let mut services = self.write();
        let service = services
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        service.active = active;
        tracing::info!(service = %name, active, "Service activation changed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_instance_url_valid() {
        let url = InstanceUrl::new("http://users-1:8080").expect("valid http url");
        assert_eq!(url.as_str(), "http://users-1:8080");
        assert!(!url.is_secure());

        let secure: InstanceUrl = "https://users.internal".parse().expect("valid https url");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_instance_url_invalid() {
        assert!(InstanceUrl::new("users-1:8080").is_err());
        assert!(InstanceUrl::new("ftp://users-1").is_err());
        assert!(InstanceUrl::new("http://").is_err());
    }

    #[test]
    fn test_register_and_get() {
        let registry = ServiceRegistry::new();
        registry.register("users", urls(&["http://a:1", "http://b:2"]), "/health");

        let svc = registry.get("users").unwrap();
        assert_eq!(svc.name, "users");
        assert_eq!(svc.urls.len(), 2);
        assert!(svc.active);
    }

    #[test]
    fn test_register_overwrites_and_reactivates() {
        let registry = ServiceRegistry::new();
        registry.register("users", urls(&["http://a:1"]), "/health");
        registry.set_active("users", false).unwrap();

        registry.register("users", urls(&["http://c:3"]), "/status");
        let svc = registry.get("users").unwrap();
        assert_eq!(svc.urls, urls(&["http://c:3"]));
        assert_eq!(svc.health_path, "/status");
        assert!(svc.active);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = ServiceRegistry::new();
        assert_eq!(
            registry.get("orders"),
            Err(RegistryError::NotFound("orders".to_string()))
        );
    }

    #[test]
    fn test_get_inactive_is_inactive() {
        let registry = ServiceRegistry::new();
        registry.register("orders", urls(&["http://a:1"]), "");
        registry.set_active("orders", false).unwrap();

        assert_eq!(
            registry.get("orders"),
            Err(RegistryError::Inactive("orders".to_string()))
        );
        // Still listed while inactive
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_unregister_unknown_leaves_registry_unchanged() {
        let registry = ServiceRegistry::new();
        registry.register("users", urls(&["http://a:1"]), "/health");
        let before = registry.list();

        assert_eq!(
            registry.unregister("ghost"),
            Err(RegistryError::NotFound("ghost".to_string()))
        );
        assert_eq!(registry.list(), before);
    }

    #[test]
    fn test_unregister_removes_entry() {
        let registry = ServiceRegistry::new();
        registry.register("users", urls(&["http://a:1"]), "/health");
        registry.unregister("users").unwrap();
        assert!(registry.is_empty());
        assert!(registry.get("users").is_err());
    }

    #[test]
    fn test_set_active_unknown() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.set_active("ghost", true),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_returns_snapshot() {
        let registry = ServiceRegistry::new();
        registry.register("users", urls(&["http://a:1"]), "/health");
        let snapshot = registry.list();
        registry.unregister("users").unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_concurrent_register_and_get() {
        let registry = Arc::new(ServiceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let name = format!("svc-{i}");
                    registry.register(&name, vec![format!("http://host-{i}:80")], "/health");
                    registry.get(&name).is_ok()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.len(), 8);
    }
}
