use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use thiserror::Error;

use crate::core::registry::Service;

/// Errors produced while picking an instance
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadBalancerError {
    /// The service has no instance URLs to choose from
    #[error("no instances available for service {0}")]
    NoInstances(String),
}

/// Trait defining the interface for load balancing strategies
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Select the instance URL the next request to `service` should use
    fn select(&self, service: &Service) -> Result<String, LoadBalancerError>;

    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn LoadBalancingStrategy>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Round-robin over each service's instance list.
///
/// Keeps one cursor per service name, created lazily on first selection.
/// Every call advances the cursor by one (mod instance count) whatever the
/// outcome of the request that follows.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor for a service, if it has been selected at least once.
    pub fn cursor(&self, service_name: &str) -> Option<usize> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .copied()
    }
}

impl LoadBalancingStrategy for RoundRobinBalancer {
    fn select(&self, service: &Service) -> Result<String, LoadBalancerError> {
        let count = service.urls.len();
        if count == 0 {
            return Err(LoadBalancerError::NoInstances(service.name.clone()));
        }

        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(service.name.clone()).or_insert(0);
        // The instance list may have shrunk since the last selection.
        let index = *cursor % count;
        *cursor = (index + 1) % count;

        Ok(service.urls[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, thread};

    use super::*;

    fn service(name: &str, urls: &[&str]) -> Service {
        Service {
            name: name.to_string(),
            urls: urls.iter().map(|s| s.to_string()).collect(),
            health_path: "/health".to_string(),
            active: true,
        }
    }

    #[test]
    fn test_round_robin_strategy() {
        let balancer = RoundRobinBalancer::new();
        let svc = service("users", &["server1", "server2", "server3"]);

        assert_eq!(balancer.select(&svc).unwrap(), "server1");
        assert_eq!(balancer.select(&svc).unwrap(), "server2");
        assert_eq!(balancer.select(&svc).unwrap(), "server3");
        assert_eq!(balancer.select(&svc).unwrap(), "server1"); // Wraps around
    }

    #[test]
    fn test_round_robin_empty_instances() {
        let balancer = RoundRobinBalancer::new();
        let svc = service("users", &[]);
        assert_eq!(
            balancer.select(&svc),
            Err(LoadBalancerError::NoInstances("users".to_string()))
        );
    }

    #[test]
    fn test_cursors_are_per_service() {
        let balancer = RoundRobinBalancer::new();
        let users = service("users", &["u1", "u2"]);
        let orders = service("orders", &["o1", "o2", "o3"]);

        assert_eq!(balancer.select(&users).unwrap(), "u1");
        assert_eq!(balancer.select(&orders).unwrap(), "o1");
        assert_eq!(balancer.select(&users).unwrap(), "u2");
        assert_eq!(balancer.select(&orders).unwrap(), "o2");
        assert_eq!(balancer.cursor("users"), Some(0));
        assert_eq!(balancer.cursor("orders"), Some(2));
        assert_eq!(balancer.cursor("payments"), None);
    }

    #[test]
    fn test_cursor_survives_shrinking_instance_list() {
        let balancer = RoundRobinBalancer::new();
        let wide = service("users", &["a", "b", "c"]);
        balancer.select(&wide).unwrap();
        balancer.select(&wide).unwrap();

        let narrow = service("users", &["a", "b"]);
        assert_eq!(balancer.select(&narrow).unwrap(), "a");
        assert!(balancer.cursor("users").unwrap() < 2);
    }

    #[test]
    fn test_concurrent_selection_is_fair() {
        let balancer = Arc::new(RoundRobinBalancer::new());
        let svc = Arc::new(service("users", &["a", "b", "c", "d"]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let balancer = balancer.clone();
                let svc = svc.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| balancer.select(&svc).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut hits: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for url in handle.join().unwrap() {
                *hits.entry(url).or_default() += 1;
            }
        }

        // 800 selections over 4 instances
        assert_eq!(hits.len(), 4);
        assert!(hits.values().all(|&n| n == 200));
    }
}
