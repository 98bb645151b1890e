pub mod circuit_breaker;
pub mod error;
pub mod gateway;
pub mod load_balancer;
pub mod proxy;
pub mod rate_limiter;
pub mod registry;

pub use circuit_breaker::{BreakerState, CircuitBreakerManager};
pub use error::{ApiResponse, GatewayError};
pub use gateway::GatewayService;
pub use load_balancer::{LoadBalancingStrategy, RoundRobinBalancer};
pub use proxy::ProxyForwarder;
pub use rate_limiter::TokenBucketLimiter;
pub use registry::ServiceRegistry;
