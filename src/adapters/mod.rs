pub mod http_client;
pub mod http_handler;
pub mod identity;
pub mod memory_store;
pub mod middleware;
pub mod redis_store;
pub mod router;
pub mod token;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use identity::InMemoryIdentityProvider;
pub use memory_store::{MemoryBucketStore, spawn_purge_task};
pub use redis_store::RedisBucketStore;
pub use router::build_router;
pub use token::TokenService;
