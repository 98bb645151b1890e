//! Traits at the edges of the gateway core. Implementations live in `adapters`.
pub mod bucket_store;
pub mod http_client;
pub mod identity;
