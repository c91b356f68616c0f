pub mod breaker;
pub mod query;
pub mod technology;
pub mod ttl;
