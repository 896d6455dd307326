//! depwatch-checks — built-in probes.
//!
//! ```text
//! default_registry()
//!   ├── tcp    connect only
//!   ├── http   GET <path>, optional TLS and auth
//!   └── redis  AUTH? SELECT? PING
//! ```
//!
//! Other dependency types need a factory registered by the caller.

pub mod http;
pub mod redis;
pub mod tcp;
mod tls;

use std::sync::Arc;

use depwatch_core::{DependencyType, Probe, ProbeRegistry, ProbeSettings};

pub use http::HttpProbe;
pub use redis::RedisProbe;
pub use tcp::TcpProbe;

/// Registry with the TCP, HTTP, and Redis probes.
pub fn default_registry() -> ProbeRegistry {
    ProbeRegistry::new()
        .with_factory(DependencyType::Tcp, |_: &ProbeSettings| -> Arc<dyn Probe> {
            Arc::new(TcpProbe)
        })
        .with_factory(DependencyType::Http, |settings: &ProbeSettings| -> Arc<dyn Probe> {
            Arc::new(HttpProbe::new(settings))
        })
        .with_factory(DependencyType::Redis, |settings: &ProbeSettings| -> Arc<dyn Probe> {
            Arc::new(RedisProbe::new(settings))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_builtin_types() {
        let registry = default_registry();
        assert_eq!(
            registry.types(),
            vec![DependencyType::Http, DependencyType::Tcp, DependencyType::Redis]
        );

        let probe = registry
            .create(DependencyType::Redis, &ProbeSettings::default())
            .unwrap();
        assert_eq!(probe.dependency_type(), DependencyType::Redis);
        assert!(registry.create(DependencyType::Kafka, &ProbeSettings::default()).is_err());
    }
}
