pub mod fallback_transport;
pub mod http_client;
pub mod legacy_supervisor;
pub mod proxy_handler;

/// Re-export commonly used types from adapters
pub use fallback_transport::FallbackTransport;
pub use http_client::HttpClientAdapter;
pub use legacy_supervisor::{LegacyProcessConfig, LegacyProcessSupervisor, SupervisorState};
pub use proxy_handler::ProxyHandler;
