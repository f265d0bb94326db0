//! fpgate - an archive-first failover router for legacy web content.
//!
//! fpgate sits behind an intercepting proxy and answers each client request from
//! one of two loopback backends:
//!
//! 1. the **archive server**, which serves files out of on-disk zip containers
//!    under `/content/<host>/<path>`, and
//! 2. the **legacy backend** (a PHP built-in server supervised by fpgate, or a
//!    standing service), which receives the original, unrewritten request.
//!
//! The archive is always tried first. Any status of 400 or above, or a transport
//! failure, sends the request to the legacy backend exactly once. Fallback sockets
//! are pinned to `127.0.0.1:<legacy-port>` whatever host the request names, so
//! DNS is never consulted for legacy traffic. The final response's `Content-Type`
//! is resolved from the configured extension table.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use fpgate::{FailoverRouter, FallbackTransport, HttpClientAdapter, config::RoutingSettings};
//!
//! # fn main() -> eyre::Result<()> {
//! let settings = Arc::new(RoutingSettings::default());
//! let router = FailoverRouter::new(
//!     settings.clone(),
//!     Arc::new(HttpClientAdapter::new()?),
//!     Arc::new(FallbackTransport::new(settings.legacy_port())?),
//! );
//! // Hand `router` to a ProxyHandler (see the binary crate).
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (traits) are separated from **adapters** (I/O implementations), and
//! the routing policy lives in `core`, which only talks to backends through the
//! [`HttpClient`] port.
//!
//! # Error Handling
//! Domain errors are `thiserror` enums; application plumbing returns
//! `eyre::Result<T>` with `WrapErr` context. Routing itself never fails: backend
//! errors become logged error statuses.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        FallbackTransport, HttpClientAdapter, LegacyProcessConfig, LegacyProcessSupervisor,
        ProxyHandler,
    },
    core::{FailoverRouter, InboundRequest, Provenance, RoutingOutcome},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
