//! Kubetrust - cluster trust issuance and discovery
//!
//! Two halves that never talk to each other directly:
//!
//! - **Control plane**: [`pki`] materializes the certificate authority tree
//!   for the cluster's own services
//! - **Joining node**: [`discovery`] turns a bootstrap token and optional key
//!   pins into a validated root certificate
//!
//! This crate adds the shared configuration file and tracing setup used by
//! the `kubetrust` binary.

pub mod config;
pub mod error;
pub mod telemetry;

pub use kubetrust_discovery as discovery;
pub use kubetrust_pki as pki;

pub use config::KubetrustConfig;
pub use error::{Error, Result};
pub use telemetry::{init_tracing, TelemetryConfig};
