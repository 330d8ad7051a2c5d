//! Prometheus Backend Adapters
//!
//! HTTP client for the Prometheus-compatible query API and the SigV4
//! signer used against managed backends.

pub mod client;
pub mod signer;

pub use client::PrometheusClient;
pub use signer::{RequestSigner, SignerError};
