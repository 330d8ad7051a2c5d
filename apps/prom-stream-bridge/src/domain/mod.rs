//! Domain Layer - Core subscription and data point types.
//!
//! This layer contains the core domain types for metrics streaming
//! with no transport or backend dependencies. All types here are pure
//! Rust with serialization support.

/// Normalized data points and series rows.
pub mod point;

/// Subscription parameters and lifecycle state.
pub mod subscription;
