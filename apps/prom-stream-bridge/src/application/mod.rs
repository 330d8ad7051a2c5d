//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the scheduling and session services and the
//! port interfaces that define how the domain interacts with the
//! metrics backend and the client transport.

/// Port interfaces for external systems (metrics backend, point sink).
pub mod ports;

/// Application services for subscription scheduling and sessions.
pub mod services;
