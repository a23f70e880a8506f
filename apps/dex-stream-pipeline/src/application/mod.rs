//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the pipeline services and the port interfaces that
//! define how they reach the broker and the venues.

/// Port interfaces for external systems (broker, venues).
pub mod ports;

/// Publishing, polling, relaying, and ingest services.
pub mod services;
