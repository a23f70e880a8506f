//! Domain Layer - Stream naming and payload types.
//!
//! Pure types with no I/O: stream keys, the process-wide registry of keys,
//! consumer group names, and the payload shapes that travel over the broker.

/// Stream key dimensions and builder.
pub mod stream_key;

/// Pre-computed keys for one marketplace/blockchain pair.
pub mod registry;

/// Consumer group naming schemes.
pub mod consumer_group;

/// Payloads, entry fields, and their flat JSON encoding.
pub mod payload;
