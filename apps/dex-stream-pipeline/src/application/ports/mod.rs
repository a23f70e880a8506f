//! Port Interfaces
//!
//! Contracts between the pipeline services and the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamBroker`: consumer groups, appends, and grouped reads
//! - `VenueSource`: on-demand market data queries

mod broker_port;
mod venue_port;

#[cfg(test)]
pub use broker_port::MockStreamBroker;
pub use broker_port::{BrokerError, SharedBroker, StreamBroker};
#[cfg(test)]
pub use venue_port::MockVenueSource;
pub use venue_port::{VenueError, VenueSource};
