//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Published`: appends a producer's results to a stream
//! - `PollLoop`: grouped reads as an infinite entry sequence
//! - `Relay`: raw stream to adapted stream through a `Transform`
//! - `IngestJob`: periodic venue fetch onto a raw stream
//! - `AdaptedConsumer`: downstream reads of adapted streams

pub mod backoff;
pub mod consumer;
pub mod ingest;
pub mod job_stats;
pub mod poll;
pub mod publish;
pub mod relay;

pub use backoff::{Backoff, BackoffConfig, ExponentialBackoff, NoBackoff};
pub use consumer::AdaptedConsumer;
pub use ingest::IngestJob;
pub use job_stats::{JobSnapshot, JobStats, SharedJobStats};
pub use poll::{PollLoop, PollOutcome, PollSettings};
pub use publish::{PublishError, Published, with_publish};
pub use relay::{Passthrough, QuoteNormalizer, Relay, Transform, TransformError};
