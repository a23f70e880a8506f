//! Configuration Module
//!
//! Configuration loading for the pipeline service.

mod settings;

pub use settings::{
    BrokerSettings, ConfigError, PipelineConfig, PollingSettings, ServerSettings, StreamSettings,
    VenueSettings,
};
