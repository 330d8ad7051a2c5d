//! Configuration Module
//!
//! Configuration loading for the bridge service.

mod settings;

pub use settings::{
    BackendSettings, BridgeConfig, ConfigError, Credentials, SchedulerSettings, ServerSettings,
};
