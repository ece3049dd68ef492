//! Configuration Module
//!
//! YAML configuration loading for the gateway.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_CONFIG_PATH, DEFAULT_CSP, GatewayConfig, RedactionSettings,
    ServerSettings, SessionSettings, StreamsSettings, TransportSettings,
};
