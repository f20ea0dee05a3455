// src/core/mod.rs
//! Configuration and REST plumbing shared by the library and the CLI

pub mod config_manager;
pub mod service_client;

pub use config_manager::{ConfigManager, ListenerConfig, ServiceConfig};
pub use service_client::ServiceClient;
