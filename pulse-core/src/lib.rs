//! Pulse Core - configuration and credentials for Pulse
//!
//! This crate holds the explicit configuration value that is built once at
//! startup and passed by reference into every extract, plus the GitHub token
//! lookup.

pub mod config;
pub mod error;
pub mod secrets;

pub use config::{Config, FetchConfig, GitHubConfig, LimitsConfig, OutputConfig, Overrides};
pub use error::{Error, Result};
pub use secrets::{GitHubSecrets, Secrets};
