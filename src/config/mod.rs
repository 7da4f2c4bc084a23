//! Configuration module for Ripple-Fetch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use ripple_fetch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ripple.toml")).unwrap();
//! println!("Default rate: {} req/s", config.fetch.requests_per_second);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, DomainOverride, FailMode, FetchSettings, PolicySettings, StorageSettings,
    UserAgentSettings,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
