//! Configuration utilities.

pub mod toml_config;
