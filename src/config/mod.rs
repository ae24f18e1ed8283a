//! # Configuration Module
//!
//! Pipeline configuration: defaults, validation and JSON loading.

pub mod config;

pub use config::{BackendPreference, EnhanceConfig};
