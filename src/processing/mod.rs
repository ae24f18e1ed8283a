//! # Processing Module
//!
//! The per-frame remediation pipeline.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, EnhanceReport};
