//! # Core Infrastructure Module
//!
//! Low-level infrastructure shared by the orchestrator and the compute
//! backends: the fixed-layout transfer buffer and its handshake.

pub mod transfer_buffer;

pub use transfer_buffer::{BufferHeader, ComputeGuard, Layout, TransferBuffer, TransferState};
