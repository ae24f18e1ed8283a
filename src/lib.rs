//! # Contrast Remediation Library
//!
//! Real-time text contrast remediation for rendered RGBA frames. Glyph
//! pixels are located with exact signed distance transforms, their
//! backgrounds sampled along the field gradient, and their colours nudged
//! until the WCAG contrast ratio meets the configured target.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `frame`: Owned RGBA frames and image conversion
//! - `backend`: Compute tier selection (GPU, parallel, scalar, disabled)
//! - `core`: The shared-memory transfer buffer and its state machine
//! - `processing`: The per-frame dispatcher pipeline
//! - `config`: Configuration management and validation
//! - `session`: Long-running frame loop with cancellation
//!
//! The numeric kernels (distance transform, sampling, WCAG maths) live in
//! the `contrast-kernel` crate and are re-exported here.
//!
//! ## Example
//!
//! ```rust,no_run
//! use contrast_remediation::{Dispatcher, EnhanceConfig, RgbaFrame};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(EnhanceConfig::default())?;
//! let frame = RgbaFrame::new(vec![255; 64 * 64 * 4], 64, 64)?;
//! let enhanced = dispatcher.enhance(&frame).await?;
//! assert_eq!(enhanced.width, 64);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod frame;
pub mod processing;
pub mod session;

/// Re-export error types for convenience
pub use error::{
    HasRecoverySuggestion, HasSeverity, Recoverable, RemediationError, RemediationResult,
};

pub use backend::{BackendKind, Capabilities, ComputeKernel, CpuKernel, PixelReport};
pub use config::{BackendPreference, EnhanceConfig};
pub use crate::core::{TransferBuffer, TransferState};
pub use frame::RgbaFrame;
pub use processing::{Dispatcher, EnhanceReport};
pub use session::{
    FrameSource, OverlaySink, RemediationSession, RemediationSessionBuilder, SessionHandle,
    SessionStats,
};

/// Re-export the kernel crate
pub use contrast_kernel as kernel;
pub use contrast_kernel::{ContrastResult, EnhanceParams, WcagLevel};
