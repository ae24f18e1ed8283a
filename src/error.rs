//! # Error Handling
//!
//! Error types for the remediation pipeline, with classification traits that
//! drive the per-frame recovery policy.
//!
//! ## Architecture
//!
//! - **Error Types**: one enum, each variant carrying an [`ErrorContext`]
//! - **Error Traits**: [`Recoverable`], [`HasSeverity`], [`HasRecoverySuggestion`]
//! - **Classification**: [`classify`] helpers used by the dispatcher and session loop
//!
//! ## Recovery Policy
//!
//! | Category | Handling |
//! |----------|----------|
//! | capability | reported once at init, backend degrades |
//! | capacity overflow | fatal to the call, surfaced to the caller |
//! | compute failed / timeout / busy state | frame skipped, previous overlay kept |
//! | config / validation | fatal, fix the input |
//!
//! ## Usage
//!
//! ```rust
//! use contrast_remediation::error::{RemediationError, Recoverable};
//!
//! let error = RemediationError::timeout("wait_for_completion", 2000)
//!     .with_context("frame 42");
//! assert!(error.is_recoverable());
//!
//! let overflow = RemediationError::capacity_overflow("pixel capacity", 10, 4);
//! assert!(!overflow.is_recoverable());
//! ```

use std::{error::Error as StdError, fmt};

use contrast_kernel::KernelError;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    /// Affects the current frame only
    Error,
    Critical,
    /// Cannot continue without caller intervention
    Fatal,
}

impl ErrorSeverity {
    /// Level the error is logged at.
    pub fn log_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error | Self::Critical | Self::Fatal => log::Level::Error,
        }
    }
}

/// Where an error occurred and what to do about it
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Caller-supplied detail, e.g. the frame being processed
    pub context: Option<String>,
    pub recovery_suggestion: Option<String>,
    pub severity: ErrorSeverity,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.recovery_suggestion = Some(suggestion.into());
        self
    }
}

/// Base error type for the remediation pipeline
#[derive(Debug)]
pub enum RemediationError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// A backend capability is missing (shared memory, threads, GPU)
    Capability {
        capability: String,
        reason: String,
        context: ErrorContext,
    },
    /// A declared buffer capacity would be exceeded
    CapacityOverflow {
        capacity: String,
        requested: usize,
        limit: usize,
        context: ErrorContext,
    },
    /// The compute backend raised the ERROR flag
    ComputeFailed {
        backend: String,
        reason: String,
        context: ErrorContext,
    },
    /// A bounded wait ran out while the computation was still running
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// Input validation errors
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    /// Invalid handshake state transitions
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl RemediationError {
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn capability(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capability {
            capability: capability.into(),
            reason: reason.into(),
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Warning)
                .with_recovery_suggestion("Falling back to the next backend tier"),
        }
    }

    /// `capacity` names the exceeded capacity, e.g. "pixel capacity"
    pub fn capacity_overflow(capacity: impl Into<String>, requested: usize, limit: usize) -> Self {
        Self::CapacityOverflow {
            capacity: capacity.into(),
            requested,
            limit,
            context: ErrorContext::new()
                .with_severity(ErrorSeverity::Critical)
                .with_recovery_suggestion("Raise pixel_capacity or process smaller frames"),
        }
    }

    pub fn compute_failed(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ComputeFailed {
            backend: backend.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Attach a path to an I/O error; no-op for other variants
    pub fn with_path(mut self, p: impl Into<String>) -> Self {
        if let Self::Io { path, .. } = &mut self {
            *path = Some(p.into());
        }
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Capability { context, .. } => context,
            Self::CapacityOverflow { context, .. } => context,
            Self::ComputeFailed { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Capability { context, .. } => context,
            Self::CapacityOverflow { context, .. } => context,
            Self::ComputeFailed { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Capability { .. } => "capability",
            Self::CapacityOverflow { .. } => "capacity_overflow",
            Self::ComputeFailed { .. } => "compute_failed",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for RemediationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            RemediationError::Capability {
                capability, reason, ..
            } => {
                write!(f, "Capability '{}' unavailable: {}", capability, reason)
            }
            RemediationError::CapacityOverflow {
                capacity,
                requested,
                limit,
                ..
            } => {
                write!(
                    f,
                    "Requested {} exceeds {} of {}",
                    requested, capacity, limit
                )
            }
            RemediationError::ComputeFailed {
                backend, reason, ..
            } => {
                write!(f, "Compute failed on {} backend: {}", backend, reason)
            }
            RemediationError::Timeout {
                operation,
                duration_ms,
                ..
            } => {
                write!(f, "Timeout during {} after {}ms", operation, duration_ms)
            }
            RemediationError::Validation {
                field,
                constraint,
                value,
                ..
            } => {
                write!(
                    f,
                    "Validation failed for '{}': {} (value: {})",
                    field, constraint, value
                )
            }
            RemediationError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Invalid state transition from '{}' when attempting '{}': {}",
                    current_state, attempted_operation, reason
                )
            }
            RemediationError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "I/O error during {} on '{}': {}",
                        operation, path, source
                    )
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            RemediationError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for RemediationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type RemediationResult<T> = Result<T, RemediationError>;

/// Errors a long-running loop can continue past
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for RemediationError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Capability { .. }
                | Self::ComputeFailed { .. }
                | Self::Timeout { .. }
                | Self::State { .. }
        )
    }
}

pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for RemediationError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for RemediationError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Errors that may clear on the next frame
    pub fn is_transient(error: &RemediationError) -> bool {
        matches!(
            error,
            RemediationError::Timeout { .. }
                | RemediationError::ComputeFailed { .. }
                | RemediationError::State { .. }
        )
    }
}

impl From<std::io::Error> for RemediationError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for RemediationError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<image::ImageError> for RemediationError {
    fn from(error: image::ImageError) -> Self {
        Self::external("image", error)
    }
}

impl From<KernelError> for RemediationError {
    fn from(error: KernelError) -> Self {
        match error {
            KernelError::InvalidParameter { name, value } => {
                Self::config(name, value.to_string(), "out of range")
            }
            KernelError::UnknownName { what, value } => Self::config(what, value, "not recognised"),
            KernelError::BufferTooSmall { needed, actual } => Self::validation(
                "frame",
                format!("needs at least {} bytes", needed),
                actual.to_string(),
            ),
            KernelError::InvalidDimensions {
                width,
                height,
                stride,
            } => Self::validation(
                "dimensions",
                "non-zero size with stride >= width * 4",
                format!("{}x{} stride {}", width, height, stride),
            ),
            KernelError::LengthMismatch {
                what,
                expected,
                actual,
            } => Self::validation(what, format!("length {}", expected), actual.to_string()),
        }
    }
}
