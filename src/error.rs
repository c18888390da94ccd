//! Custom error types for the decoder core.
//!
//! This module provides a centralized error handling system using the
//! `thiserror` crate to define structured, typed errors with clear messages.
//!
//! Only recoverable failures surface here. Contract violations (advancing a
//! decoder before initializing it, requesting a frame the feature source has
//! not produced, resizing a non-empty token store) are programming errors and
//! are enforced with assertions instead.

use thiserror::Error;

/// Primary error type for the decoder core.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Invalid configuration detected at construction time. The component
    /// refuses to start rather than clamp values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Errors from the acoustic model or its wiring (dimension mismatches,
    /// normalized outputs where raw scores are required).
    #[error("Model error: {0}")]
    Model(String),
}

/// Convenience type alias for Results with DecodeError.
pub type Result<T> = std::result::Result<T, DecodeError>;
