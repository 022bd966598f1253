//! # radioform-core
//!
//! Real-time pipeline and cross-process transport for a system-wide
//! parametric equalizer:
//! - [`ring`] — the versioned SPSC shared-memory ring transport (C1).
//! - [`dsp`] — biquad cascade, parameter smoother, soft limiter, DC blocker,
//!   and the engine orchestrating them (C2–C5).
//! - [`sample_format`] — OS-native sample format conversion to float32.
//! - [`resampler`] — linear-interpolation sample-rate adapter used by C6.
//! - [`endpoint`] — the virtual endpoint plug-in state machine (C6).
//! - [`registry`] — control-file reconciliation and cooldown logic (C7).
//! - [`preset`] — EQ preset and band types, with validation.
//! - [`config`] — layered configuration for the host process.
//! - [`error`] — shared error types for the control plane.

pub mod config;
pub mod dsp;
pub mod endpoint;
pub mod error;
pub mod preset;
pub mod registry;
pub mod resampler;
pub mod ring;
pub mod sample_format;
pub mod time;

pub use error::{CoreError, Result};
