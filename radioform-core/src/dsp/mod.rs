//! The real-time-safe DSP stack: biquad cascade, parameter smoother, soft
//! limiter + DC blocker, and the engine that orchestrates them (C2–C5).

pub mod biquad;
pub mod commands;
pub mod engine;
pub mod limiter;
pub mod smoother;

pub use engine::{DspEngine, EngineStats};
