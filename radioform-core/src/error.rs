//! Error types shared by the ring transport, DSP engine, and endpoint registry.
//!
//! Real-time paths (the ring producer/consumer, `DspEngine::process_*`) never
//! construct or propagate these — per the concurrency model, they report
//! failure through atomic counters and state-enum transitions instead. These
//! types exist only for the control plane: ring creation, preset application,
//! registry reconciliation.

use thiserror::Error;

/// Errors from creating, opening, or binding a ring transport.
#[derive(Debug, Error)]
pub enum RingError {
    /// Header `protocol_version` did not match the compiled-in magic.
    #[error("ring protocol mismatch: expected {expected:#x}, found {found:#x}")]
    ProtocolMismatch { expected: u32, found: u32 },

    /// `sample_rate`, `channels`, or `format` fell outside the supported set.
    #[error("invalid ring format: {reason}")]
    InvalidFormat { reason: String },

    /// File creation, truncation, or mapping failed.
    #[error("ring io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The header's own invariants are violated (`write_index < read_index`,
    /// or `used > capacity`). Not self-healed; surfaces to the health monitor.
    #[error("ring corruption detected: {reason}")]
    Corruption { reason: String },
}

pub type RingResult<T> = std::result::Result<T, RingError>;

/// Errors from validating an EQ preset.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PresetError {
    #[error("band {index}: frequency_hz {value} out of range [20, 20000]")]
    FrequencyOutOfRange { index: usize, value: f64 },

    #[error("band {index}: gain_db {value} out of range [-12, 12]")]
    GainOutOfRange { index: usize, value: f64 },

    #[error("band {index}: q {value} out of range [0.1, 10.0]")]
    QOutOfRange { index: usize, value: f64 },

    #[error("band {index}: field {field} is not finite")]
    NonFinite { index: usize, field: &'static str },

    #[error("preamp_db {0} out of range [-12, 12]")]
    PreampOutOfRange(f64),

    #[error("limiter_threshold_db {0} out of range [-6, 0]")]
    LimiterThresholdOutOfRange(f64),

    #[error("too many bands: {count} exceeds maximum of {max}")]
    TooManyBands { count: usize, max: usize },

    #[error("unknown filter kind ordinal {0}")]
    UnknownFilterKind(i32),
}

pub type PresetResult<T> = std::result::Result<T, PresetError>;

/// Errors from the DSP engine's configuration tier.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sample rate {0} Hz out of supported range [8000, 384000]")]
    InvalidRate(u32),

    #[error("invalid preset: {0}")]
    InvalidPreset(#[from] PresetError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors from endpoint lifecycle and registry reconciliation.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("ring attach failed after {attempts} attempts: {source}")]
    AttachFailed {
        attempts: u32,
        #[source]
        source: RingError,
    },

    #[error("peer heartbeat stale (no update in {elapsed_ms}ms)")]
    PeerStale { elapsed_ms: u64 },

    #[error("uid {uid} still within cooldown window ({remaining_ms}ms left)")]
    CooldownActive { uid: String, remaining_ms: u64 },
}

pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Aggregate error for control-plane code that crosses module boundaries
/// (the CLI, the routing brain, configuration loading).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
