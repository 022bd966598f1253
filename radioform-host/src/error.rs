//! Error types for the host process: device selection, stream setup, and
//! the routing brain's OS-notification handling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("audio output error: {0}")]
    AudioOutput(String),

    #[error("no audio output device available")]
    NoDevice,

    #[error(transparent)]
    Core(#[from] radioform_core::CoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
