//! Shared configuration shape and file loading.
//!
//! Layering follows the same priority order the teacher workspace uses for
//! root-folder resolution: CLI argument > environment variable > TOML file >
//! compiled default. `radioform-host` owns the CLI/env layers; this module
//! owns the TOML file layer and the defaults both sides fall back to.

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Ring-transport and routing configuration shared between the host process
/// and anything that simulates the plug-in side for testing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directory holding the memory-mapped ring files, one per endpoint uid.
    pub ring_dir: PathBuf,

    /// Ring duration in milliseconds; clamped to `[20, 100]` on use.
    pub ring_duration_ms: u32,

    /// Automatically switch the OS default output to a virtual endpoint's
    /// matching physical when the user selects the physical directly.
    pub auto_switch_default_output: bool,

    /// Mirror virtual-endpoint volume changes onto the physical device.
    pub forward_volume: bool,

    /// `tracing_subscriber::EnvFilter` directive string, e.g. "info".
    pub log_filter: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ring_dir: default_ring_dir(),
            ring_duration_ms: 40,
            auto_switch_default_output: true,
            forward_volume: true,
            log_filter: "info".to_string(),
        }
    }
}

impl CoreConfig {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits and for the file being absent entirely.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| CoreError::Config(format!("parsing {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

/// OS-dependent default directory for ring files, mirroring the teacher's
/// `dirs`-based platform default resolution.
fn default_ring_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("radioform")
}
