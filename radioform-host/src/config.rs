//! Host-side configuration: CLI flags layered over `radioform.toml` layered
//! over compiled defaults, matching `wkmp-common`'s CLI > env > file >
//! default resolution order (no env layer here — nothing in this config
//! needs one beyond what `RUST_LOG`/`EnvFilter` already covers).

use crate::error::Result;
use clap::Parser;
use radioform_core::config::CoreConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "radioform-host")]
#[command(about = "Cross-process parametric EQ host: renders virtual-endpoint audio through physical devices")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "radioform.toml")]
    pub config: PathBuf,

    /// Directory holding the memory-mapped ring files (overrides config file).
    #[arg(long)]
    pub ring_dir: Option<PathBuf>,

    /// Output device name to render to (overrides the OS default device).
    #[arg(long)]
    pub device: Option<String>,

    /// Disable auto-switching the OS default output back to the virtual endpoint.
    #[arg(long)]
    pub no_auto_switch: bool,

    /// Disable forwarding virtual-endpoint volume changes to the physical device.
    #[arg(long)]
    pub no_volume_forward: bool,

    /// `tracing_subscriber::EnvFilter` directive string (overrides config file).
    #[arg(long)]
    pub log_filter: Option<String>,
}

/// Resolved configuration: `CoreConfig` loaded from file, with CLI flags
/// applied on top.
pub fn load(args: &Args) -> Result<CoreConfig> {
    let mut config = CoreConfig::load(&args.config)?;

    if let Some(ring_dir) = &args.ring_dir {
        config.ring_dir = ring_dir.clone();
    }
    if args.no_auto_switch {
        config.auto_switch_default_output = false;
    }
    if args.no_volume_forward {
        config.forward_volume = false;
    }
    if let Some(filter) = &args.log_filter {
        config.log_filter = filter.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_win_over_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("radioform.toml");
        std::fs::write(&config_path, "auto_switch_default_output = true\n").unwrap();

        let args = Args {
            config: config_path,
            ring_dir: None,
            device: None,
            no_auto_switch: true,
            no_volume_forward: false,
            log_filter: None,
        };
        let config = load(&args).unwrap();
        assert!(!config.auto_switch_default_output);
        assert!(config.forward_volume);
    }
}
