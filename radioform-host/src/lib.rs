//! Host process for the EQ core: the cpal-backed audio renderer (C8) and
//! the routing brain (C9) that keeps the control file, registry, and OS
//! default-output/volume state in sync.

pub mod config;
pub mod error;
pub mod renderer;
pub mod routing;

pub use error::{HostError, Result};
