//! Virtual audio endpoint plug-in (C6): the producer-side state machine that
//! lives inside the OS audio daemon, one instance per virtual device.
//!
//! The daemon-facing half of this contract — the real callback registration
//! with the platform's audio subsystem — is abstracted behind [`PluginHost`],
//! since this crate does not ship a daemon binding for any particular OS.
//! [`SimulatedPluginHost`] drives the state machine the way a real daemon
//! would, for testing and for the demo binary.

use crate::error::{EndpointError, EndpointResult};
use crate::resampler::LinearResampler;
use crate::ring::{Ring, SampleFormat};
use crate::sample_format::{self, SourceFormat};
use crate::time::now_ms;
use std::path::PathBuf;
use tracing::{debug, warn};

const BACKOFF_BASE_MS: u64 = 30;
const BACKOFF_CAP_MS: u64 = 2_000;
const MAX_ATTACH_ATTEMPTS: u32 = 15;
const HEALTH_CHECK_INTERVAL_MS: u64 = 3_000;
const HEARTBEAT_INTERVAL_MS: u64 = 1_000;
const PEER_STALE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Uninitialised,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

/// Backs off exponentially from `BACKOFF_BASE_MS`, doubling each attempt and
/// capping at `BACKOFF_CAP_MS`, for up to `MAX_ATTACH_ATTEMPTS` attempts.
fn backoff_delay_ms(attempt: u32) -> u64 {
    BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(20)).min(BACKOFF_CAP_MS)
}

/// Hooks into the OS audio daemon's device lifecycle. A real implementation
/// binds to CoreAudio/WASAPI/PipeWire plug-in entry points; this crate ships
/// only the trait and a simulated backend.
pub trait PluginHost {
    fn client_count(&self) -> u32;
    fn sleep_ms(&self, ms: u64);
}

/// A backend that never actually blocks, for tests and the demo binary.
pub struct SimulatedPluginHost {
    pub clients: u32,
}

impl PluginHost for SimulatedPluginHost {
    fn client_count(&self) -> u32 {
        self.clients
    }

    fn sleep_ms(&self, _ms: u64) {}
}

/// One virtual endpoint's producer-side proxy: owns the ring (once attached)
/// and the conversion scratch buffers it needs to feed it.
pub struct VirtualEndpoint {
    uid: String,
    ring_path: PathBuf,
    sample_rate: u32,
    channels: u32,
    state: EndpointState,
    ring: Option<Ring>,
    client_count: u32,
    last_health_check_ms: u64,
    last_heartbeat_ms: u64,
    last_seen_host_heartbeat: u64,
    last_host_heartbeat_change_ms: u64,
    last_stream_format: Option<(SourceFormat, u32)>,
    resampler: Option<LinearResampler>,
    scratch: Vec<f32>,
    format_mismatch_count: u64,
}

impl VirtualEndpoint {
    pub fn new(uid: impl Into<String>, ring_dir: &std::path::Path, sample_rate: u32, channels: u32) -> Self {
        let uid = uid.into();
        let filename = crate::ring::uid_to_filename(&uid);
        Self {
            ring_path: ring_dir.join(filename),
            uid,
            sample_rate,
            channels,
            state: EndpointState::Uninitialised,
            ring: None,
            client_count: 0,
            last_health_check_ms: 0,
            last_heartbeat_ms: 0,
            last_seen_host_heartbeat: 0,
            last_host_heartbeat_change_ms: 0,
            last_stream_format: None,
            resampler: None,
            scratch: Vec::new(),
            format_mismatch_count: 0,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// OS "start IO" callback. Only the 0→1 transition attempts an attach.
    pub fn start_io(&mut self, host: &dyn PluginHost) -> EndpointResult<()> {
        let was_zero = self.client_count == 0;
        self.client_count += 1;
        if !was_zero {
            return Ok(());
        }

        self.state = EndpointState::Connecting;
        let mut attempt = 0;
        loop {
            match self.try_attach() {
                Ok(()) => {
                    self.state = EndpointState::Connected;
                    debug!(uid = %self.uid, "endpoint attached to ring");
                    return Ok(());
                }
                Err(err) if attempt + 1 >= MAX_ATTACH_ATTEMPTS => {
                    self.client_count -= 1;
                    self.state = EndpointState::Error;
                    warn!(uid = %self.uid, attempts = attempt + 1, %err, "endpoint attach exhausted retries");
                    return Err(EndpointError::AttachFailed { attempts: attempt + 1, source: err });
                }
                Err(_) => {
                    host.sleep_ms(backoff_delay_ms(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn try_attach(&mut self) -> Result<(), crate::error::RingError> {
        let ring = Ring::create_or_open(&self.ring_path, self.sample_rate, self.channels, SampleFormat::F32, 40)?;
        ring.set_connected_producer(true);
        self.last_seen_host_heartbeat = ring.consumer_heartbeat();
        self.last_host_heartbeat_change_ms = now_ms();
        self.ring = Some(ring);
        Ok(())
    }

    /// OS "stop IO" callback. Only the last client tears down the mapping.
    pub fn stop_io(&mut self) {
        if self.client_count == 0 {
            return;
        }
        self.client_count -= 1;
        if self.client_count == 0 {
            if let Some(ring) = &self.ring {
                ring.set_connected_producer(false);
            }
            self.ring = None;
            self.state = EndpointState::Disconnected;
        }
    }

    /// OS "write mixed output" callback. Never blocks; on any failure it
    /// bumps a counter and returns. `stream_rate` is the rate the OS is
    /// actually handing us this callback, which may drift from the ring's
    /// rate (set at endpoint creation) independently of `format`.
    pub fn write_mixed_output(&mut self, format: SourceFormat, stream_rate: u32, bytes: &[u8], frames: usize) {
        let Some(ring) = self.ring.as_mut() else { return };
        let now = now_ms();

        if self.last_stream_format != Some((format, stream_rate)) {
            ring.bump_format_change();
            self.last_stream_format = Some((format, stream_rate));
            self.resampler = if stream_rate != self.sample_rate {
                Some(LinearResampler::new(stream_rate, self.sample_rate, self.channels as usize))
            } else {
                None
            };
        }

        let expected_bytes = frames * self.channels as usize * sample_format::bytes_per_sample(format);
        if bytes.len() < expected_bytes {
            self.format_mismatch_count += 1;
            return;
        }

        let needed = frames * self.channels as usize;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0.0);
        }
        sample_format::convert_to_interleaved_f32(format, bytes, self.channels as usize, frames, &mut self.scratch[..needed]);

        if let Some(resampler) = self.resampler.as_mut() {
            let (resampled, out_frames) = resampler.process(&self.scratch[..needed], frames);
            ring.write(resampled, out_frames);
        } else {
            ring.write(&self.scratch[..needed], frames);
        }

        if now.saturating_sub(self.last_heartbeat_ms) >= HEARTBEAT_INTERVAL_MS {
            ring.update_heartbeat_producer();
            self.last_heartbeat_ms = now;
        }

        if now.saturating_sub(self.last_health_check_ms) >= HEALTH_CHECK_INTERVAL_MS {
            self.last_health_check_ms = now;
            if !self.check_health() {
                self.recover();
            }
        }
    }

    /// Compares the host's heartbeat counter against the last value we
    /// observed, the same changed-since-last-check pattern
    /// `registry::refresh_heartbeat` uses for the symmetric direction — not
    /// our own producer heartbeat, which this process updates regardless of
    /// whether anything on the other end is still alive.
    fn check_health(&mut self) -> bool {
        let Some(ring) = &self.ring else { return false };
        if !self.ring_path.exists() {
            return false;
        }
        if !ring.connected_consumer() {
            return false;
        }
        let now = now_ms();
        let host_heartbeat = ring.consumer_heartbeat();
        if host_heartbeat != self.last_seen_host_heartbeat {
            self.last_seen_host_heartbeat = host_heartbeat;
            self.last_host_heartbeat_change_ms = now;
        }
        if crate::time::is_stale(self.last_host_heartbeat_change_ms, PEER_STALE_TIMEOUT_MS) {
            return false;
        }
        ring.check_corruption().is_ok()
    }

    fn recover(&mut self) {
        warn!(uid = %self.uid, "health check failed, attempting recovery");
        self.ring = None;
        match self.try_attach() {
            Ok(()) => self.state = EndpointState::Connected,
            Err(err) => {
                warn!(uid = %self.uid, %err, "recovery attach failed");
                self.state = EndpointState::Error;
            }
        }
    }

    pub fn format_mismatch_count(&self) -> u64 {
        self.format_mismatch_count
    }

    pub fn format_change_counter(&self) -> u64 {
        self.ring.as_ref().map(|r| r.format_change_counter()).unwrap_or(0)
    }
}
