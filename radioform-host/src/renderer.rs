//! Host audio renderer (C8): the single consumer of a ring transport, pulling
//! frames on the physical device's callback and running them through the DSP
//! engine before handing them to `cpal`.
//!
//! Structured after the device-enumeration / best-config-selection /
//! boxed-callback shape used for output streaming elsewhere in this corpus,
//! generalized from a fixed internal format to whatever sample format the
//! chosen device actually reports.

use crate::error::{HostError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use radioform_core::dsp::DspEngine;
use radioform_core::ring::Ring;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const TARGET_SAMPLE_RATE: u32 = 48_000;
const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// State swapped under a short-lived lock on device switch: the render
/// thread reads it once per callback rather than holding the lock for the
/// whole buffer period.
struct RenderState {
    ring: Option<Ring>,
    engine: DspEngine,
    last_heartbeat_ms: u64,
    scratch_in: Vec<f32>,
    scratch_out: Vec<f32>,
}

pub struct AudioRenderer {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    state: Arc<Mutex<RenderState>>,
}

impl AudioRenderer {
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| HostError::AudioOutput(format!("failed to enumerate devices: {e}")))?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(devices)
    }

    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| HostError::AudioOutput(format!("failed to enumerate devices: {e}")))?
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or_else(|| HostError::AudioOutput(format!("device '{name}' not found")))?,
            None => host.default_output_device().ok_or(HostError::NoDevice)?,
        };

        info!(device = %device.name().unwrap_or_default(), "selected audio output device");
        let (config, sample_format) = Self::best_config(&device)?;
        let engine = DspEngine::create(config.sample_rate.0).map_err(radioform_core::CoreError::from)?;

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            state: Arc::new(Mutex::new(RenderState {
                ring: None,
                engine,
                last_heartbeat_ms: 0,
                scratch_in: Vec::new(),
                scratch_out: Vec::new(),
            })),
        })
    }

    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut configs = device
            .supported_output_configs()
            .map_err(|e| HostError::AudioOutput(format!("failed to get device configs: {e}")))?;

        let preferred = configs.find(|c| {
            c.channels() == 2
                && c.min_sample_rate().0 <= TARGET_SAMPLE_RATE
                && c.max_sample_rate().0 >= TARGET_SAMPLE_RATE
                && c.sample_format() == SampleFormat::F32
        });

        if let Some(supported) = preferred {
            let format = supported.sample_format();
            let config = supported.with_sample_rate(cpal::SampleRate(TARGET_SAMPLE_RATE)).config();
            return Ok((config, format));
        }

        let default = device
            .default_output_config()
            .map_err(|e| HostError::AudioOutput(format!("failed to get default config: {e}")))?;
        Ok((default.config(), default.sample_format()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u32 {
        self.config.channels as u32
    }

    /// The physical output device this renderer is bound to, by `cpal` name —
    /// used by the caller to match it against the routing brain's physical
    /// entries and find the ring it should attach to.
    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_default()
    }

    /// Atomically replace the active ring handle; the next callback picks
    /// it up via the shared lock. Completes well within one buffer period.
    pub fn switch_ring(&self, ring: Option<Ring>) {
        let mut state = self.state.lock().unwrap();
        state.ring = ring;
    }

    /// Run `f` against the render thread's own `DspEngine`, under the same
    /// short lock `switch_ring` uses. Lets the control thread install
    /// presets and band updates without reaching into the ring field.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut DspEngine) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state.engine)
    }

    pub fn start(&mut self) -> Result<()> {
        info!("starting renderer stream");
        let state = Arc::clone(&self.state);
        let channels = self.config.channels as usize;

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(state, channels)?,
            SampleFormat::I16 => self.build_stream::<i16>(state, channels)?,
            SampleFormat::U16 => self.build_stream::<u16>(state, channels)?,
            other => return Err(HostError::AudioOutput(format!("unsupported sample format: {other:?}"))),
        };

        stream.play().map_err(|e| HostError::AudioOutput(format!("failed to start stream: {e}")))?;
        self.stream = Some(stream);
        info!("renderer stream started");
        Ok(())
    }

    fn build_stream<T>(&self, state: Arc<Mutex<RenderState>>, channels: usize) -> Result<Stream>
    where
        T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
    {
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    render_callback::<T>(&state, data, channels);
                },
                move |err| warn!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| HostError::AudioOutput(format!("failed to build stream: {e}")))?;
        Ok(stream)
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.pause().map_err(|e| HostError::AudioOutput(format!("failed to pause stream: {e}")))?;
        }
        Ok(())
    }
}

/// One pull-callback iteration (§4.8, steps 1-6): read from the ring with
/// zero-fill/underrun handled inside `Ring::read`, run the DSP engine in
/// place, and scale into the device's native sample type.
fn render_callback<T>(state: &Arc<Mutex<RenderState>>, data: &mut [T], channels: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let frames = data.len() / channels;
    let mut state = state.lock().unwrap();

    let needed = frames * 2;
    if state.scratch_in.len() < needed {
        state.scratch_in.resize(needed, 0.0);
        state.scratch_out.resize(needed, 0.0);
    }
    // Ring::read/DspEngine::process_interleaved zero-fill on underrun/silence,
    // but yesterday's tail can linger past `needed` in a grown buffer.
    state.scratch_in[..needed].fill(0.0);

    let RenderState { ring, engine, scratch_in, scratch_out, .. } = &mut *state;
    if let Some(ring) = ring.as_mut() {
        ring.read(&mut scratch_in[..needed], frames);
    }
    engine.process_interleaved(&scratch_in[..needed], &mut scratch_out[..needed], frames);

    for (frame_idx, out_frame) in data.chunks_mut(channels).enumerate() {
        let l = state.scratch_out[frame_idx * 2];
        let r = state.scratch_out[frame_idx * 2 + 1];
        out_frame[0] = T::from_sample(l);
        if channels > 1 {
            out_frame[1] = T::from_sample(r);
        }
    }

    let now = radioform_core::time::now_ms();
    if now.saturating_sub(state.last_heartbeat_ms) >= HEARTBEAT_INTERVAL_MS {
        if let Some(ring) = state.ring.as_ref() {
            ring.update_heartbeat_consumer();
            ring.set_connected_consumer(true);
        }
        state.last_heartbeat_ms = now;
        debug!("renderer heartbeat updated");
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
