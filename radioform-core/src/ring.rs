//! Ring transport (C1): a versioned, single-producer/single-consumer ring
//! buffer over a memory-mapped file, carrying one endpoint's audio payload
//! plus embedded control/health fields.
//!
//! The header is a fixed 256-byte, host-endian, explicit-offset layout
//! rather than a `#[repr(C)]` struct cast, so the audio
//! region's offset does not depend on the compiler's struct layout choices.
//! Atomic fields are accessed in place with `AtomicU32/64::from_ptr` over
//! the mapped bytes, giving both sides true acquire/release semantics on
//! the same addresses without an in-process allocator on either side.

use crate::error::{RingError, RingResult};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::sync::atomic::{fence, AtomicU32, Ordering};

pub const PROTOCOL_VERSION: u32 = 0x5246_3032; // "RF02"
pub const HEADER_SIZE: usize = 256;

pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];
pub const MIN_CHANNELS: u32 = 1;
pub const MAX_CHANNELS: u32 = 8;
pub const MIN_RING_DURATION_MS: u32 = 20;
pub const MAX_RING_DURATION_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SampleFormat {
    F32 = 0,
    F64 = 1,
    I16 = 2,
    I24 = 3,
    I32 = 4,
}

impl SampleFormat {
    pub fn from_u32(v: u32) -> RingResult<Self> {
        match v {
            0 => Ok(SampleFormat::F32),
            1 => Ok(SampleFormat::F64),
            2 => Ok(SampleFormat::I16),
            3 => Ok(SampleFormat::I24),
            4 => Ok(SampleFormat::I32),
            other => Err(RingError::InvalidFormat { reason: format!("unknown format code {other}") }),
        }
    }

    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 => 4,
        }
    }
}

// Fixed byte offsets for every header field.
mod off {
    pub const PROTOCOL_VERSION: usize = 0;
    pub const HEADER_SIZE: usize = 4;
    pub const SAMPLE_RATE: usize = 8;
    pub const CHANNELS: usize = 12;
    pub const FORMAT: usize = 16;
    pub const BYTES_PER_SAMPLE: usize = 20;
    pub const BYTES_PER_FRAME: usize = 24;
    pub const RING_CAPACITY_FRAMES: usize = 28;
    pub const RING_DURATION_MS: usize = 32;
    pub const DRIVER_CAPABILITIES: usize = 36;
    pub const HOST_CAPABILITIES: usize = 40;
    pub const CREATION_TIMESTAMP: usize = 44;
    pub const FORMAT_CHANGE_COUNTER: usize = 52;
    pub const WRITE_INDEX: usize = 60;
    pub const READ_INDEX: usize = 68;
    pub const TOTAL_FRAMES_WRITTEN: usize = 76;
    pub const TOTAL_FRAMES_READ: usize = 84;
    pub const OVERRUN_COUNT: usize = 92;
    pub const UNDERRUN_COUNT: usize = 100;
    pub const FORMAT_MISMATCH_COUNT: usize = 108;
    pub const DRIVER_CONNECTED: usize = 116;
    pub const HOST_CONNECTED: usize = 120;
    pub const DRIVER_HEARTBEAT: usize = 124;
    pub const HOST_HEARTBEAT: usize = 132;
}

/// Raw accessor over the mapped header bytes. All methods are wait-free.
struct HeaderView {
    base: *mut u8,
}

// Safety: every field access goes through an atomic op at a fixed offset;
// the pointer targets memory owned by the enclosing `Ring`'s `MmapMut`,
// which outlives every `HeaderView` built from it.
unsafe impl Send for HeaderView {}
unsafe impl Sync for HeaderView {}

impl HeaderView {
    unsafe fn u32_at(&self, offset: usize) -> &AtomicU32 {
        unsafe { &*(self.base.add(offset) as *const AtomicU32) }
    }

    fn load_u32(&self, offset: usize, ordering: Ordering) -> u32 {
        unsafe { self.u32_at(offset).load(ordering) }
    }

    fn store_u32(&self, offset: usize, value: u32, ordering: Ordering) {
        unsafe { self.u32_at(offset).store(value, ordering) }
    }

    // The header packs 4-byte and 8-byte fields back to back with no padding,
    // so every 8-byte field lands 4 bytes off an 8-byte boundary: not a valid
    // address for `AtomicU64::from_ptr`. Each field still has exactly one
    // writer (producer or consumer, never both), so a plain unaligned
    // read/write guarded by an explicit fence gives the other side the same
    // acquire/release visibility a real atomic would, without the alignment
    // requirement.
    fn load_u64(&self, offset: usize, ordering: Ordering) -> u64 {
        let ptr = unsafe { self.base.add(offset) } as *const u64;
        let value = unsafe { ptr.read_unaligned() };
        if let Ordering::Acquire | Ordering::SeqCst = ordering {
            fence(Ordering::Acquire);
        }
        value
    }

    fn store_u64(&self, offset: usize, value: u64, ordering: Ordering) {
        if let Ordering::Release | Ordering::SeqCst = ordering {
            fence(Ordering::Release);
        }
        let ptr = unsafe { self.base.add(offset) } as *mut u64;
        unsafe { ptr.write_unaligned(value) };
    }

    /// Single-writer increment: sound because only one side ever writes a
    /// given counter field, so there is no concurrent read-modify-write to
    /// race against.
    fn fetch_add_u64(&self, offset: usize, value: u64, ordering: Ordering) -> u64 {
        let previous = self.load_u64(offset, Ordering::Relaxed);
        self.store_u64(offset, previous.wrapping_add(value), ordering);
        previous
    }
}

/// A bound ring: either side (producer or consumer) after `create_or_open`.
pub struct Ring {
    mmap: MmapMut,
    header: HeaderView,
    sample_rate: u32,
    channels: u32,
    format: SampleFormat,
    bytes_per_frame: u32,
    capacity_frames: u32,
}

// Safety: the mmap is shared by construction (that's the whole point of a
// cross-process ring); every mutation goes through the atomic accessors
// above or through per-side-exclusive payload regions (§5: producer writes
// only ahead of read_index, consumer reads only behind write_index).
unsafe impl Send for Ring {}

impl Ring {
    /// Create the ring file if absent (sized and header-initialized) or
    /// open and validate it if present.
    pub fn create_or_open(
        path: &std::path::Path,
        sample_rate: u32,
        channels: u32,
        format: SampleFormat,
        duration_ms: u32,
    ) -> RingResult<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(RingError::InvalidFormat { reason: format!("unsupported sample_rate {sample_rate}") });
        }
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&channels) {
            return Err(RingError::InvalidFormat { reason: format!("channels {channels} out of [1,8]") });
        }
        let duration_ms = duration_ms.clamp(MIN_RING_DURATION_MS, MAX_RING_DURATION_MS);

        let capacity_frames = sample_rate * duration_ms / 1000;
        let bytes_per_sample = format.bytes_per_sample();
        let bytes_per_frame = bytes_per_sample * channels;
        let payload_size = capacity_frames as usize * bytes_per_frame as usize;
        let total_size = HEADER_SIZE + payload_size;

        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| RingError::Io { path: path.display().to_string(), source: e })?;
        file.set_len(total_size as u64)
            .map_err(|e| RingError::Io { path: path.display().to_string(), source: e })?;

        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| RingError::Io { path: path.display().to_string(), source: e })?
        };
        let header = HeaderView { base: mmap.as_mut_ptr() };

        if is_new {
            header.store_u32(off::PROTOCOL_VERSION, PROTOCOL_VERSION, Ordering::Relaxed);
            header.store_u32(off::HEADER_SIZE, HEADER_SIZE as u32, Ordering::Relaxed);
            header.store_u32(off::SAMPLE_RATE, sample_rate, Ordering::Relaxed);
            header.store_u32(off::CHANNELS, channels, Ordering::Relaxed);
            header.store_u32(off::FORMAT, format as u32, Ordering::Relaxed);
            header.store_u32(off::BYTES_PER_SAMPLE, bytes_per_sample, Ordering::Relaxed);
            header.store_u32(off::BYTES_PER_FRAME, bytes_per_frame, Ordering::Relaxed);
            header.store_u32(off::RING_CAPACITY_FRAMES, capacity_frames, Ordering::Relaxed);
            header.store_u32(off::RING_DURATION_MS, duration_ms, Ordering::Relaxed);
            header.store_u64(off::CREATION_TIMESTAMP, crate::time::now_secs(), Ordering::Relaxed);
        } else {
            let found_version = header.load_u32(off::PROTOCOL_VERSION, Ordering::Relaxed);
            if found_version != PROTOCOL_VERSION {
                return Err(RingError::ProtocolMismatch { expected: PROTOCOL_VERSION, found: found_version });
            }
            let found_rate = header.load_u32(off::SAMPLE_RATE, Ordering::Relaxed);
            if !SUPPORTED_SAMPLE_RATES.contains(&found_rate) {
                return Err(RingError::InvalidFormat { reason: format!("ring file has unsupported sample_rate {found_rate}") });
            }
        }

        let capacity_frames = header.load_u32(off::RING_CAPACITY_FRAMES, Ordering::Relaxed);
        let channels = header.load_u32(off::CHANNELS, Ordering::Relaxed);
        let format = SampleFormat::from_u32(header.load_u32(off::FORMAT, Ordering::Relaxed))?;
        let bytes_per_frame = header.load_u32(off::BYTES_PER_FRAME, Ordering::Relaxed);
        let sample_rate = header.load_u32(off::SAMPLE_RATE, Ordering::Relaxed);

        Ok(Self { mmap, header, sample_rate, channels, format, bytes_per_frame, capacity_frames })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn capacity_frames(&self) -> u32 {
        self.capacity_frames
    }

    fn payload(&mut self) -> &mut [u8] {
        &mut self.mmap[HEADER_SIZE..]
    }

    fn write_index(&self) -> u64 {
        self.header.load_u64(off::WRITE_INDEX, Ordering::Acquire)
    }

    fn read_index(&self) -> u64 {
        self.header.load_u64(off::READ_INDEX, Ordering::Acquire)
    }

    /// Check the invariants §8.1 demands; surfaced to the health monitor,
    /// never self-healed.
    pub fn check_corruption(&self) -> RingResult<()> {
        let w = self.write_index();
        let r = self.read_index();
        if w < r {
            return Err(RingError::Corruption { reason: format!("write_index {w} < read_index {r}") });
        }
        if w - r > self.capacity_frames as u64 {
            return Err(RingError::Corruption { reason: format!("used {} exceeds capacity {}", w - r, self.capacity_frames) });
        }
        Ok(())
    }

    /// Producer-only: write `frames` worth of interleaved float32 samples,
    /// converting to the ring's declared on-wire format. Drops the oldest
    /// frames (advances `read_index`) on overrun rather than stalling.
    pub fn write(&mut self, interleaved: &[f32], frames: usize) -> usize {
        let capacity = self.capacity_frames as u64;
        let channels = self.channels as usize;
        let bytes_per_frame = self.bytes_per_frame as usize;
        let format = self.format;

        let mut write_index = self.write_index();
        let read_index = self.read_index();
        let used = write_index.saturating_sub(read_index);
        let free = capacity.saturating_sub(used);

        if frames as u64 > free {
            let overflow = frames as u64 - free;
            let new_read = read_index + overflow;
            self.header.store_u64(off::READ_INDEX, new_read, Ordering::Release);
            self.header.fetch_add_u64(off::OVERRUN_COUNT, overflow, Ordering::Relaxed);
        }

        {
            let payload = self.payload();
            for frame_idx in 0..frames {
                let ring_slot = (write_index % capacity) as usize;
                let dst = ring_slot * bytes_per_frame;
                for ch in 0..channels {
                    let sample = interleaved[frame_idx * channels + ch];
                    write_sample(&mut payload[dst + ch * format.bytes_per_sample() as usize..], sample, format);
                }
                write_index = write_index.wrapping_add(1);
            }
        }

        self.header.fetch_add_u64(off::TOTAL_FRAMES_WRITTEN, frames as u64, Ordering::Relaxed);
        self.header.store_u64(off::WRITE_INDEX, write_index, Ordering::Release);
        frames
    }

    /// Consumer-only: read up to `frames` into `out`, zero-filling any
    /// shortfall and counting it as underrun.
    pub fn read(&mut self, out: &mut [f32], frames: usize) -> usize {
        let channels = self.channels as usize;
        let bytes_per_frame = self.bytes_per_frame as usize;
        let bytes_per_sample = self.format.bytes_per_sample() as usize;
        let format = self.format;
        let capacity = self.capacity_frames as u64;

        let write_index = self.write_index();
        let mut read_index = self.read_index();
        let available = write_index.saturating_sub(read_index).min(frames as u64) as usize;

        {
            let payload = self.payload();
            for frame_idx in 0..available {
                let ring_slot = (read_index % capacity) as usize;
                let src = ring_slot * bytes_per_frame;
                for ch in 0..channels {
                    let sample = read_sample(&payload[src + ch * bytes_per_sample..], format);
                    out[frame_idx * channels + ch] = sample;
                }
                read_index = read_index.wrapping_add(1);
            }
        }

        if available < frames {
            let shortfall = frames - available;
            for slot in out.iter_mut().skip(available * channels).take(shortfall * channels) {
                *slot = 0.0;
            }
            self.header.fetch_add_u64(off::UNDERRUN_COUNT, shortfall as u64, Ordering::Relaxed);
        }

        self.header.fetch_add_u64(off::TOTAL_FRAMES_READ, available as u64, Ordering::Relaxed);
        self.header.store_u64(off::READ_INDEX, read_index, Ordering::Release);
        available
    }

    pub fn driver_capabilities(&self) -> u32 {
        self.header.load_u32(off::DRIVER_CAPABILITIES, Ordering::Relaxed)
    }

    pub fn set_driver_capabilities(&self, bits: u32) {
        self.header.store_u32(off::DRIVER_CAPABILITIES, bits, Ordering::Relaxed);
    }

    pub fn host_capabilities(&self) -> u32 {
        self.header.load_u32(off::HOST_CAPABILITIES, Ordering::Relaxed)
    }

    pub fn set_host_capabilities(&self, bits: u32) {
        self.header.store_u32(off::HOST_CAPABILITIES, bits, Ordering::Relaxed);
    }

    pub fn format_change_counter(&self) -> u64 {
        self.header.load_u64(off::FORMAT_CHANGE_COUNTER, Ordering::Relaxed)
    }

    /// Bumped by the plug-in whenever the OS stream's current format
    /// differs from the last one it saw.
    pub fn bump_format_change(&self) {
        self.header.fetch_add_u64(off::FORMAT_CHANGE_COUNTER, 1, Ordering::Relaxed);
    }

    pub fn update_heartbeat_producer(&self) {
        self.header.fetch_add_u64(off::DRIVER_HEARTBEAT, 1, Ordering::Relaxed);
    }

    pub fn update_heartbeat_consumer(&self) {
        self.header.fetch_add_u64(off::HOST_HEARTBEAT, 1, Ordering::Relaxed);
    }

    pub fn producer_heartbeat(&self) -> u64 {
        self.header.load_u64(off::DRIVER_HEARTBEAT, Ordering::Relaxed)
    }

    pub fn consumer_heartbeat(&self) -> u64 {
        self.header.load_u64(off::HOST_HEARTBEAT, Ordering::Relaxed)
    }

    pub fn set_connected_producer(&self, connected: bool) {
        self.header.store_u32(off::DRIVER_CONNECTED, connected as u32, Ordering::Relaxed);
    }

    pub fn set_connected_consumer(&self, connected: bool) {
        self.header.store_u32(off::HOST_CONNECTED, connected as u32, Ordering::Relaxed);
    }

    pub fn connected_producer(&self) -> bool {
        self.header.load_u32(off::DRIVER_CONNECTED, Ordering::Relaxed) != 0
    }

    pub fn connected_consumer(&self) -> bool {
        self.header.load_u32(off::HOST_CONNECTED, Ordering::Relaxed) != 0
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            total_frames_written: self.header.load_u64(off::TOTAL_FRAMES_WRITTEN, Ordering::Relaxed),
            total_frames_read: self.header.load_u64(off::TOTAL_FRAMES_READ, Ordering::Relaxed),
            overrun_count: self.header.load_u64(off::OVERRUN_COUNT, Ordering::Relaxed),
            underrun_count: self.header.load_u64(off::UNDERRUN_COUNT, Ordering::Relaxed),
            format_mismatch_count: self.header.load_u64(off::FORMAT_MISMATCH_COUNT, Ordering::Relaxed),
        }
    }

    pub fn bump_format_mismatch(&self) {
        self.header.fetch_add_u64(off::FORMAT_MISMATCH_COUNT, 1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RingStats {
    pub total_frames_written: u64,
    pub total_frames_read: u64,
    pub overrun_count: u64,
    pub underrun_count: u64,
    pub format_mismatch_count: u64,
}

fn write_sample(dst: &mut [u8], sample: f32, format: SampleFormat) {
    match format {
        SampleFormat::F32 => dst[..4].copy_from_slice(&sample.to_ne_bytes()),
        SampleFormat::F64 => dst[..8].copy_from_slice(&(sample as f64).to_ne_bytes()),
        SampleFormat::I16 => {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            dst[..2].copy_from_slice(&v.to_ne_bytes());
        }
        SampleFormat::I24 => {
            let v = (sample.clamp(-1.0, 1.0) * (1i32 << 23) as f32) as i32;
            let bytes = v.to_ne_bytes();
            dst[..3].copy_from_slice(&bytes[..3]);
        }
        SampleFormat::I32 => {
            let v = (sample.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
            dst[..4].copy_from_slice(&v.to_ne_bytes());
        }
    }
}

fn read_sample(src: &[u8], format: SampleFormat) -> f32 {
    match format {
        SampleFormat::F32 => f32::from_ne_bytes(src[..4].try_into().unwrap()),
        SampleFormat::F64 => f64::from_ne_bytes(src[..8].try_into().unwrap()) as f32,
        SampleFormat::I16 => i16::from_ne_bytes(src[..2].try_into().unwrap()) as f32 / i16::MAX as f32,
        SampleFormat::I24 => {
            let mut bytes = [0u8; 4];
            bytes[..3].copy_from_slice(&src[..3]);
            // Sign-extend the 24-bit value held in the low 3 bytes.
            let raw = i32::from_ne_bytes(bytes);
            let shifted = (raw << 8) >> 8;
            shifted as f32 / (1i32 << 23) as f32
        }
        SampleFormat::I32 => i32::from_ne_bytes(src[..4].try_into().unwrap()) as f32 / i32::MAX as f32,
    }
}

/// Map a uid to exactly one file path on any target OS by replacing
/// reserved filename characters with underscores.
pub fn uid_to_filename(uid: &str) -> String {
    uid.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn temp_ring() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.bin");
        (dir, path)
    }

    #[test]
    #[serial]
    fn s1_ring_roundtrip() {
        let (_dir, path) = temp_ring();
        let mut ring = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40).unwrap();
        assert_eq!(ring.capacity_frames(), 1920);

        let frame: Vec<f32> = std::iter::repeat_n([1.0_f32, -1.0], 1920).flatten().collect();
        let written = ring.write(&frame, 1920);
        assert_eq!(written, 1920);

        let mut out = vec![0.0_f32; 1920 * 2];
        let read = ring.read(&mut out, 1920);
        assert_eq!(read, 1920);
        assert_eq!(out, frame);

        let stats = ring.stats();
        assert_eq!(stats.overrun_count, 0);
        assert_eq!(stats.underrun_count, 0);
    }

    #[test]
    #[serial]
    fn s2_overrun_keeps_newest_frames() {
        let (_dir, path) = temp_ring();
        let mut ring = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40).unwrap();

        let mut frames = Vec::new();
        for i in 0..3000u32 {
            let v = i as f32;
            frames.push(v);
            frames.push(-v);
        }
        ring.write(&frames, 3000);
        assert_eq!(ring.stats().overrun_count, 3000 - 1920);

        let mut out = vec![0.0_f32; 1920 * 2];
        ring.read(&mut out, 1920);
        let expected_first = (3000 - 1920) as f32;
        assert_eq!(out[0], expected_first);
    }

    #[test]
    #[serial]
    fn s3_underrun_on_empty_ring() {
        let (_dir, path) = temp_ring();
        let mut ring = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40).unwrap();
        let mut out = vec![1.0_f32; 512 * 2];
        let read = ring.read(&mut out, 512);
        assert_eq!(read, 0);
        assert!(ring.stats().underrun_count >= 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    #[serial]
    fn protocol_mismatch_rejected() {
        let (_dir, path) = temp_ring();
        {
            let _ring = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40).unwrap();
        }
        // Corrupt the magic in place.
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut mmap = unsafe { MmapMut::map_mut(&file).unwrap() };
        mmap[0..4].copy_from_slice(&0xdead_beefu32.to_ne_bytes());
        drop(mmap);

        let result = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40);
        assert!(matches!(result, Err(RingError::ProtocolMismatch { .. })));
    }

    #[test]
    fn uid_to_filename_replaces_reserved_chars() {
        assert_eq!(uid_to_filename("a/b:c"), "a_b_c");
        assert_eq!(uid_to_filename("plain-uid"), "plain-uid");
    }

    #[test]
    #[serial]
    fn monotonicity_holds_across_overrun() {
        let (_dir, path) = temp_ring();
        let mut ring = Ring::create_or_open(&path, 48000, 2, SampleFormat::F32, 40).unwrap();
        let frames = vec![0.0_f32; 3000 * 2];
        ring.write(&frames, 3000);
        assert!(ring.write_index() >= ring.read_index());
        assert!(ring.write_index() - ring.read_index() <= ring.capacity_frames() as u64);
    }
}
