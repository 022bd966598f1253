//! Single-producer/single-consumer command queue for control-thread band
//! updates: `{band_index, field, value}` items, drained at the top of
//! `process_*`. Never locks, never allocates.
//!
//! This is distinct from the cross-process ring transport in [`crate::ring`]:
//! it is purely in-process, so it reuses the `ringbuf` crate the same way
//! `playback/ring_buffer.rs` does for the mixer-to-callback handoff.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

/// Which scalar field of a band (or the engine as a whole) a command updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandField {
    Gain,
    Frequency,
    Q,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandCommand {
    pub band_index: usize,
    pub field: BandField,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    Band(BandCommand),
    Preamp(f64),
    Bypass(bool),
}

/// Default depth: comfortably more than one UI interaction's worth of
/// updates can produce between two render-thread ticks.
const DEFAULT_DEPTH: usize = 64;

pub struct CommandProducer {
    inner: HeapProd<EngineCommand>,
}

impl CommandProducer {
    /// Enqueue a command. Returns `false` if the queue is full (the consumer
    /// has fallen behind); the caller should retry on the next control-thread
    /// tick rather than block.
    pub fn push(&mut self, cmd: EngineCommand) -> bool {
        self.inner.try_push(cmd).is_ok()
    }
}

pub struct CommandConsumer {
    inner: HeapCons<EngineCommand>,
}

impl CommandConsumer {
    /// Drain all pending commands. Called at the top of `process_*`; never
    /// allocates and never blocks.
    pub fn drain_into(&mut self, out: &mut Vec<EngineCommand>) {
        while let Some(cmd) = self.inner.try_pop() {
            out.push(cmd);
        }
    }
}

pub fn command_channel() -> (CommandProducer, CommandConsumer) {
    let (prod, cons) = HeapRb::new(DEFAULT_DEPTH).split();
    (CommandProducer { inner: prod }, CommandConsumer { inner: cons })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_drain_in_order() {
        let (mut prod, mut cons) = command_channel();
        assert!(prod.push(EngineCommand::Preamp(1.0)));
        assert!(prod.push(EngineCommand::Bypass(true)));
        let mut drained = Vec::new();
        cons.drain_into(&mut drained);
        assert_eq!(drained, vec![EngineCommand::Preamp(1.0), EngineCommand::Bypass(true)]);
    }

    #[test]
    fn full_queue_rejects_push() {
        let (mut prod, _cons) = command_channel();
        for _ in 0..DEFAULT_DEPTH {
            assert!(prod.push(EngineCommand::Bypass(true)));
        }
        assert!(!prod.push(EngineCommand::Bypass(false)));
    }
}
