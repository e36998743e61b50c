pub mod cache;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod loader;
pub mod mixer;
pub mod output;
pub mod transport;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;
use crate::error::AudioError;
use crate::models::DecodedBuffer;

pub use cache::BufferCache;
pub use device::DeviceManager;
pub use engine::PlaybackEngine;
pub use loader::{BufferLoader, ByteSource, FileSource, LocatorSource};
pub use mixer::Mixer;
pub use output::{CpalOutput, CpalOutputProvider};
pub use transport::DualTransport;

/// Handle for a single-use playback voice
pub type VoiceId = u64;

/// Lifecycle of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    Suspended,
    Closed,
}

/// Gain stage a voice is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    Main,
    Guitar,
}

/// Everything needed to create one voice
#[derive(Debug, Clone)]
pub struct VoiceSpec {
    pub buffer: Arc<DecodedBuffer>,
    /// Start position inside the buffer, in seconds
    pub offset: f64,
    pub rate: f64,
    pub bus: Bus,
    /// Per-voice linear gain applied before the bus gain
    pub level: f32,
}

impl VoiceSpec {
    pub fn new(buffer: Arc<DecodedBuffer>, offset: f64, rate: f64, bus: Bus) -> Self {
        Self {
            buffer,
            offset,
            rate,
            bus,
            level: 1.0,
        }
    }
}

/// Voices created by one start call and the output time they begin at
#[derive(Debug, Clone, PartialEq)]
pub struct StartedVoices {
    pub ids: Vec<VoiceId>,
    pub at: f64,
}

/// Platform audio primitive the transport drives.
///
/// Times are seconds on the output clock returned by [`AudioOutput::now`].
/// Voices passed to one [`AudioOutput::start_voices`] call begin on the same
/// output frame; scheduled rate and gain changes land on a single frame for
/// every voice they target.
pub trait AudioOutput: Send {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    fn sample_rate(&self) -> u32;

    fn state(&self) -> OutputState;

    /// One synchronous attempt to leave the suspended state
    fn resume(&mut self) -> OutputState;

    /// Start all voices together at `at` or, when that frame has already
    /// been rendered, at the next one. Returns the ids in order and the time used.
    fn start_voices(&mut self, at: f64, voices: Vec<VoiceSpec>) -> Result<StartedVoices, AudioError>;

    /// Halt a voice; `VoiceNotActive` when it already ended or was stopped
    fn stop_voice(&mut self, id: VoiceId) -> Result<(), AudioError>;

    /// Schedule a rate change, returning the output time it takes effect
    fn set_voice_rate(&mut self, ids: &[VoiceId], rate: f64, at: f64) -> Result<f64, AudioError>;

    fn set_bus_gain(&mut self, bus: Bus, gain: f32, at: f64);

    /// Voices that ran off the end of their buffer since the last call
    fn drain_ended(&mut self) -> Vec<VoiceId>;

    fn close(&mut self);
}

/// Factory for the output used by an engine instance
pub trait OutputProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioOutput>, AudioError>;
}
