//! Frame-clocked voice renderer.
//!
//! The mixer owns the output clock: it only advances while frames are
//! rendered, so every scheduling decision made between two render calls
//! lands on the same frame for all voices involved. Each voice reads its
//! buffer at a fractional position with linear interpolation, stepping
//! `rate * buffer_rate / output_rate` source frames per output frame, which
//! both converts sample rates and applies the playback rate (pitch follows
//! speed).

use std::sync::Arc;
use crate::audio::{Bus, StartedVoices, VoiceId, VoiceSpec};
use crate::error::AudioError;
use crate::models::DecodedBuffer;

#[derive(Debug)]
struct Voice {
    id: VoiceId,
    buffer: Arc<DecodedBuffer>,
    /// Read position in source frames
    position: f64,
    rate: f64,
    start_frame: u64,
    bus: Bus,
    level: f32,
}

impl Voice {
    fn step(&self, output_rate: u32) -> f64 {
        self.rate * self.buffer.sample_rate as f64 / output_rate as f64
    }

    fn finished(&self) -> bool {
        self.position >= self.buffer.frames as f64
    }

    fn read(&self, channel: usize, output_channels: usize) -> f32 {
        let index = self.position.floor() as usize;
        let frac = (self.position - index as f64) as f32;
        let buffer_channels = self.buffer.channels as usize;

        if output_channels == 1 && buffer_channels > 1 {
            let mut sum = 0.0;
            for ch in 0..buffer_channels {
                sum += lerp(self.buffer.sample(index, ch), self.buffer.sample(index + 1, ch), frac);
            }
            return sum / buffer_channels as f32;
        }

        lerp(
            self.buffer.sample(index, channel),
            self.buffer.sample(index + 1, channel),
            frac,
        )
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[derive(Debug, Clone)]
enum Change {
    Rate { ids: Vec<VoiceId>, rate: f64 },
    Gain { bus: Bus, gain: f32 },
}

#[derive(Debug, Clone)]
struct Scheduled {
    at_frame: u64,
    change: Change,
}

/// Renders single-use voices onto an interleaved output buffer
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    channels: u16,
    clock_frames: u64,
    next_id: VoiceId,
    voices: Vec<Voice>,
    main_gain: f32,
    guitar_gain: f32,
    pending: Vec<Scheduled>,
    ended: Vec<VoiceId>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            clock_frames: 0,
            next_id: 1,
            voices: Vec::new(),
            main_gain: 1.0,
            guitar_gain: 1.0,
            pending: Vec::new(),
            ended: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Output clock in seconds
    pub fn now(&self) -> f64 {
        self.clock_frames as f64 / self.sample_rate as f64
    }

    pub fn clock_frames(&self) -> u64 {
        self.clock_frames
    }

    /// Output frame for a clock time; times in the past map to the next frame rendered
    fn frame_at(&self, at: f64) -> u64 {
        if !at.is_finite() || at <= 0.0 {
            return self.clock_frames;
        }
        ((at * self.sample_rate as f64).round() as u64).max(self.clock_frames)
    }

    fn time_of(&self, frame: u64) -> f64 {
        frame as f64 / self.sample_rate as f64
    }

    pub fn start_voices(&mut self, at: f64, specs: Vec<VoiceSpec>) -> Result<StartedVoices, AudioError> {
        // Validate everything first so a bad spec never leaves a partial group behind
        for spec in &specs {
            if !(spec.rate.is_finite() && spec.rate > 0.0) {
                return Err(AudioError::StartFailure(format!("invalid rate {}", spec.rate)));
            }
            if !spec.offset.is_finite() || spec.offset < 0.0 {
                return Err(AudioError::StartFailure(format!("invalid offset {}", spec.offset)));
            }
            if spec.buffer.sample_rate == 0 {
                return Err(AudioError::StartFailure("buffer has no sample rate".to_string()));
            }
        }

        let start_frame = self.frame_at(at);
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = self.next_id;
            self.next_id += 1;
            let position = spec.offset * spec.buffer.sample_rate as f64;
            self.voices.push(Voice {
                id,
                buffer: spec.buffer,
                position,
                rate: spec.rate,
                start_frame,
                bus: spec.bus,
                level: spec.level,
            });
            ids.push(id);
        }
        Ok(StartedVoices {
            ids,
            at: self.time_of(start_frame),
        })
    }

    pub fn stop_voice(&mut self, id: VoiceId) -> Result<(), AudioError> {
        match self.voices.iter().position(|v| v.id == id) {
            Some(index) => {
                self.voices.swap_remove(index);
                Ok(())
            }
            None => Err(AudioError::VoiceNotActive { voice: id }),
        }
    }

    pub fn set_voice_rate(&mut self, ids: &[VoiceId], rate: f64, at: f64) -> Result<f64, AudioError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(AudioError::StartFailure(format!("invalid rate {}", rate)));
        }
        let at_frame = self.frame_at(at);
        self.schedule(at_frame, Change::Rate { ids: ids.to_vec(), rate });
        Ok(self.time_of(at_frame))
    }

    pub fn set_bus_gain(&mut self, bus: Bus, gain: f32, at: f64) {
        let at_frame = self.frame_at(at);
        self.schedule(at_frame, Change::Gain { bus, gain: gain.max(0.0) });
    }

    fn schedule(&mut self, at_frame: u64, change: Change) {
        if at_frame <= self.clock_frames {
            self.apply(change);
        } else {
            self.pending.push(Scheduled { at_frame, change });
        }
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::Rate { ids, rate } => {
                for voice in self.voices.iter_mut().filter(|v| ids.contains(&v.id)) {
                    voice.rate = rate;
                }
            }
            Change::Gain { bus: Bus::Main, gain } => self.main_gain = gain,
            Change::Gain { bus: Bus::Guitar, gain } => self.guitar_gain = gain,
        }
    }

    fn apply_due(&mut self, frame: u64) {
        if self.pending.is_empty() {
            return;
        }
        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].at_frame <= frame {
                let scheduled = self.pending.remove(index);
                self.apply(scheduled.change);
            } else {
                index += 1;
            }
        }
    }

    fn bus_gain(&self, bus: Bus) -> f32 {
        match bus {
            Bus::Main => self.main_gain,
            Bus::Guitar => self.guitar_gain,
        }
    }

    pub fn bus_gains(&self) -> (f32, f32) {
        (self.main_gain, self.guitar_gain)
    }

    /// Render into an interleaved buffer sized in whole output frames.
    ///
    /// The buffer is overwritten, not mixed into.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let output_rate = self.sample_rate;

        for (offset, frame) in out.chunks_mut(channels).take(frames).enumerate() {
            frame.iter_mut().for_each(|s| *s = 0.0);
            let absolute = self.clock_frames + offset as u64;
            self.apply_due(absolute);

            let mut index = 0;
            while index < self.voices.len() {
                if absolute < self.voices[index].start_frame {
                    index += 1;
                    continue;
                }
                if self.voices[index].finished() {
                    let voice = self.voices.swap_remove(index);
                    self.ended.push(voice.id);
                    continue;
                }

                let voice = &self.voices[index];
                let gain = voice.level * self.bus_gain(voice.bus);
                if gain > 0.0 {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        *sample += voice.read(ch, channels) * gain;
                    }
                }

                let step = voice.step(output_rate);
                self.voices[index].position += step;
                index += 1;
            }
        }

        self.clock_frames += frames as u64;

        // A voice whose last frame was just rendered ends now rather than on the next callback
        let mut index = 0;
        while index < self.voices.len() {
            if self.voices[index].start_frame <= self.clock_frames && self.voices[index].finished() {
                let voice = self.voices.swap_remove(index);
                self.ended.push(voice.id);
            } else {
                index += 1;
            }
        }
    }

    pub fn drain_ended(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.ended)
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn is_active(&self, id: VoiceId) -> bool {
        self.voices.iter().any(|v| v.id == id)
    }

    /// Position of a voice inside its buffer, in seconds
    pub fn voice_position(&self, id: VoiceId) -> Option<f64> {
        self.voices
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.position / v.buffer.sample_rate as f64)
    }

    pub fn voice_rate(&self, id: VoiceId) -> Option<f64> {
        self.voices.iter().find(|v| v.id == id).map(|v| v.rate)
    }

    /// Drop all voices and pending changes; the clock keeps its value
    pub fn clear(&mut self) {
        self.voices.clear();
        self.pending.clear();
        self.ended.clear();
    }
}
