use std::sync::Arc;
use crate::audio::{AudioOutput, Bus, OutputState, StartedVoices, VoiceId, VoiceSpec};
use crate::error::AudioError;
use crate::models::DecodedBuffer;

/// Linear gain of the voice used to wake the output route
const PRIME_LEVEL: f32 = 0.001;
const PRIME_SECONDS: f64 = 0.05;

/// Voices of the current playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActivePair {
    main: VoiceId,
    guitar: Option<VoiceId>,
    token: u64,
}

/// Owns the output and the active main/guitar voice pair.
///
/// Voices are single-use: every start creates a fresh pair, scheduled in one
/// call so both stems begin on the same output frame.
pub struct DualTransport {
    output: Box<dyn AudioOutput>,
    main: Option<Arc<DecodedBuffer>>,
    guitar: Option<Arc<DecodedBuffer>>,
    active: Option<ActivePair>,
    guitar_muted: bool,
}

impl DualTransport {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            main: None,
            guitar: None,
            active: None,
            guitar_muted: false,
        }
    }

    /// Associate buffers with the next start; produces no sound
    pub fn bind(&mut self, main: Arc<DecodedBuffer>, guitar: Option<Arc<DecodedBuffer>>) {
        self.stop_active();
        self.main = Some(main);
        self.guitar = guitar;
    }

    pub fn unbind(&mut self) {
        self.stop_active();
        self.main = None;
        self.guitar = None;
    }

    pub fn is_bound(&self) -> bool {
        self.main.is_some()
    }

    pub fn has_guitar(&self) -> bool {
        self.guitar.is_some()
    }

    /// Track length in seconds, taken from the main stem
    pub fn duration(&self) -> f64 {
        self.main.as_ref().map_or(0.0, |b| b.duration())
    }

    pub fn now(&self) -> f64 {
        self.output.now()
    }

    pub fn output_state(&self) -> OutputState {
        self.output.state()
    }

    pub fn try_resume(&mut self) -> OutputState {
        self.output.resume()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Create and start fresh voices at `offset`, returning the clock anchor
    pub fn start_at(&mut self, offset: f64, rate: f64, token: u64) -> Result<f64, AudioError> {
        self.stop_active();

        let main = self.main
            .clone()
            .ok_or_else(|| AudioError::StartFailure("no buffer bound".to_string()))?;

        let mut specs = vec![VoiceSpec::new(main, offset, rate, Bus::Main)];
        if let Some(guitar) = &self.guitar {
            specs.push(VoiceSpec::new(Arc::clone(guitar), offset, rate, Bus::Guitar));
        }

        let at = self.output.now();
        self.output.set_bus_gain(Bus::Guitar, self.guitar_gain(), at);
        let StartedVoices { ids, at } = self.output.start_voices(at, specs)?;

        let main_id = *ids
            .first()
            .ok_or_else(|| AudioError::StartFailure("output started no voices".to_string()))?;
        self.active = Some(ActivePair {
            main: main_id,
            guitar: ids.get(1).copied(),
            token,
        });
        Ok(at)
    }

    /// Halt the active voices; voices that already ended are ignored
    pub fn stop_active(&mut self) {
        if let Some(pair) = self.active.take() {
            for id in std::iter::once(pair.main).chain(pair.guitar) {
                if let Err(e) = self.output.stop_voice(id) {
                    log::debug!("Stop of voice {} ignored: {}", id, e);
                }
            }
        }
    }

    /// Apply a new rate to every active voice on the same output frame.
    ///
    /// Returns the output time the change takes effect, or `None` when
    /// nothing is playing.
    pub fn set_rate(&mut self, rate: f64) -> Result<Option<f64>, AudioError> {
        let Some(pair) = self.active else {
            return Ok(None);
        };
        let ids: Vec<VoiceId> = std::iter::once(pair.main).chain(pair.guitar).collect();
        let at = self.output.now();
        self.output.set_voice_rate(&ids, rate, at).map(Some)
    }

    fn guitar_gain(&self) -> f32 {
        if self.guitar_muted {
            0.0
        } else {
            1.0
        }
    }

    pub fn set_guitar_muted(&mut self, muted: bool) {
        self.guitar_muted = muted;
        let at = self.output.now();
        self.output.set_bus_gain(Bus::Guitar, self.guitar_gain(), at);
    }

    /// Media seconds played since `anchor` at a constant `rate`
    pub fn elapsed_since(&self, anchor: f64, rate: f64) -> f64 {
        (self.output.now() - anchor).max(0.0) * rate
    }

    /// Token of the active session if its main voice ran to the end.
    ///
    /// Only the main stem decides the end of a track; a guitar voice that
    /// outlives it is stopped here.
    pub fn take_natural_end(&mut self) -> Option<u64> {
        let ended = self.output.drain_ended();
        let pair = self.active?;
        if !ended.contains(&pair.main) {
            return None;
        }

        self.active = None;
        if let Some(guitar) = pair.guitar {
            if !ended.contains(&guitar) {
                let _ = self.output.stop_voice(guitar);
            }
        }
        Some(pair.token)
    }

    /// Start a short, near-silent voice to wake the output route
    pub fn prime(&mut self) -> Result<(), AudioError> {
        let sample_rate = self.output.sample_rate().max(1);
        let frames = (sample_rate as f64 * PRIME_SECONDS) as usize;
        let blip = Arc::new(DecodedBuffer::new(vec![1.0; frames.max(1)], 1, sample_rate));

        let mut spec = VoiceSpec::new(blip, 0.0, 1.0, Bus::Main);
        spec.level = PRIME_LEVEL;
        let at = self.output.now();
        self.output.start_voices(at, vec![spec]).map(|_| ())
    }

    pub fn close(&mut self) {
        self.stop_active();
        self.main = None;
        self.guitar = None;
        self.output.close();
    }
}
