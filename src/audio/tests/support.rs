use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::audio::loader::{BufferLoader, ByteSource};
use crate::audio::mixer::Mixer;
use crate::audio::{AudioOutput, Bus, OutputProvider, OutputState, StartedVoices, VoiceId, VoiceSpec};
use crate::config::EngineConfig;
use crate::error::{AudioError, FetchError};
use crate::models::{DecodedBuffer, Track};

/// Sample rate of the WAV fixtures written by [`stem_track`]
pub const FIXTURE_RATE: u32 = 8_000;
/// Output rate of [`OfflineOutput`] in the scenario tests
pub const OFFLINE_RATE: u32 = 1_000;

/// In-memory 16-bit WAV holding a constant level on every channel
pub fn wav_bytes(channels: u16, sample_rate: u32, seconds: f64, level: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let value = (level * i16::MAX as f32) as i16;
        let frames = (seconds * sample_rate as f64).round() as usize;
        for _ in 0..frames * channels as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Mono decoded buffer with a constant level
pub fn tone(seconds: f64, sample_rate: u32, level: f32) -> Arc<DecodedBuffer> {
    let frames = (seconds * sample_rate as f64).round() as usize;
    Arc::new(DecodedBuffer::new(vec![level; frames], 1, sample_rate))
}

/// Byte source backed by a map, counting fetches per locator
#[derive(Default)]
pub struct MemorySource {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps first, widening the window for concurrent loads
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert(&self, locator: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(locator.to_string(), bytes);
    }

    pub fn fetch_count(&self, locator: &str) -> usize {
        self.fetches.lock().unwrap().get(locator).copied().unwrap_or(0)
    }
}

impl ByteSource for MemorySource {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        *self.fetches.lock().unwrap().entry(locator.to_string()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.files
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::new(locator, "not found"))
    }
}

/// Write WAV fixtures for a track into `source` and describe it
pub fn stem_track(source: &MemorySource, id: &str, main_secs: f64, guitar_secs: Option<f64>) -> Track {
    let main = format!("/audio/{}.wav", id);
    source.insert(&main, wav_bytes(1, FIXTURE_RATE, main_secs, 0.5));
    let track = Track::new(id, format!("Track {}", id), main);

    match guitar_secs {
        Some(seconds) => {
            let guitar = format!("/audio/{}-guitar.wav", id);
            source.insert(&guitar, wav_bytes(1, FIXTURE_RATE, seconds, 0.25));
            track.with_guitar(guitar)
        }
        None => track,
    }
}

/// Engine settings for tests: no prime voice so started groups are only playback
pub fn test_config() -> EngineConfig {
    EngineConfig {
        prime_output: false,
        ..EngineConfig::default()
    }
}

pub fn memory_loader(source: &Arc<MemorySource>) -> BufferLoader {
    BufferLoader::new(source.clone() as Arc<dyn ByteSource>)
}

struct OfflineState {
    mixer: Mixer,
    state: OutputState,
    resume_succeeds: bool,
    resume_attempts: usize,
    fail_next_start: bool,
    /// Frames rendered right before each scheduling call
    schedule_lag: usize,
    started: Vec<Vec<VoiceId>>,
}

impl OfflineState {
    /// Stand-in for the device callback running between `now()` and a scheduling call
    fn render_lag(&mut self) {
        if self.schedule_lag > 0 && self.state == OutputState::Running {
            let mut out = vec![0.0; self.schedule_lag];
            self.mixer.render(&mut out);
        }
    }
}

/// Deterministic output whose clock only moves when a test calls [`OfflineOutput::advance`].
///
/// Clones share state, so a test keeps one handle while the engine owns another.
#[derive(Clone)]
pub struct OfflineOutput {
    inner: Arc<Mutex<OfflineState>>,
    sample_rate: u32,
}

impl OfflineOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OfflineState {
                mixer: Mixer::new(sample_rate, 1),
                state: OutputState::Running,
                resume_succeeds: true,
                resume_attempts: 0,
                fail_next_start: false,
                schedule_lag: 0,
                started: Vec::new(),
            })),
            sample_rate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render `seconds` of output and return the mono samples produced.
    ///
    /// A suspended or closed output renders nothing and its clock stands still.
    pub fn advance(&self, seconds: f64) -> Vec<f32> {
        let mut inner = self.lock();
        if inner.state != OutputState::Running {
            return Vec::new();
        }
        let frames = (seconds * self.sample_rate as f64).round() as usize;
        let mut out = vec![0.0; frames];
        inner.mixer.render(&mut out);
        out
    }

    pub fn set_state(&self, state: OutputState) {
        self.lock().state = state;
    }

    pub fn set_resume_succeeds(&self, succeeds: bool) {
        self.lock().resume_succeeds = succeeds;
    }

    pub fn resume_attempts(&self) -> usize {
        self.lock().resume_attempts
    }

    pub fn fail_next_start(&self) {
        self.lock().fail_next_start = true;
    }

    /// Let the clock move by `seconds` inside every later start or rate call
    pub fn set_schedule_lag(&self, seconds: f64) {
        self.lock().schedule_lag = (seconds * self.sample_rate as f64).round() as usize;
    }

    /// Voice ids of every successful start call, in order
    pub fn started_groups(&self) -> Vec<Vec<VoiceId>> {
        self.lock().started.clone()
    }

    pub fn active_voice_count(&self) -> usize {
        self.lock().mixer.active_voices()
    }

    /// Buffer positions in seconds of the still-running voices of the latest start
    pub fn active_positions(&self) -> Vec<f64> {
        let inner = self.lock();
        inner
            .started
            .last()
            .map(|group| group.iter().filter_map(|id| inner.mixer.voice_position(*id)).collect())
            .unwrap_or_default()
    }

    pub fn active_rates(&self) -> Vec<f64> {
        let inner = self.lock();
        inner
            .started
            .last()
            .map(|group| group.iter().filter_map(|id| inner.mixer.voice_rate(*id)).collect())
            .unwrap_or_default()
    }

    pub fn bus_gains(&self) -> (f32, f32) {
        self.lock().mixer.bus_gains()
    }

    pub fn now(&self) -> f64 {
        self.lock().mixer.now()
    }
}

impl AudioOutput for OfflineOutput {
    fn now(&self) -> f64 {
        self.lock().mixer.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> OutputState {
        self.lock().state
    }

    fn resume(&mut self) -> OutputState {
        let mut inner = self.lock();
        inner.resume_attempts += 1;
        if inner.state == OutputState::Suspended && inner.resume_succeeds {
            inner.state = OutputState::Running;
        }
        inner.state
    }

    fn start_voices(&mut self, at: f64, voices: Vec<VoiceSpec>) -> Result<StartedVoices, AudioError> {
        let mut inner = self.lock();
        if inner.state == OutputState::Closed {
            return Err(AudioError::OutputClosed);
        }
        if inner.fail_next_start {
            inner.fail_next_start = false;
            return Err(AudioError::StartFailure("injected start failure".to_string()));
        }
        inner.render_lag();
        let started = inner.mixer.start_voices(at, voices)?;
        inner.started.push(started.ids.clone());
        Ok(started)
    }

    fn stop_voice(&mut self, id: VoiceId) -> Result<(), AudioError> {
        self.lock().mixer.stop_voice(id)
    }

    fn set_voice_rate(&mut self, ids: &[VoiceId], rate: f64, at: f64) -> Result<f64, AudioError> {
        let mut inner = self.lock();
        inner.render_lag();
        inner.mixer.set_voice_rate(ids, rate, at)
    }

    fn set_bus_gain(&mut self, bus: Bus, gain: f32, at: f64) {
        self.lock().mixer.set_bus_gain(bus, gain, at);
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        self.lock().mixer.drain_ended()
    }

    fn close(&mut self) {
        let mut inner = self.lock();
        inner.state = OutputState::Closed;
        inner.mixer.clear();
    }
}

/// Hands out clones of one [`OfflineOutput`], or always fails to open
pub struct OfflineProvider {
    output: OfflineOutput,
    fail_open: bool,
    opens: AtomicUsize,
}

impl OfflineProvider {
    pub fn new(output: OfflineOutput) -> Self {
        Self {
            output,
            fail_open: false,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            output: OfflineOutput::new(OFFLINE_RATE),
            fail_open: true,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl OutputProvider for OfflineProvider {
    fn open(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(AudioError::DeviceNotFound {
                device: "offline".to_string(),
            });
        }
        Ok(Box::new(self.output.clone()))
    }
}
