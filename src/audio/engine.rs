use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::loader::BufferLoader;
use crate::audio::output::CpalOutputProvider;
use crate::audio::transport::DualTransport;
use crate::audio::{OutputProvider, OutputState};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::logging::{PlaybackEventType, PlaybackLogger};
use crate::models::{EngineSnapshot, LoadOutcome, Track, TrackEnded};

/// Listener invoked once per natural track completion
pub type TrackEndCallback = Arc<dyn Fn(TrackEnded) + Send + Sync>;

const SHUT_DOWN: &str = "engine has been shut down";

/// Mutable session record; only ever touched under the engine lock
struct EngineState {
    transport: Option<DualTransport>,
    initialized: bool,
    /// Set once the output failed to open or the engine shut down
    unavailable: Option<String>,
    is_playing: bool,
    is_loading: bool,
    track_id: Option<String>,
    /// Media position at the last anchor, in seconds
    offset: f64,
    /// Output clock time at which `offset` was valid
    anchor: f64,
    rate: f64,
    guitar_muted: bool,
    guitar_available: bool,
    load_generation: u64,
    session_token: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            transport: None,
            initialized: false,
            unavailable: None,
            is_playing: false,
            is_loading: false,
            track_id: None,
            offset: 0.0,
            anchor: 0.0,
            rate: 1.0,
            guitar_muted: false,
            guitar_available: false,
            load_generation: 0,
            session_token: 0,
        }
    }

    fn ready(&self) -> Result<(), EngineError> {
        if let Some(reason) = &self.unavailable {
            return Err(EngineError::Unavailable(reason.clone()));
        }
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.transport.as_ref().map_or(0.0, DualTransport::duration)
    }

    fn position(&self) -> f64 {
        if !self.is_playing {
            return self.offset;
        }
        let elapsed = self
            .transport
            .as_ref()
            .map_or(0.0, |t| t.elapsed_since(self.anchor, self.rate));
        (self.offset + elapsed).min(self.duration())
    }

    /// Fold elapsed time into the offset and silence the voices
    fn halt(&mut self) -> bool {
        if !self.is_playing {
            return false;
        }
        self.offset = self.position();
        if let Some(transport) = self.transport.as_mut() {
            transport.stop_active();
        }
        self.is_playing = false;
        true
    }

    /// Gate for starting voices: a suspended output gets one resume attempt
    fn ensure_output_running(&mut self) -> Result<(), EngineError> {
        let transport = self.transport.as_mut().ok_or(EngineError::NotInitialized)?;
        match transport.output_state() {
            OutputState::Running => Ok(()),
            OutputState::Suspended => match transport.try_resume() {
                OutputState::Running => Ok(()),
                _ => Err(EngineError::SuspendedOutput),
            },
            OutputState::Closed => Err(EngineError::Unavailable("audio output closed".to_string())),
        }
    }

    /// Start fresh voices at the current offset under a new session token
    fn start(&mut self) -> Result<(), EngineError> {
        let transport = self.transport.as_mut().ok_or(EngineError::NotInitialized)?;
        self.session_token += 1;

        match transport.start_at(self.offset, self.rate, self.session_token) {
            Ok(anchor) => {
                self.anchor = anchor;
                self.is_playing = true;
                Ok(())
            }
            Err(e) => {
                transport.stop_active();
                self.is_playing = false;
                Err(EngineError::StartFailure(e.to_string()))
            }
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            is_playing: self.is_playing,
            is_initialized: self.initialized,
            is_loading: self.is_loading,
            current_time: self.position(),
            duration: self.duration(),
            playback_rate: self.rate,
            current_track_id: self.track_id.clone(),
            guitar_muted: self.guitar_muted,
            guitar_available: self.guitar_available,
        }
    }
}

/// Synchronized main/guitar playback engine.
///
/// A cheap cloneable handle; clones share one session. All state lives
/// behind a single mutex that is never held across an `.await`, and stale
/// async completions are discarded through the load generation and the
/// per-start session token rather than through cancellation.
#[derive(Clone)]
pub struct PlaybackEngine {
    state: Arc<Mutex<EngineState>>,
    loader: BufferLoader,
    provider: Arc<dyn OutputProvider>,
    config: Arc<EngineConfig>,
    snapshots: Arc<watch::Sender<EngineSnapshot>>,
    track_end: Arc<Mutex<Option<TrackEndCallback>>>,
    logger: PlaybackLogger,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig, provider: Arc<dyn OutputProvider>, loader: BufferLoader) -> Self {
        let (snapshots, _) = watch::channel(EngineSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(EngineState::new())),
            loader,
            provider,
            config: Arc::new(config),
            snapshots: Arc::new(snapshots),
            track_end: Arc::new(Mutex::new(None)),
            logger: PlaybackLogger::new(),
        }
    }

    /// Engine on the configured cpal device, loading from the configured audio root
    pub fn with_cpal(config: EngineConfig) -> Self {
        let provider = CpalOutputProvider::new(config.preferred_device.clone(), config.buffer_frames);
        let loader = BufferLoader::from_root(config.audio_root.as_deref());
        Self::new(config, Arc::new(provider), loader)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` under the lock, then publish the resulting snapshot after releasing it
    fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.lock();
            let result = f(&mut *state);
            (result, state.snapshot())
        };
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    pub fn logger(&self) -> &PlaybackLogger {
        &self.logger
    }

    pub fn loader(&self) -> &BufferLoader {
        &self.loader
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the output. Idempotent; a failed open disables this engine for good.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let opened = self.update(|state| -> Result<bool, EngineError> {
            if state.initialized {
                return Ok(false);
            }
            if let Some(reason) = &state.unavailable {
                return Err(EngineError::Unavailable(reason.clone()));
            }

            let output = self.provider.open().map_err(|e| {
                log::error!("Audio output failed to open: {}", e);
                state.unavailable = Some(e.to_string());
                EngineError::Unavailable(e.to_string())
            })?;

            let mut transport = DualTransport::new(output);
            if transport.output_state() == OutputState::Suspended
                && transport.try_resume() != OutputState::Running
            {
                log::warn!("Audio output is suspended; play will retry resuming it");
            }
            transport.set_guitar_muted(state.guitar_muted);
            if self.config.prime_output {
                if let Err(e) = transport.prime() {
                    log::debug!("Output priming skipped: {}", e);
                }
            }

            state.transport = Some(transport);
            state.initialized = true;
            Ok(true)
        })?;

        if opened {
            self.logger.log_event(
                PlaybackEventType::Initialized,
                "Audio output opened".to_string(),
                None,
            );
        }
        Ok(())
    }

    /// Load both stems of `track` and bind them for the next play.
    ///
    /// Playback stops and the position resets to zero immediately. When a
    /// newer load starts before this one finishes, the buffers still land in
    /// the cache but are not bound and the result is [`LoadOutcome::Superseded`].
    pub async fn load_track(&self, track: &Track) -> Result<LoadOutcome, EngineError> {
        let generation = self.update(|state| -> Result<u64, EngineError> {
            state.ready()?;
            state.halt();
            if let Some(transport) = state.transport.as_mut() {
                transport.unbind();
            }
            state.session_token += 1;
            state.load_generation += 1;
            state.is_loading = true;
            state.track_id = Some(track.id.clone());
            state.offset = 0.0;
            state.guitar_available = false;
            Ok(state.load_generation)
        })?;

        let started = Instant::now();
        let guitar_locator = track.guitar_locator();
        let (main, guitar) = tokio::join!(self.loader.load(&track.audio_files.main), async {
            match guitar_locator {
                Some(locator) => Some(self.loader.load(locator).await),
                None => None,
            }
        });

        let main = match main {
            Ok(buffer) => buffer,
            Err(e) => {
                let current = self.update(|state| {
                    if state.load_generation != generation {
                        return false;
                    }
                    state.is_loading = false;
                    state.track_id = None;
                    true
                });
                if !current {
                    return Ok(LoadOutcome::Superseded);
                }
                self.logger.log_load_failed(&track.id, &e.to_string());
                return Err(EngineError::Load(e));
            }
        };

        let guitar = match guitar {
            Some(Ok(buffer)) => Some(buffer),
            Some(Err(e)) => {
                log::warn!("Guitar stem of '{}' unavailable, playing the main mix only: {}", track.id, e);
                None
            }
            None => None,
        };
        let guitar_available = guitar.is_some();

        let bound = self.update(|state| {
            if state.load_generation != generation {
                return false;
            }
            let Some(transport) = state.transport.as_mut() else {
                return false;
            };
            transport.bind(main, guitar);
            state.guitar_available = guitar_available;
            state.is_loading = false;
            true
        });

        if !bound {
            log::debug!("Discarding superseded load of '{}'", track.id);
            return Ok(LoadOutcome::Superseded);
        }
        self.logger.log_track_loaded(&track.id, guitar_available, started.elapsed());
        Ok(LoadOutcome::Loaded { guitar_available })
    }

    /// Warm the cache with a track's stems without touching playback
    pub async fn prefetch_track(&self, track: &Track) {
        let guitar_locator = track.guitar_locator();
        let (main, guitar) = tokio::join!(self.loader.prefetch(&track.audio_files.main), async {
            match guitar_locator {
                Some(locator) => Some(self.loader.prefetch(locator).await),
                None => None,
            }
        });

        for error in main.err().into_iter().chain(guitar.and_then(Result::err)) {
            self.logger.log_event(
                PlaybackEventType::PrefetchFailed,
                format!("{}: {}", track.id, error),
                None,
            );
        }
    }

    pub fn spawn_prefetch(&self, track: Track) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.prefetch_track(&track).await })
    }

    /// Start playback from the stored offset; no-op when playing or nothing is loaded
    pub fn play(&self) -> Result<(), EngineError> {
        let result = self.update(|state| -> Result<Option<(String, f64, f64)>, EngineError> {
            state.ready()?;
            if state.is_playing || state.is_loading {
                return Ok(None);
            }
            let transport = state.transport.as_ref().ok_or(EngineError::NotInitialized)?;
            if !transport.is_bound() {
                return Ok(None);
            }

            state.ensure_output_running()?;
            state.start()?;
            Ok(Some((state.track_id.clone().unwrap_or_default(), state.offset, state.rate)))
        });

        match result {
            Ok(Some((track_id, offset, rate))) => {
                self.logger.log_playback_started(&track_id, offset, rate);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(EngineError::SuspendedOutput) => {
                self.logger.log_event(
                    PlaybackEventType::OutputSuspended,
                    "Play refused: output did not resume".to_string(),
                    None,
                );
                Err(EngineError::SuspendedOutput)
            }
            Err(EngineError::StartFailure(reason)) => {
                self.logger.log_event(PlaybackEventType::StartFailed, reason.clone(), None);
                Err(EngineError::StartFailure(reason))
            }
            Err(e) => Err(e),
        }
    }

    pub fn pause(&self) {
        let paused_at = self.update(|state| state.halt().then_some(state.offset));
        if let Some(position) = paused_at {
            self.logger.log_playback_paused(position);
        }
    }

    /// Pause and rewind to the start
    pub fn stop(&self) {
        let was_loaded = self.update(|state| {
            state.halt();
            state.offset = 0.0;
            state.session_token += 1;
            state.track_id.is_some()
        });
        if was_loaded {
            self.logger.log_event(
                PlaybackEventType::PlaybackStopped,
                "Stopped".to_string(),
                None,
            );
        }
    }

    /// Move to `seconds`, clamped into the track; keeps playing if it was playing
    pub fn seek(&self, seconds: f64) -> Result<(), EngineError> {
        if seconds.is_nan() {
            log::warn!("Ignoring seek to NaN");
            return Ok(());
        }

        let result = self.update(|state| -> Result<(f64, f64), EngineError> {
            let from = state.position();
            let target = seconds.clamp(0.0, state.duration());
            let was_playing = state.halt();
            state.offset = target;
            if was_playing {
                state.ensure_output_running()?;
                state.start()?;
            }
            Ok((from, target))
        });

        match result {
            Ok((from, to)) => {
                self.logger.log_seek(from, to);
                Ok(())
            }
            Err(EngineError::SuspendedOutput) => {
                self.logger.log_event(
                    PlaybackEventType::OutputSuspended,
                    format!("Seek to {:.2}s left playback paused: output did not resume", seconds),
                    None,
                );
                Err(EngineError::SuspendedOutput)
            }
            Err(e) => {
                self.logger.log_event(PlaybackEventType::StartFailed, e.to_string(), None);
                Err(e)
            }
        }
    }

    /// Clamp and apply a playback rate, returning the rate actually used
    pub fn set_playback_rate(&self, rate: f64) -> Result<f64, EngineError> {
        if !rate.is_finite() {
            return Err(EngineError::InvalidRate(rate));
        }
        let clamped = self.config.clamp_rate(rate);

        let previous = self.update(|state| {
            if state.is_playing {
                let duration = state.duration();
                let position = state.position();
                if let Some(transport) = state.transport.as_mut() {
                    match transport.set_rate(clamped) {
                        // Re-anchor on the frame the voices actually change rate
                        Ok(Some(applied_at)) => {
                            let elapsed = (applied_at - state.anchor).max(0.0) * state.rate;
                            state.offset = (state.offset + elapsed).min(duration);
                            state.anchor = applied_at;
                        }
                        Ok(None) => {
                            state.offset = position;
                            state.anchor = transport.now();
                        }
                        Err(e) => {
                            log::warn!("Rate change not applied to the output: {}", e);
                            state.offset = position;
                            state.anchor = transport.now();
                        }
                    }
                }
            }
            std::mem::replace(&mut state.rate, clamped)
        });

        if previous != clamped {
            self.logger.log_event(
                PlaybackEventType::RateChanged,
                format!("{:.2}x -> {:.2}x", previous, clamped),
                None,
            );
        }
        Ok(clamped)
    }

    /// Global guitar mute; survives track changes
    pub fn set_guitar_muted(&self, muted: bool) {
        let changed = self.update(|state| {
            if let Some(transport) = state.transport.as_mut() {
                transport.set_guitar_muted(muted);
            }
            std::mem::replace(&mut state.guitar_muted, muted) != muted
        });
        if changed {
            self.logger.log_event(
                PlaybackEventType::GuitarMuteChanged,
                if muted { "Guitar muted" } else { "Guitar unmuted" }.to_string(),
                None,
            );
        }
    }

    pub fn current_time(&self) -> f64 {
        self.lock().position()
    }

    pub fn duration(&self) -> f64 {
        self.lock().duration()
    }

    pub fn playback_rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.lock().track_id.clone()
    }

    pub fn guitar_muted(&self) -> bool {
        self.lock().guitar_muted
    }

    pub fn guitar_available(&self) -> bool {
        self.lock().guitar_available
    }

    /// Fresh snapshot with a live `current_time`
    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock().snapshot()
    }

    /// Receiver of snapshots published on every state change
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    /// Register the track-end listener, replacing any earlier one
    pub fn on_track_end<F>(&self, callback: F)
    where
        F: Fn(TrackEnded) + Send + Sync + 'static,
    {
        *self.track_end.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(callback));
    }

    /// Handle a natural end of the active main voice, if one happened.
    ///
    /// Ends belonging to an older session token are dropped. The listener
    /// runs after the lock is released so it may call back into the engine.
    pub fn process_events(&self) -> Option<TrackEnded> {
        let ended = self.update(|state| {
            let token = state.transport.as_mut()?.take_natural_end()?;
            if !state.is_playing || token != state.session_token {
                log::debug!("Dropping stale end of session {}", token);
                return None;
            }
            state.is_playing = false;
            state.offset = 0.0;
            state.session_token += 1;
            Some(TrackEnded {
                track_id: state.track_id.clone().unwrap_or_default(),
                token,
            })
        })?;

        self.logger.log_track_ended(&ended.track_id);
        let callback = self.track_end.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(callback) = callback {
            callback(ended.clone());
        }
        Some(ended)
    }

    /// Poll [`PlaybackEngine::process_events`] until the engine shuts down
    pub fn spawn_event_pump(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let shut_down = engine.lock().unavailable.is_some();
                if shut_down {
                    break;
                }
                engine.process_events();
            }
        })
    }

    /// Stop playback, close the output and drop cached buffers
    pub fn shutdown(&self) {
        let was_open = self.update(|state| {
            state.halt();
            state.load_generation += 1;
            state.session_token += 1;
            state.is_loading = false;
            state.initialized = false;
            state.unavailable = Some(SHUT_DOWN.to_string());
            match state.transport.take() {
                Some(mut transport) => {
                    transport.close();
                    true
                }
                None => false,
            }
        });
        self.loader.cache().clear();
        if was_open {
            log::info!("Playback engine shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::support::{memory_loader, test_config, MemorySource, OfflineOutput, OfflineProvider, OFFLINE_RATE};

    fn engine() -> PlaybackEngine {
        let provider = OfflineProvider::new(OfflineOutput::new(OFFLINE_RATE));
        PlaybackEngine::new(test_config(), Arc::new(provider), memory_loader(&Arc::new(MemorySource::new())))
    }

    #[test]
    fn test_initial_snapshot() {
        let engine = engine();
        let snapshot = engine.snapshot();
        assert!(!snapshot.is_initialized);
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.playback_rate, 1.0);
        assert_eq!(snapshot.current_track_id, None);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let output = OfflineOutput::new(OFFLINE_RATE);
        let provider = Arc::new(OfflineProvider::new(output));
        let engine = PlaybackEngine::new(
            test_config(),
            provider.clone(),
            memory_loader(&Arc::new(MemorySource::new())),
        );

        engine.initialize().unwrap();
        engine.initialize().unwrap();
        assert!(engine.is_initialized());
        assert_eq!(provider.open_count(), 1);
    }

    #[test]
    fn test_initialize_failure_is_permanent() {
        let provider = Arc::new(OfflineProvider::failing());
        let engine = PlaybackEngine::new(
            test_config(),
            provider.clone(),
            memory_loader(&Arc::new(MemorySource::new())),
        );

        assert!(matches!(engine.initialize(), Err(EngineError::Unavailable(_))));
        assert!(matches!(engine.initialize(), Err(EngineError::Unavailable(_))));
        assert!(!engine.is_initialized());
        // No retry after the first failure
        assert_eq!(provider.open_count(), 1);
        assert!(matches!(engine.play(), Err(EngineError::Unavailable(_))));
    }

    #[test]
    fn test_operations_before_initialize() {
        let engine = engine();
        assert!(matches!(engine.play(), Err(EngineError::NotInitialized)));
        engine.pause();
        engine.stop();
        engine.seek(3.0).unwrap();
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_play_without_track_is_noop() {
        let engine = engine();
        engine.initialize().unwrap();
        engine.play().unwrap();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_rate_is_clamped() {
        let engine = engine();
        assert_eq!(engine.set_playback_rate(2.0).unwrap(), 1.2);
        assert_eq!(engine.set_playback_rate(0.1).unwrap(), 0.8);
        assert_eq!(engine.set_playback_rate(-3.0).unwrap(), 0.8);
        assert_eq!(engine.set_playback_rate(1.05).unwrap(), 1.05);
        assert!(matches!(engine.set_playback_rate(f64::NAN), Err(EngineError::InvalidRate(_))));
        assert!(matches!(engine.set_playback_rate(f64::INFINITY), Err(EngineError::InvalidRate(_))));
        assert_eq!(engine.playback_rate(), 1.05);
    }

    #[test]
    fn test_wide_config_cannot_widen_rate_range() {
        let config = EngineConfig {
            min_rate: 0.25,
            max_rate: 4.0,
            ..test_config()
        };
        let provider = OfflineProvider::new(OfflineOutput::new(OFFLINE_RATE));
        let engine = PlaybackEngine::new(config, Arc::new(provider), memory_loader(&Arc::new(MemorySource::new())));

        assert_eq!(engine.set_playback_rate(3.0).unwrap(), 1.2);
        assert_eq!(engine.set_playback_rate(0.3).unwrap(), 0.8);
    }

    #[test]
    fn test_mute_flag_is_global_before_init() {
        let engine = engine();
        engine.set_guitar_muted(true);
        engine.initialize().unwrap();
        assert!(engine.guitar_muted());
        assert!(engine.snapshot().guitar_muted);
    }

    #[test]
    fn test_shutdown_disables_engine() {
        let engine = engine();
        engine.initialize().unwrap();
        engine.shutdown();

        assert!(!engine.is_initialized());
        assert!(matches!(engine.initialize(), Err(EngineError::Unavailable(_))));
    }
}
