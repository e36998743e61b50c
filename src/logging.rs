use log::{info, warn, error, debug, trace};
use std::time::{Duration, Instant};
use std::sync::{Arc, Mutex, MutexGuard};
use std::collections::VecDeque;
use chrono::{DateTime, Utc};

/// Environment variable holding the log level
pub const LOG_LEVEL_ENV: &str = "STEM_PLAYER_LOG_LEVEL";

/// Playback event for logging and debugging
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: PlaybackEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEventType {
    Initialized,
    TrackLoaded,
    LoadFailed,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackStopped,
    Seek,
    RateChanged,
    GuitarMuteChanged,
    TrackEnded,
    OutputSuspended,
    StartFailed,
    PrefetchFailed,
}

impl PlaybackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackEventType::Initialized => "INITIALIZED",
            PlaybackEventType::TrackLoaded => "TRACK_LOADED",
            PlaybackEventType::LoadFailed => "LOAD_FAILED",
            PlaybackEventType::PlaybackStarted => "PLAYBACK_STARTED",
            PlaybackEventType::PlaybackPaused => "PLAYBACK_PAUSED",
            PlaybackEventType::PlaybackStopped => "PLAYBACK_STOPPED",
            PlaybackEventType::Seek => "SEEK",
            PlaybackEventType::RateChanged => "RATE_CHANGED",
            PlaybackEventType::GuitarMuteChanged => "GUITAR_MUTE_CHANGED",
            PlaybackEventType::TrackEnded => "TRACK_ENDED",
            PlaybackEventType::OutputSuspended => "OUTPUT_SUSPENDED",
            PlaybackEventType::StartFailed => "START_FAILED",
            PlaybackEventType::PrefetchFailed => "PREFETCH_FAILED",
        }
    }
}

/// Logger for playback operations with a bounded in-memory history
#[derive(Clone)]
pub struct PlaybackLogger {
    events: Arc<Mutex<VecDeque<PlaybackEvent>>>,
    max_events: usize,
}

impl Default for PlaybackLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackLogger {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: max_events.max(1),
        }
    }

    /// Initialize logging system with appropriate log level
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        builder.filter_level(Self::parse_level(&log_level));
        builder.try_init()?;

        info!("Stem player logging initialized with level: {}", log_level);
        Ok(())
    }

    fn parse_level(level: &str) -> log::LevelFilter {
        match level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "off" => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<PlaybackEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an event and mirror it to the log facade
    pub fn log_event(&self, event_type: PlaybackEventType, details: String, duration: Option<Duration>) {
        match event_type {
            PlaybackEventType::TrackLoaded | PlaybackEventType::Seek | PlaybackEventType::RateChanged => {
                debug!("[{}] {} ({:?})", event_type.as_str(), details, duration);
            }
            PlaybackEventType::PrefetchFailed => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::OutputSuspended => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::LoadFailed | PlaybackEventType::StartFailed => {
                error!("[{}] {}", event_type.as_str(), details);
            }
            _ => {
                info!("[{}] {}", event_type.as_str(), details);
            }
        }

        let mut events = self.history();
        events.push_back(PlaybackEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_track_loaded(&self, track_id: &str, guitar_available: bool, load_time: Duration) {
        let stems = if guitar_available { "main + guitar" } else { "main only" };
        self.log_event(
            PlaybackEventType::TrackLoaded,
            format!("Loaded '{}' ({})", track_id, stems),
            Some(load_time),
        );
    }

    pub fn log_load_failed(&self, track_id: &str, error: &str) {
        self.log_event(
            PlaybackEventType::LoadFailed,
            format!("Load of '{}' failed: {}", track_id, error),
            None,
        );
    }

    pub fn log_playback_started(&self, track_id: &str, offset: f64, rate: f64) {
        self.log_event(
            PlaybackEventType::PlaybackStarted,
            format!("Playing '{}' from {:.2}s at {:.2}x", track_id, offset, rate),
            None,
        );
    }

    pub fn log_playback_paused(&self, position: f64) {
        self.log_event(
            PlaybackEventType::PlaybackPaused,
            format!("Paused at {:.2}s", position),
            None,
        );
    }

    pub fn log_seek(&self, from: f64, to: f64) {
        self.log_event(
            PlaybackEventType::Seek,
            format!("Seek from {:.2}s to {:.2}s", from, to),
            None,
        );
    }

    pub fn log_track_ended(&self, track_id: &str) {
        self.log_event(
            PlaybackEventType::TrackEnded,
            format!("'{}' reached its end", track_id),
            None,
        );
    }

    /// Get recent events for debugging, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<PlaybackEvent> {
        let events = self.history();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count_of(&self, event_type: PlaybackEventType) -> usize {
        self.history().iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn clear_events(&self) {
        self.history().clear();
    }
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!("Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name, duration.as_millis(), threshold.as_millis());
        } else {
            debug!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
