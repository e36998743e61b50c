use std::time::Duration;
use crate::audio::device::DeviceSummary;
use crate::error::{AudioError, DecodeError, EngineError, LoadError, PlayerError, SessionError};
use crate::models::{EngineSnapshot, Track};
use crate::session::TrackSession;

/// Status display formatter for the CLI
pub struct StatusDisplay;

impl StatusDisplay {
    /// Display the current track, transport state and session flags
    pub fn display_full_status(session: &TrackSession, device: Option<&str>) {
        let snapshot = session.engine().snapshot();
        let track = session.current_track();

        println!("┌─ Player Status ─────────────────────────────────────────┐");
        Self::display_track_info(track, session.current_index(), session.len());
        Self::display_playback_info(&snapshot);
        println!("│");
        println!("│ Speed: {}", Self::format_rate(snapshot.playback_rate));
        println!("│ Guitar: {}", Self::guitar_label(&snapshot, track));
        println!("│ Loop: {}", if session.is_looping() { "on" } else { "off" });
        println!("│ Device: {}", Self::truncate(device.unwrap_or("Default"), 49));
        println!("└─────────────────────────────────────────────────────────┘");
    }

    fn display_track_info(track: &Track, index: usize, total: usize) {
        println!("│ Track {}/{}: {}", index + 1, total, Self::truncate(&track.name, 44));
        if track.compases > 0 {
            println!("│ Bars: {}", track.compases);
        }
    }

    fn display_playback_info(snapshot: &EngineSnapshot) {
        println!("│");
        println!("│ Status: {}", Self::format_playback_state(snapshot));
        println!("│ Position: {} / {}",
            Self::format_seconds(snapshot.current_time),
            Self::format_seconds(snapshot.duration)
        );
        let progress = snapshot.progress() as f32;
        println!("│ Progress: [{}] {:.1}%", Self::create_progress_bar(progress, 40), progress * 100.0);
        println!("│ Remaining: {}", Self::format_seconds(snapshot.duration - snapshot.current_time));
    }

    fn guitar_label(snapshot: &EngineSnapshot, track: &Track) -> &'static str {
        let loaded = snapshot.current_track_id.as_deref() == Some(track.id.as_str());
        if !track.has_muteable_guitar {
            "none"
        } else if loaded && !snapshot.guitar_available {
            "unavailable"
        } else if snapshot.guitar_muted {
            "muted"
        } else {
            "on"
        }
    }

    /// One-line summary used after track changes
    pub fn compact_line(snapshot: &EngineSnapshot, track: &Track, index: usize, total: usize) -> String {
        format!("{} | {}/{} {} | {}/{} | {}{}",
            snapshot.state_label(),
            index + 1,
            total,
            Self::truncate(&track.name, 30),
            Self::format_seconds(snapshot.current_time),
            Self::format_seconds(snapshot.duration),
            Self::format_rate(snapshot.playback_rate),
            if snapshot.guitar_muted { " | guitar muted" } else { "" }
        )
    }

    pub fn display_compact_status(session: &TrackSession) {
        let snapshot = session.engine().snapshot();
        println!("{}", Self::compact_line(&snapshot, session.current_track(), session.current_index(), session.len()));
    }

    /// Numbered track list; the current track is marked with '>'
    pub fn track_list_lines(session: &TrackSession) -> Vec<String> {
        session
            .tracks()
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let marker = if i == session.current_index() { ">" } else { " " };
                let guitar = match (track.has_muteable_guitar, session.is_muted(&track.id)) {
                    (false, _) => "",
                    (true, false) => " [guitar]",
                    (true, true) => " [guitar muted]",
                };
                format!("{} {:>2}: {} ({}){}", marker, i + 1, Self::truncate(&track.name, 40), track.id, guitar)
            })
            .collect()
    }

    pub fn display_track_list(session: &TrackSession) {
        println!("{} ({} tracks):", session.playlist().display_title(), session.len());
        for line in Self::track_list_lines(session) {
            println!("{}", line);
        }
        if !session.deleted_tracks().is_empty() {
            println!("Removed this session: {}", session.deleted_tracks().join(", "));
        }
    }

    pub fn display_devices(devices: &[DeviceSummary]) {
        if devices.is_empty() {
            println!("No audio devices found");
            return;
        }
        println!("Available audio devices:");
        for device in devices {
            println!("{}", device.describe());
        }
    }

    /// Display real-time position update (single line)
    pub fn display_position_update(snapshot: &EngineSnapshot) {
        if snapshot.current_track_id.is_none() {
            return;
        }
        let progress = snapshot.progress() as f32;
        print!("\r{} [{}] {}/{} {}  ",
            Self::format_playback_state(snapshot),
            Self::create_progress_bar(progress, 30),
            Self::format_seconds(snapshot.current_time),
            Self::format_seconds(snapshot.duration),
            Self::format_rate(snapshot.playback_rate)
        );

        use std::io::{self, Write};
        let _ = io::stdout().flush();
    }

    /// Display error message with formatting and recovery suggestions
    pub fn display_error(error: &PlayerError) {
        use crate::error::ErrorSeverity;

        let severity = error.severity();
        let severity_icon = match severity {
            ErrorSeverity::Info => "ℹ",
            ErrorSeverity::Warning => "⚠",
            ErrorSeverity::Error => "✗",
            ErrorSeverity::Critical => "🔥",
        };

        eprintln!("┌─ {} {} ─────────────────────────────────────────────────┐",
            severity_icon, severity.as_str());

        for line in Self::wrap_text(&error.user_message(), 55) {
            eprintln!("│ {}", line);
        }

        let suggestions = error.recovery_suggestions();
        if !suggestions.is_empty() {
            eprintln!("│");
            eprintln!("│ Suggestions:");
            for suggestion in suggestions.iter().take(3) {
                for line in Self::wrap_text(&format!("• {}", suggestion), 53) {
                    eprintln!("│   {}", line);
                }
            }
        }

        if let Some(context) = Self::error_context(error) {
            eprintln!("│");
            eprintln!("│ {}", context);
        }

        eprintln!("└─────────────────────────────────────────────────────────┘");
    }

    /// Extra hint for errors where the next step is not obvious
    fn error_context(error: &PlayerError) -> Option<&'static str> {
        let load_error = match error {
            PlayerError::Engine(EngineError::Load(err)) => Some(err),
            PlayerError::Session(SessionError::Engine(EngineError::Load(err))) => Some(err),
            _ => None,
        };
        if let Some(err) = load_error {
            return match err {
                LoadError::Decode { source: DecodeError::UnsupportedFormat { .. }, .. } => {
                    Some("Supported: WAV, FLAC, MP3, OGG/Vorbis, AAC/M4A")
                }
                LoadError::Decode { .. } => Some("The file may need to be re-exported"),
                LoadError::Fetch(_) => Some("Check the playlist locators and --audio-root"),
            };
        }

        match error {
            PlayerError::Audio(AudioError::DeviceNotFound { .. }) => {
                Some("Run 'stem-player devices' to see available devices")
            }
            PlayerError::Engine(EngineError::SuspendedOutput)
            | PlayerError::Session(SessionError::Engine(EngineError::SuspendedOutput)) => {
                Some("Type 'play' again once the output device is back")
            }
            PlayerError::Session(SessionError::InvalidIndex { .. }) => {
                Some("Use 'list' to see track numbers")
            }
            PlayerError::Config(_) => Some("Configuration will use default values"),
            _ => None,
        }
    }

    /// Wrap text to fit within specified width
    fn wrap_text(text: &str, width: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + word.chars().count() < width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(current_line);
        }

        lines.into_iter()
            .map(|line| format!("{:<width$}", line, width = width))
            .collect()
    }

    /// Display a simple error message for non-interactive contexts
    pub fn display_simple_error(error: &PlayerError) {
        eprintln!("[{}] {}", error.severity().as_str(), error.user_message());

        if let Some(suggestion) = error.recovery_suggestions().first() {
            eprintln!("Suggestion: {}", suggestion);
        }
    }

    /// Format duration as MM:SS or HH:MM:SS for longer tracks
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    pub fn format_seconds(seconds: f64) -> String {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        Self::format_duration(Duration::from_secs_f64(seconds))
    }

    pub fn format_rate(rate: f64) -> String {
        format!("{:.2}x", rate)
    }

    /// Truncate string to fit display width
    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len || max_len <= 3 {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{}...", kept)
        }
    }

    /// Create a progress bar string
    pub fn create_progress_bar(progress: f32, width: usize) -> String {
        let filled = ((progress.clamp(0.0, 1.0) * width as f32) as usize).min(width);
        format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
    }

    pub fn format_playback_state(snapshot: &EngineSnapshot) -> String {
        let icon = match snapshot.state_label() {
            "Playing" => "▶",
            "Paused" => "⏸",
            "Loading" => "…",
            _ => "⏹",
        };
        format!("{} {}", icon, snapshot.state_label())
    }
}
