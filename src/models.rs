use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use crate::error::PlaylistError;

/// Locators for the audio files that make up one track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioFiles {
    pub main: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guitar: Option<String>,
}

/// A rehearsal track: a main mix plus an optional isolated guitar stem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    /// Bar count shown next to the title
    #[serde(default)]
    pub compases: u32,
    #[serde(default)]
    pub has_muteable_guitar: bool,
    pub audio_files: AudioFiles,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            compases: 0,
            has_muteable_guitar: false,
            audio_files: AudioFiles {
                main: main.into(),
                guitar: None,
            },
        }
    }

    pub fn with_guitar(mut self, guitar: impl Into<String>) -> Self {
        self.audio_files.guitar = Some(guitar.into());
        self.has_muteable_guitar = true;
        self
    }

    pub fn with_compases(mut self, compases: u32) -> Self {
        self.compases = compases;
        self
    }

    /// Guitar locator, only when the track declares a muteable stem
    pub fn guitar_locator(&self) -> Option<&str> {
        if self.has_muteable_guitar {
            self.audio_files.guitar.as_deref()
        } else {
            None
        }
    }
}

/// A named, ordered collection of tracks loaded from a TOML catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub full_title: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// Load and validate a playlist catalog file
    pub fn from_file(path: &Path) -> Result<Self, PlaylistError> {
        if !path.exists() {
            return Err(PlaylistError::PlaylistNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PlaylistError> {
        let mut playlist: Playlist = toml::from_str(content)?;
        playlist.validate()?;
        Ok(playlist)
    }

    /// Reject empty or ambiguous catalogs and downgrade tracks whose guitar
    /// stem is declared but missing
    fn validate(&mut self) -> Result<(), PlaylistError> {
        if self.tracks.is_empty() {
            return Err(PlaylistError::InvalidFormat(format!(
                "playlist '{}' has no tracks",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for track in &mut self.tracks {
            if !seen.insert(track.id.clone()) {
                return Err(PlaylistError::InvalidFormat(format!(
                    "duplicate track id '{}'",
                    track.id
                )));
            }
            if track.audio_files.main.trim().is_empty() {
                return Err(PlaylistError::InvalidFormat(format!(
                    "track '{}' has no main audio file",
                    track.id
                )));
            }
            if track.has_muteable_guitar && track.audio_files.guitar.is_none() {
                log::warn!(
                    "Track '{}' declares a muteable guitar but has no guitar file; playing main mix only",
                    track.id
                );
                track.has_muteable_guitar = false;
            }
        }
        Ok(())
    }

    pub fn display_title(&self) -> &str {
        if self.full_title.is_empty() {
            &self.name
        } else {
            &self.full_title
        }
    }
}

/// Fully decoded PCM audio, interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: usize,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels as usize;
        Self {
            samples,
            channels,
            sample_rate,
            frames,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Sample for a frame/channel pair; channels beyond the buffer's width wrap
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        if frame >= self.frames {
            return 0.0;
        }
        let ch = channel % self.channels as usize;
        self.samples[frame * self.channels as usize + ch]
    }
}

/// Observable engine state, published on every change
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EngineSnapshot {
    pub is_playing: bool,
    pub is_initialized: bool,
    pub is_loading: bool,
    pub current_time: f64,
    pub duration: f64,
    pub playback_rate: f64,
    pub current_track_id: Option<String>,
    pub guitar_muted: bool,
    pub guitar_available: bool,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_initialized: false,
            is_loading: false,
            current_time: 0.0,
            duration: 0.0,
            playback_rate: 1.0,
            current_track_id: None,
            guitar_muted: false,
            guitar_available: false,
        }
    }
}

impl EngineSnapshot {
    /// Progress as a fraction from 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            0.0
        } else {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        }
    }

    pub fn state_label(&self) -> &'static str {
        if self.is_loading {
            "Loading"
        } else if self.is_playing {
            "Playing"
        } else if self.current_track_id.is_some() {
            "Paused"
        } else {
            "Stopped"
        }
    }
}

/// Notification that the loaded track finished on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEnded {
    pub track_id: String,
    /// Playback session the end belongs to
    pub token: u64,
}

/// Result of a `load_track` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { guitar_available: bool },
    /// A newer load started before this one finished
    Superseded,
}
