//! Track session controller: playlist ordering, looping, per-track guitar
//! mute and auto-advance, driven entirely through the engine's public API.

use std::collections::HashSet;
use tokio::task::JoinHandle;

use crate::audio::PlaybackEngine;
use crate::error::{EngineError, SessionError};
use crate::models::{LoadOutcome, Playlist, Track, TrackEnded};

/// Behavior switches for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub looping: bool,
    /// Warm the cache with the following track after every selection
    pub prefetch_next: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            looping: false,
            prefetch_next: true,
        }
    }
}

/// What the session did in response to a track-end notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAction {
    /// Same track restarted from the top
    Looped,
    /// Moved on and started the track at this index
    Advanced { index: usize },
    /// No further track; paused at zero
    Finished,
    /// Stale or duplicate notification
    Ignored,
}

pub struct TrackSession {
    playlist: Playlist,
    engine: PlaybackEngine,
    current_index: usize,
    is_looping: bool,
    prefetch_next: bool,
    muted_tracks: HashSet<String>,
    deleted_tracks: Vec<String>,
    /// Token of the last end notification acted on
    last_handled_end: Option<u64>,
}

impl TrackSession {
    pub fn new(playlist: Playlist, engine: PlaybackEngine, options: SessionOptions) -> Result<Self, SessionError> {
        if playlist.tracks.is_empty() {
            return Err(SessionError::EmptyPlaylist);
        }
        Ok(Self {
            playlist,
            engine,
            current_index: 0,
            is_looping: options.looping,
            prefetch_next: options.prefetch_next,
            muted_tracks: HashSet::new(),
            deleted_tracks: Vec::new(),
            last_handled_end: None,
        })
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn tracks(&self) -> &[Track] {
        &self.playlist.tracks
    }

    pub fn len(&self) -> usize {
        self.playlist.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlist.tracks.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_track(&self) -> &Track {
        &self.playlist.tracks[self.current_index]
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    pub fn is_muted(&self, track_id: &str) -> bool {
        self.muted_tracks.contains(track_id)
    }

    /// Ids removed with [`TrackSession::delete_current`], oldest first
    pub fn deleted_tracks(&self) -> &[String] {
        &self.deleted_tracks
    }

    fn check_index(&self, index: usize) -> Result<(), SessionError> {
        if index >= self.len() {
            return Err(SessionError::InvalidIndex {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn engine_holds_current(&self) -> bool {
        self.engine.current_track_id().as_deref() == Some(self.current_track().id.as_str())
    }

    /// Make `index` current, load it and optionally start it
    pub async fn select(&mut self, index: usize, autoplay: bool) -> Result<(), SessionError> {
        self.check_index(index)?;
        self.current_index = index;
        self.engine.initialize()?;

        let track = self.current_track().clone();
        if self.engine.load_track(&track).await? == LoadOutcome::Superseded {
            log::debug!("Selection of '{}' was overtaken by a newer load", track.id);
            return Ok(());
        }
        self.engine.set_guitar_muted(self.is_muted(&track.id));

        if autoplay {
            self.engine.play()?;
        }
        self.prefetch_upcoming();
        Ok(())
    }

    /// Pause when playing; otherwise play the current track, loading it first if needed
    pub async fn toggle_play(&mut self) -> Result<(), SessionError> {
        if self.engine.is_playing() {
            self.engine.pause();
            return Ok(());
        }
        if !self.engine_holds_current() {
            return self.select(self.current_index, true).await;
        }
        self.engine.play()?;
        Ok(())
    }

    /// Move to the following track, keeping the play state; false at the end of the list
    pub async fn next(&mut self) -> Result<bool, SessionError> {
        if self.current_index + 1 >= self.len() {
            return Ok(false);
        }
        let autoplay = self.engine.is_playing();
        self.select(self.current_index + 1, autoplay).await?;
        Ok(true)
    }

    pub async fn previous(&mut self) -> Result<bool, SessionError> {
        if self.current_index == 0 {
            return Ok(false);
        }
        let autoplay = self.engine.is_playing();
        self.select(self.current_index - 1, autoplay).await?;
        Ok(true)
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.is_looping = !self.is_looping;
        self.is_looping
    }

    /// Flip the guitar mute of a track (the current one by default)
    pub fn toggle_mute(&mut self, track_id: Option<&str>) -> Result<bool, SessionError> {
        let id = track_id.unwrap_or(self.current_track().id.as_str()).to_string();
        let track = self
            .playlist
            .tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SessionError::NoGuitarStem { track_id: id.clone() })?;
        if !track.has_muteable_guitar {
            return Err(SessionError::NoGuitarStem { track_id: id });
        }
        // The catalog may list a stem that failed to load
        let snapshot = self.engine.snapshot();
        if snapshot.current_track_id.as_deref() == Some(id.as_str())
            && !snapshot.is_loading
            && !snapshot.guitar_available
        {
            return Err(SessionError::NoGuitarStem { track_id: id });
        }

        let muted = if self.muted_tracks.remove(&id) {
            false
        } else {
            self.muted_tracks.insert(id.clone());
            true
        };

        if self.engine.current_track_id().as_deref() == Some(id.as_str()) {
            self.engine.set_guitar_muted(muted);
        }
        Ok(muted)
    }

    /// Remove the current track; the last remaining track cannot be deleted
    pub async fn delete_current(&mut self) -> Result<Track, SessionError> {
        if self.len() <= 1 {
            return Err(SessionError::LastTrack);
        }

        let was_loaded = self.engine_holds_current();
        let was_playing = self.engine.is_playing();
        let removed = self.playlist.tracks.remove(self.current_index);
        self.muted_tracks.remove(&removed.id);
        self.deleted_tracks.push(removed.id.clone());

        if self.current_index >= self.len() {
            self.current_index = self.len() - 1;
        }

        if was_loaded {
            self.engine.stop();
            self.select(self.current_index, was_playing).await?;
        }
        Ok(removed)
    }

    /// Reorder the list; the current index follows the current track
    pub async fn move_track(&mut self, from: usize, to: usize) -> Result<(), SessionError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }

        let current_id = self.current_track().id.clone();
        let track = self.playlist.tracks.remove(from);
        self.playlist.tracks.insert(to, track);
        self.current_index = self
            .playlist
            .tracks
            .iter()
            .position(|t| t.id == current_id)
            .unwrap_or(0);

        let engine_track = self.engine.current_track_id();
        if engine_track.is_some() && !self.engine_holds_current() {
            let autoplay = self.engine.is_playing();
            self.select(self.current_index, autoplay).await?;
        } else {
            self.prefetch_upcoming();
        }
        Ok(())
    }

    /// React to a natural track end: loop, advance, or stop at the end of the list.
    ///
    /// Duplicate notifications and ends of a track that is no longer current
    /// are ignored, so a repeated end can never trigger a second reload.
    pub async fn handle_track_end(&mut self, ended: TrackEnded) -> Result<EndAction, SessionError> {
        if self.last_handled_end.is_some_and(|token| ended.token <= token) {
            return Ok(EndAction::Ignored);
        }
        if ended.track_id != self.current_track().id {
            log::debug!("Ignoring end of '{}', no longer current", ended.track_id);
            return Ok(EndAction::Ignored);
        }
        self.last_handled_end = Some(ended.token);

        if self.is_looping {
            self.select(self.current_index, true).await?;
            return Ok(EndAction::Looped);
        }

        match self.advance_from(self.current_index + 1).await? {
            Some(index) => Ok(EndAction::Advanced { index }),
            None => Ok(EndAction::Finished),
        }
    }

    /// Start the first loadable track at or after `start`
    async fn advance_from(&mut self, start: usize) -> Result<Option<usize>, SessionError> {
        for index in start..self.len() {
            match self.select(index, true).await {
                Ok(()) => return Ok(Some(index)),
                Err(SessionError::Engine(EngineError::Load(e))) => {
                    log::warn!("Skipping '{}': {}", self.playlist.tracks[index].id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Prefetch the track after the current one, if enabled
    pub fn prefetch_upcoming(&self) -> Option<JoinHandle<()>> {
        if !self.prefetch_next {
            return None;
        }
        let upcoming = self.playlist.tracks.get(self.current_index + 1)?.clone();
        Some(self.engine.spawn_prefetch(upcoming))
    }
}
