use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("CLI parse error: {0}")]
    Parse(#[from] crate::cli::ParseError),
}

impl PlayerError {
    /// Get user-friendly error message with suggested solutions
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Engine(err) => err.user_message(),
            PlayerError::Audio(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::Session(err) => err.user_message(),
            PlayerError::Playlist(err) => err.user_message(),
            PlayerError::Parse(err) => format!("Command error: {}", err),
        }
    }

    /// Get suggested recovery actions for the error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Engine(err) => err.recovery_suggestions(),
            PlayerError::Audio(err) => err.recovery_suggestions(),
            PlayerError::Config(err) => err.recovery_suggestions(),
            PlayerError::Session(err) => err.recovery_suggestions(),
            PlayerError::Playlist(err) => err.recovery_suggestions(),
            PlayerError::Parse(_) => vec!["Type 'help' to see available commands".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Engine(err) => err.is_recoverable(),
            PlayerError::Audio(err) => err.is_recoverable(),
            PlayerError::Config(err) => err.is_recoverable(),
            PlayerError::Session(err) => err.is_recoverable(),
            PlayerError::Playlist(err) => err.is_recoverable(),
            PlayerError::Parse(_) => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Engine(EngineError::Unavailable(_)) => ErrorSeverity::Critical,
            PlayerError::Engine(EngineError::SuspendedOutput) => ErrorSeverity::Warning,
            PlayerError::Engine(EngineError::InvalidRate(_)) => ErrorSeverity::Info,
            PlayerError::Engine(_) => ErrorSeverity::Error,
            PlayerError::Audio(AudioError::DeviceNotFound { .. }) => ErrorSeverity::Error,
            PlayerError::Audio(_) => ErrorSeverity::Critical,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::Session(SessionError::LastTrack) => ErrorSeverity::Info,
            PlayerError::Session(SessionError::Engine(_)) => ErrorSeverity::Error,
            PlayerError::Session(_) => ErrorSeverity::Warning,
            PlayerError::Playlist(_) => ErrorSeverity::Error,
            PlayerError::Parse(_) => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error | ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Errors surfaced by the playback engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("Audio output unavailable: {0}")]
    Unavailable(String),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Failed to start playback: {0}")]
    StartFailure(String),

    #[error("Audio output is suspended")]
    SuspendedOutput,

    #[error("Invalid playback rate: {0}")]
    InvalidRate(f64),
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            EngineError::NotInitialized => {
                "The audio engine has not been started yet".to_string()
            }
            EngineError::Unavailable(msg) => {
                format!("Audio output could not be opened: {}", msg)
            }
            EngineError::Load(err) => err.user_message(),
            EngineError::StartFailure(msg) => {
                format!("Playback could not start: {}", msg)
            }
            EngineError::SuspendedOutput => {
                "The audio output is suspended and did not resume".to_string()
            }
            EngineError::InvalidRate(rate) => {
                format!("'{}' is not a usable playback speed", rate)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            EngineError::NotInitialized => vec![
                "Select a track to start the audio engine".to_string(),
            ],
            EngineError::Unavailable(_) => vec![
                "Check that an audio output device is connected".to_string(),
                "Use 'stem-player devices' to see available outputs".to_string(),
                "Restart the application after fixing the audio setup".to_string(),
            ],
            EngineError::Load(err) => err.recovery_suggestions(),
            EngineError::StartFailure(_) => vec![
                "Try 'play' again".to_string(),
                "Check audio device connections".to_string(),
            ],
            EngineError::SuspendedOutput => vec![
                "Try 'play' again once the device is available".to_string(),
                "Close other applications holding the audio device".to_string(),
            ],
            EngineError::InvalidRate(_) => vec![
                "Use a speed between 0.8 and 1.2 (e.g. 'speed 0.9')".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::NotInitialized => true,
            EngineError::Unavailable(_) => false, // The engine instance is permanently unusable
            EngineError::Load(_) => true,
            EngineError::StartFailure(_) => true,
            EngineError::SuspendedOutput => true,
            EngineError::InvalidRate(_) => false,
        }
    }
}

/// Byte retrieval failure for a locator
#[derive(Debug, Error)]
#[error("Cannot fetch {locator}: {reason}")]
pub struct FetchError {
    pub locator: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

/// Buffer loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cannot decode {locator}: {source}")]
    Decode {
        locator: String,
        #[source]
        source: DecodeError,
    },
}

impl LoadError {
    pub fn locator(&self) -> &str {
        match self {
            LoadError::Fetch(err) => &err.locator,
            LoadError::Decode { locator, .. } => locator,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            LoadError::Fetch(err) => {
                format!("Audio file '{}' could not be retrieved: {}", err.locator, err.reason)
            }
            LoadError::Decode { locator, source } => {
                format!("'{}': {}", locator, source.user_message())
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            LoadError::Fetch(_) => vec![
                "Check that the path in the playlist file is correct".to_string(),
                "Check the audio root directory in the configuration".to_string(),
                "For remote files, check the network connection".to_string(),
            ],
            LoadError::Decode { source, .. } => source.recovery_suggestions(),
        }
    }
}

/// Audio decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Stream contains no audio frames")]
    EmptyStream,
}

impl DecodeError {
    pub fn user_message(&self) -> String {
        match self {
            DecodeError::UnsupportedFormat { format } => {
                format!("Audio format '{}' is not supported by this player", format)
            }
            DecodeError::CorruptedFile(msg) => {
                format!("Audio file appears to be corrupted or damaged: {}", msg)
            }
            DecodeError::DecodeFailed(msg) => {
                format!("Failed to decode audio data: {}", msg)
            }
            DecodeError::EmptyStream => "Audio file contains no playable audio".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            DecodeError::UnsupportedFormat { .. } => vec![
                "Supported formats: MP3, WAV, FLAC, OGG/Vorbis, AAC/M4A".to_string(),
                "Check if the file extension matches the actual format".to_string(),
            ],
            DecodeError::CorruptedFile(_) | DecodeError::EmptyStream => vec![
                "Try re-exporting or re-copying the file".to_string(),
                "Try playing the file in another audio player to confirm corruption".to_string(),
            ],
            DecodeError::DecodeFailed(_) => vec![
                "Try re-encoding the file with different settings".to_string(),
                "Check if the file is completely downloaded".to_string(),
            ],
        }
    }
}

/// Output backend errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Unsupported sample format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Voice start failed: {0}")]
    StartFailure(String),

    #[error("Voice {voice} is not active")]
    VoiceNotActive { voice: u64 },

    #[error("Audio output is closed")]
    OutputClosed,
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::DeviceNotFound { device } => {
                format!("Audio device '{}' is not available or has been disconnected", device)
            }
            AudioError::UnsupportedFormat { format } => {
                format!("The output device uses an unsupported sample format ({})", format)
            }
            AudioError::StreamError(msg) => {
                format!("Audio playback interrupted: {}", msg)
            }
            AudioError::InitializationFailed(msg) => {
                format!("Failed to initialize audio system: {}", msg)
            }
            AudioError::StartFailure(msg) => {
                format!("Audio could not be scheduled: {}", msg)
            }
            AudioError::VoiceNotActive { .. } => "Playback source already finished".to_string(),
            AudioError::OutputClosed => "The audio output has been shut down".to_string(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            AudioError::DeviceNotFound { .. } => vec![
                "Use 'stem-player devices' to see available audio devices".to_string(),
                "Check that your audio device is connected and powered on".to_string(),
            ],
            AudioError::UnsupportedFormat { .. } => vec![
                "Select a different output device".to_string(),
            ],
            AudioError::StreamError(_) | AudioError::StartFailure(_) => vec![
                "Try pausing and resuming playback".to_string(),
                "Check audio device connections".to_string(),
            ],
            AudioError::InitializationFailed(_) => vec![
                "Restart the application".to_string(),
                "Check that no other applications are using exclusive audio access".to_string(),
                "Verify audio drivers are properly installed".to_string(),
            ],
            AudioError::VoiceNotActive { .. } => vec![],
            AudioError::OutputClosed => vec!["Restart the application".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AudioError::DeviceNotFound { .. } => true, // Can fall back to the default device
            AudioError::UnsupportedFormat { .. } => false,
            AudioError::StreamError(_) => true,
            AudioError::InitializationFailed(_) => false,
            AudioError::StartFailure(_) => true,
            AudioError::VoiceNotActive { .. } => true,
            AudioError::OutputClosed => false,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid setting {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::InvalidValue { field, reason } => {
                format!("Configuration value '{}' is invalid: {}", field, reason)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ConfigError::ConfigDirNotFound => vec![
                "Check that you have write permissions to your home directory".to_string(),
                "Try creating the directory manually: ~/.config/stem-player/".to_string(),
            ],
            ConfigError::IoError(_) => vec![
                "Check file permissions for the configuration directory".to_string(),
                "Ensure the disk is not full".to_string(),
            ],
            ConfigError::SerializationError(_) => vec![
                "Configuration will use default values".to_string(),
            ],
            ConfigError::DeserializationError(_) | ConfigError::InvalidValue { .. } => vec![
                "Delete the configuration file to reset to defaults".to_string(),
                "Check the configuration file format manually".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        true // Defaults are always available
    }
}

/// Errors from the track session controller
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Playlist has no tracks")]
    EmptyPlaylist,

    #[error("Invalid index: {index} (playlist has {len} tracks)")]
    InvalidIndex { index: usize, len: usize },

    #[error("Cannot delete the last remaining track")]
    LastTrack,

    #[error("Track {track_id} has no guitar stem")]
    NoGuitarStem { track_id: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::EmptyPlaylist => "The playlist contains no tracks".to_string(),
            SessionError::InvalidIndex { index, len } => {
                format!("Track number {} is not valid (1-{})", index + 1, len)
            }
            SessionError::LastTrack => {
                "A playlist must keep at least one track".to_string()
            }
            SessionError::NoGuitarStem { track_id } => {
                format!("Track '{}' has no separate guitar part to mute", track_id)
            }
            SessionError::Engine(err) => err.user_message(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            SessionError::EmptyPlaylist => vec![
                "Add [[tracks]] entries to the playlist file".to_string(),
            ],
            SessionError::InvalidIndex { .. } => vec![
                "Use 'list' to see available tracks".to_string(),
                "Track numbers start from 1".to_string(),
            ],
            SessionError::LastTrack => vec![],
            SessionError::NoGuitarStem { .. } => vec![
                "Use 'list' to see which tracks have a guitar stem".to_string(),
            ],
            SessionError::Engine(err) => err.recovery_suggestions(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Engine(err) => err.is_recoverable(),
            _ => true,
        }
    }
}

/// Playlist catalog errors
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("Playlist not found: {path}")]
    PlaylistNotFound { path: String },

    #[error("Invalid playlist format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl PlaylistError {
    pub fn user_message(&self) -> String {
        match self {
            PlaylistError::PlaylistNotFound { path } => {
                format!("Playlist file '{}' does not exist", path)
            }
            PlaylistError::InvalidFormat(msg) => {
                format!("Playlist file has invalid contents: {}", msg)
            }
            PlaylistError::IoError(err) => {
                format!("Cannot access playlist file: {}", err)
            }
            PlaylistError::Parse(err) => {
                format!("Playlist file is not valid TOML: {}", err)
            }
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlaylistError::PlaylistNotFound { .. } => vec![
                "Check the playlist file path".to_string(),
            ],
            PlaylistError::InvalidFormat(_) | PlaylistError::Parse(_) => vec![
                "Each track needs id, name and [tracks.audio_files] main".to_string(),
                "Check the playlist file manually for formatting errors".to_string(),
            ],
            PlaylistError::IoError(_) => vec![
                "Check file permissions for the playlist file".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlaylistError::IoError(_))
    }
}
