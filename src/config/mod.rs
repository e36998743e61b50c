use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Hard playback rate bounds; configuration may only narrow them
pub const MIN_PLAYBACK_RATE: f64 = 0.8;
pub const MAX_PLAYBACK_RATE: f64 = 1.2;

/// Engine and player settings stored in `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Lower bound for the playback rate
    pub min_rate: f64,
    /// Upper bound for the playback rate
    pub max_rate: f64,
    pub preferred_device: Option<String>,
    /// Directory that relative and root-relative locators resolve against
    pub audio_root: Option<PathBuf>,
    /// Play a near-silent blip on initialize to wake the output route
    pub prime_output: bool,
    pub event_poll_interval_ms: u64,
    pub prefetch_next: bool,
    /// Fixed output buffer size in frames; device default when unset
    pub buffer_frames: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_rate: MIN_PLAYBACK_RATE,
            max_rate: MAX_PLAYBACK_RATE,
            preferred_device: None,
            audio_root: None,
            prime_output: true,
            event_poll_interval_ms: 20,
            prefetch_next: true,
            buffer_frames: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_rate.is_finite() && self.max_rate.is_finite()) || self.min_rate <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "min_rate".to_string(),
                reason: "rates must be finite and positive".to_string(),
            });
        }
        if self.min_rate < MIN_PLAYBACK_RATE {
            return Err(ConfigError::InvalidValue {
                field: "min_rate".to_string(),
                reason: format!("{} is below the supported minimum {}", self.min_rate, MIN_PLAYBACK_RATE),
            });
        }
        if self.max_rate > MAX_PLAYBACK_RATE {
            return Err(ConfigError::InvalidValue {
                field: "max_rate".to_string(),
                reason: format!("{} is above the supported maximum {}", self.max_rate, MAX_PLAYBACK_RATE),
            });
        }
        if self.min_rate > self.max_rate {
            return Err(ConfigError::InvalidValue {
                field: "max_rate".to_string(),
                reason: format!("{} is below min_rate {}", self.max_rate, self.min_rate),
            });
        }
        if self.event_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_poll_interval_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Clamp a requested rate into the configured range, never leaving the hard bounds
    pub fn clamp_rate(&self, rate: f64) -> f64 {
        let min = self.min_rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        let max = self.max_rate.clamp(min, MAX_PLAYBACK_RATE);
        rate.clamp(min, max)
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = match Self::load_config(&config_path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring unreadable configuration {}: {}", config_path.display(), e);
                EngineConfig::default()
            }
        };

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Manager bound to an explicit file instead of the per-user location
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut updated = self.config.clone();
        updater(&mut updated);
        updated.validate()?;
        self.config = updated;
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.update_config(|config| config.preferred_device = device)
    }

    pub fn set_audio_root(&mut self, root: Option<PathBuf>) -> Result<(), ConfigError> {
        self.update_config(|config| config.audio_root = root)
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join("stem-player");

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;
        config.validate()?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
