use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub mod status;
pub use status::StatusDisplay;

/// Rehearsal player for tracks with a muteable guitar stem
#[derive(Parser)]
#[command(name = "stem-player")]
#[command(about = "Rehearsal player that keeps a backing mix and a guitar stem in sync")]
#[command(version = "0.1.0")]
pub struct CliApp {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Open a playlist and start the interactive player
    Play {
        /// Playlist file (TOML)
        playlist: String,
        /// Track number to start from (1-based)
        #[arg(short, long, default_value_t = 1)]
        track: usize,
        /// Initial playback rate (e.g. "0.9", "90%")
        #[arg(short, long)]
        speed: Option<String>,
        /// Repeat the current track instead of advancing
        #[arg(long = "loop")]
        looping: bool,
        /// Start with the guitar stem of the first track muted
        #[arg(long)]
        mute_guitar: bool,
        /// Output device name, overriding the configured one
        #[arg(short, long)]
        device: Option<String>,
        /// Directory relative locators resolve against
        #[arg(long)]
        audio_root: Option<String>,
    },
    /// List the tracks of a playlist
    Tracks {
        /// Playlist file (TOML)
        playlist: String,
    },
    /// List available audio output devices
    Devices,
}

/// Commands accepted at the interactive prompt
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Play,
    Pause,
    /// Play when paused, pause when playing
    Toggle,
    Stop,
    Next,
    Prev,
    /// Zero-based track index
    Select { index: usize },
    Seek { position: Duration },
    Speed { rate: f64 },
    /// Mute toggle for a track id, or the current track
    Mute { track_id: Option<String> },
    Loop,
    Delete,
    /// Zero-based indices
    Move { from: usize, to: usize },
    List,
    Status,
    Quit,
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(rest)
            } else {
                PathBuf::from(path)
            }
        } else if path == "~" {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
        } else {
            PathBuf::from(path)
        }
    }

    /// Parse command from string (for interactive mode)
    pub fn parse_command(input: &str) -> Result<SessionCommand, ParseError> {
        let args: Vec<&str> = input.split_whitespace().collect();
        if args.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        match args[0] {
            "play" | "resume" => Ok(SessionCommand::Play),
            "pause" => Ok(SessionCommand::Pause),
            "toggle" | "p" => Ok(SessionCommand::Toggle),
            "stop" => Ok(SessionCommand::Stop),
            "next" | "n" => Ok(SessionCommand::Next),
            "prev" | "previous" => Ok(SessionCommand::Prev),
            "select" | "track" => {
                let arg = Self::required(&args, "select", "track number")?;
                let index = Self::parse_track_number(arg)?;
                Ok(SessionCommand::Select { index })
            }
            "seek" => {
                let arg = Self::required(&args, "seek", "position")?;
                Ok(SessionCommand::Seek {
                    position: Self::parse_time(arg)?,
                })
            }
            "speed" | "rate" => {
                let arg = Self::required(&args, "speed", "rate")?;
                Ok(SessionCommand::Speed {
                    rate: Self::parse_rate(arg)?,
                })
            }
            "mute" => Ok(SessionCommand::Mute {
                track_id: args.get(1).map(|id| id.to_string()),
            }),
            "loop" => Ok(SessionCommand::Loop),
            "delete" | "remove" => Ok(SessionCommand::Delete),
            "move" => {
                let from = Self::required(&args, "move", "from")?;
                let to = args.get(2).ok_or_else(|| ParseError::MissingArgument {
                    command: "move".to_string(),
                    argument: "to".to_string(),
                })?;
                Ok(SessionCommand::Move {
                    from: Self::parse_track_number(from)?,
                    to: Self::parse_track_number(to)?,
                })
            }
            "list" | "tracks" => Ok(SessionCommand::List),
            "status" => Ok(SessionCommand::Status),
            "quit" | "exit" => Ok(SessionCommand::Quit),
            "help" => Err(ParseError::HelpRequested),
            _ => Err(ParseError::UnknownCommand {
                command: args[0].to_string(),
            }),
        }
    }

    fn required<'a>(args: &[&'a str], command: &str, argument: &str) -> Result<&'a str, ParseError> {
        args.get(1).copied().ok_or_else(|| ParseError::MissingArgument {
            command: command.to_string(),
            argument: argument.to_string(),
        })
    }

    /// Parse a 1-based track number into a zero-based index
    pub fn parse_track_number(input: &str) -> Result<usize, ParseError> {
        match input.parse::<usize>() {
            Ok(number) if number >= 1 => Ok(number - 1),
            _ => Err(ParseError::InvalidArgument {
                argument: "track number".to_string(),
                value: input.to_string(),
                expected: "a number starting at 1".to_string(),
            }),
        }
    }

    /// Parse a playback rate: "0.9", "0.9x" or "90%".
    ///
    /// Range limits are left to the engine, which clamps.
    pub fn parse_rate(input: &str) -> Result<f64, ParseError> {
        let trimmed = input.trim();
        let parsed = if let Some(percent) = trimmed.strip_suffix('%') {
            percent.parse::<f64>().map(|p| p / 100.0)
        } else {
            trimmed.trim_end_matches(['x', 'X']).parse::<f64>()
        };

        match parsed {
            Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
            _ => Err(ParseError::InvalidArgument {
                argument: "rate".to_string(),
                value: input.to_string(),
                expected: "a positive number such as 0.9 or 90%".to_string(),
            }),
        }
    }

    /// Display help information
    pub fn display_help() {
        println!("Stem Player - Available Commands:");
        println!();
        println!("Playback Control:");
        println!("  play            - Start or resume the current track");
        println!("  pause           - Pause, keeping the position");
        println!("  toggle, p       - Switch between play and pause");
        println!("  stop            - Stop and rewind to the start");
        println!("  seek <time>     - Seek to position (e.g., '1:30', '90s')");
        println!("  speed <rate>    - Set playback rate between 0.8 and 1.2 (e.g., '0.9', '90%')");
        println!("  mute [track]    - Toggle the guitar stem of a track (default: current)");
        println!("  loop            - Toggle repeating the current track");
        println!();
        println!("Track List:");
        println!("  next            - Next track");
        println!("  prev            - Previous track");
        println!("  select <n>      - Jump to track number n");
        println!("  move <a> <b>    - Move track a to position b");
        println!("  delete          - Remove the current track from the list");
        println!("  list            - Show the track list");
        println!();
        println!("General:");
        println!("  status          - Show current player status");
        println!("  help            - Show this help message");
        println!("  exit, quit      - Exit the player");
    }

    /// Parse time string to Duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        // "1:30", "1:30.5", "90", "90s"
        let total_seconds = if trimmed.contains(':') {
            let parts: Vec<&str> = trimmed.split(':').collect();
            if parts.len() != 2 {
                return Err(invalid());
            }

            let minutes: u64 = parts[0].parse().map_err(|_| invalid())?;
            let seconds: f64 = parts[1].parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            minutes as f64 * 60.0 + seconds
        } else {
            let seconds: f64 = trimmed.trim_end_matches('s').parse().map_err(|_| invalid())?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(invalid());
            }
            seconds
        };

        Ok(Duration::from_secs_f64(total_seconds))
    }

    /// Format duration for display
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        format!("{:02}:{:02}", minutes, seconds)
    }

    /// Format engine seconds for display; negative or non-finite values show as zero
    pub fn format_seconds(seconds: f64) -> String {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        Self::format_duration(Duration::from_secs_f64(seconds))
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Missing argument for {command}: {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("Invalid argument {argument}: got '{value}', expected {expected}")]
    InvalidArgument {
        argument: String,
        value: String,
        expected: String,
    },

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },

    #[error("Help requested")]
    HelpRequested,
}
