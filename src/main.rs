use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use stem_player::audio::{DeviceManager, PlaybackEngine};
use stem_player::cli::{CliApp, Commands, ParseError, SessionCommand, StatusDisplay};
use stem_player::config::{ConfigManager, EngineConfig};
use stem_player::logging::{PlaybackLogger, LOG_LEVEL_ENV};
use stem_player::session::{EndAction, SessionOptions, TrackSession};
use stem_player::{PlayerError, Playlist, TrackEnded};

/// Options of the `play` subcommand after parsing
struct PlayOptions {
    playlist: PathBuf,
    track: usize,
    speed: Option<f64>,
    looping: bool,
    mute_guitar: bool,
    device: Option<String>,
    audio_root: Option<PathBuf>,
}

/// Interactive player: one session, its engine, and the channels feeding the prompt loop
struct PlayerApp {
    session: TrackSession,
    device: Option<String>,
    ended_rx: mpsc::UnboundedReceiver<TrackEnded>,
}

impl PlayerApp {
    fn new(options: &PlayOptions) -> Result<Self, PlayerError> {
        let mut config_manager = ConfigManager::new()?;

        // Flags given on the command line become the saved defaults
        if options.device.is_some() {
            config_manager.set_preferred_device(options.device.clone())?;
        }
        if options.audio_root.is_some() {
            config_manager.set_audio_root(options.audio_root.clone())?;
        }

        let mut config: EngineConfig = config_manager.get_config().clone();
        if config.audio_root.is_none() {
            config.audio_root = options.playlist.parent().map(Path::to_path_buf);
        }

        let playlist = Playlist::from_file(&options.playlist)?;
        info!("Opened playlist '{}' with {} tracks", playlist.display_title(), playlist.tracks.len());

        let session_options = SessionOptions {
            looping: options.looping,
            prefetch_next: config.prefetch_next,
        };
        let device = config.preferred_device.clone();
        let engine = PlaybackEngine::with_cpal(config);
        let session = TrackSession::new(playlist, engine, session_options)?;

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        session.engine().on_track_end(move |ended| {
            let _ = ended_tx.send(ended);
        });

        Ok(Self {
            session,
            device,
            ended_rx,
        })
    }

    /// Open the output and load the first track, paused
    async fn start(&mut self, options: &PlayOptions) -> Result<(), PlayerError> {
        let index = options.track.saturating_sub(1).min(self.session.len() - 1);
        if let Some(rate) = options.speed {
            let applied = self.session.engine().set_playback_rate(rate)?;
            if applied != rate {
                println!("Speed clamped to {}", StatusDisplay::format_rate(applied));
            }
        }
        if options.mute_guitar {
            let id = self.session.tracks()[index].id.clone();
            if let Err(e) = self.session.toggle_mute(Some(&id)) {
                warn!("--mute-guitar ignored: {}", e);
            }
        }

        self.session.select(index, false).await?;
        StatusDisplay::display_compact_status(&self.session);
        Ok(())
    }

    /// Execute a single interactive command; returns false when the user quits
    async fn execute_command(&mut self, command: SessionCommand) -> Result<bool, PlayerError> {
        let engine = self.session.engine().clone();

        match command {
            SessionCommand::Play => {
                if !engine.is_playing() {
                    self.session.toggle_play().await?;
                }
                println!("OK: {}", engine.snapshot().state_label());
            }
            SessionCommand::Pause => {
                engine.pause();
                println!("OK: Paused at {}", StatusDisplay::format_seconds(engine.current_time()));
            }
            SessionCommand::Toggle => {
                self.session.toggle_play().await?;
                println!("OK: {}", engine.snapshot().state_label());
            }
            SessionCommand::Stop => {
                engine.stop();
                println!("OK: Stopped");
            }
            SessionCommand::Next => {
                if self.session.next().await? {
                    StatusDisplay::display_compact_status(&self.session);
                } else {
                    println!("Already at the last track");
                }
            }
            SessionCommand::Prev => {
                if self.session.previous().await? {
                    StatusDisplay::display_compact_status(&self.session);
                } else {
                    println!("Already at the first track");
                }
            }
            SessionCommand::Select { index } => {
                let autoplay = engine.is_playing();
                self.session.select(index, autoplay).await?;
                StatusDisplay::display_compact_status(&self.session);
            }
            SessionCommand::Seek { position } => {
                engine.seek(position.as_secs_f64())?;
                println!("Seeked to: {}", StatusDisplay::format_seconds(engine.current_time()));
            }
            SessionCommand::Speed { rate } => {
                let applied = engine.set_playback_rate(rate)?;
                println!("OK: Speed {}", StatusDisplay::format_rate(applied));
            }
            SessionCommand::Mute { track_id } => {
                let muted = self.session.toggle_mute(track_id.as_deref())?;
                let id = track_id.unwrap_or_else(|| self.session.current_track().id.clone());
                println!("OK: Guitar {} for {}", if muted { "muted" } else { "on" }, id);
            }
            SessionCommand::Loop => {
                let looping = self.session.toggle_loop();
                println!("OK: Loop {}", if looping { "on" } else { "off" });
            }
            SessionCommand::Delete => {
                let removed = self.session.delete_current().await?;
                println!("OK: Removed {}", removed.name);
                StatusDisplay::display_compact_status(&self.session);
            }
            SessionCommand::Move { from, to } => {
                self.session.move_track(from, to).await?;
                StatusDisplay::display_track_list(&self.session);
            }
            SessionCommand::List => StatusDisplay::display_track_list(&self.session),
            SessionCommand::Status => {
                StatusDisplay::display_full_status(&self.session, self.device.as_deref());
            }
            SessionCommand::Quit => return Ok(false),
        }

        Ok(true)
    }

    async fn handle_track_end(&mut self, ended: TrackEnded) {
        match self.session.handle_track_end(ended).await {
            Ok(EndAction::Looped) => println!("\nLooping {}", self.session.current_track().name),
            Ok(EndAction::Advanced { .. }) => {
                println!();
                StatusDisplay::display_compact_status(&self.session);
            }
            Ok(EndAction::Finished) => println!("\nEnd of playlist"),
            Ok(EndAction::Ignored) => {}
            Err(e) => Self::report(&e.into()),
        }
    }

    fn report(error: &PlayerError) {
        match error.severity().log_level() {
            log::Level::Error => error!("{}", error),
            log::Level::Warn => warn!("{}", error),
            _ => info!("{}", error),
        }
        StatusDisplay::display_error(error);
    }

    /// Run interactive mode
    async fn run_interactive_mode(&mut self, poll_interval: Duration) -> Result<(), PlayerError> {
        println!("Stem Player v0.1.0 - {}", self.session.playlist().display_title());
        println!("Type 'help' for available commands, 'exit' or 'quit' to quit.");
        println!();

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_flag_clone = shutdown_flag.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!("\nReceived interrupt signal. Shutting down gracefully...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }) {
            warn!("Could not install Ctrl-C handler: {}", e);
        }

        let pump = self.session.engine().spawn_event_pump(poll_interval);

        // Blocking stdin reads live on their own thread
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut interval = tokio::time::interval(Duration::from_millis(100));
        let mut awaiting_input = false;

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                break;
            }

            if !awaiting_input {
                print!("> ");
                let _ = std::io::Write::flush(&mut std::io::stdout());
                awaiting_input = true;
            }

            tokio::select! {
                biased;

                Some(ended) = self.ended_rx.recv() => {
                    self.handle_track_end(ended).await;
                    awaiting_input = false;
                }

                line = rx.recv() => {
                    awaiting_input = false;
                    let Some(line) = line else {
                        println!();
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    match CliApp::parse_command(&line) {
                        Ok(command) => match self.execute_command(command).await {
                            Ok(true) => {}
                            Ok(false) => {
                                println!("Goodbye!");
                                break;
                            }
                            Err(e) => Self::report(&e),
                        },
                        Err(ParseError::HelpRequested) => CliApp::display_help(),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }

                _ = interval.tick() => {}
            }
        }

        self.shutdown();
        pump.abort();
        Ok(())
    }

    fn shutdown(&self) {
        println!("Shutting down...");
        self.session.engine().shutdown();
        println!("Shutdown complete.");
    }
}

fn list_devices() -> Result<(), PlayerError> {
    let manager = DeviceManager::new()?;
    StatusDisplay::display_devices(&manager.summaries());
    Ok(())
}

fn list_tracks(path: &Path) -> Result<(), PlayerError> {
    let playlist = Playlist::from_file(path)?;
    println!("{} ({} tracks):", playlist.display_title(), playlist.tracks.len());
    for (i, track) in playlist.tracks.iter().enumerate() {
        println!("{:>3}: {} ({}){}",
            i + 1,
            track.name,
            track.id,
            if track.has_muteable_guitar { " [guitar]" } else { "" }
        );
    }
    Ok(())
}

async fn run_player(options: PlayOptions) -> Result<(), PlayerError> {
    let mut app = PlayerApp::new(&options)?;
    let poll_interval = Duration::from_millis(app.session.engine().config().event_poll_interval_ms.max(1));

    if let Err(e) = app.start(&options).await {
        app.shutdown();
        return Err(e);
    }
    app.run_interactive_mode(poll_interval).await
}

#[tokio::main]
async fn main() {
    // Quiet by default so log lines do not break up the prompt
    if std::env::var(LOG_LEVEL_ENV).is_err() {
        std::env::set_var(LOG_LEVEL_ENV, "warn");
    }
    if let Err(e) = PlaybackLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = CliApp::parse();

    let result = match cli.command {
        Some(Commands::Devices) => list_devices(),
        Some(Commands::Tracks { playlist }) => list_tracks(&CliApp::expand_path(&playlist)),
        Some(Commands::Play { playlist, track, speed, looping, mute_guitar, device, audio_root }) => {
            match speed.as_deref().map(CliApp::parse_rate).transpose() {
                Ok(speed) => {
                    run_player(PlayOptions {
                        playlist: CliApp::expand_path(&playlist),
                        track,
                        speed,
                        looping,
                        mute_guitar,
                        device,
                        audio_root: audio_root.as_deref().map(CliApp::expand_path),
                    })
                    .await
                }
                Err(e) => Err(e.into()),
            }
        }
        None => {
            println!("Usage: stem-player play <playlist.toml> [--track N] [--speed RATE] [--loop] [--mute-guitar]");
            println!("       stem-player tracks <playlist.toml>");
            println!("       stem-player devices");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        StatusDisplay::display_simple_error(&e);
        std::process::exit(1);
    }
    info!("Application shutdown complete");
}
