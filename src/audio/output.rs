use crate::audio::device::{is_supported_format, DeviceManager};
use crate::audio::mixer::Mixer;
use crate::audio::{AudioOutput, Bus, OutputProvider, OutputState, StartedVoices, VoiceId, VoiceSpec};
use crate::error::AudioError;
use cpal::{SampleFormat, Stream, StreamConfig};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::{Arc, Mutex, MutexGuard, atomic::{AtomicU8, Ordering}};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

const STATE_RUNNING: u8 = 0;
const STATE_SUSPENDED: u8 = 1;
const STATE_CLOSED: u8 = 2;

fn decode_state(raw: u8) -> OutputState {
    match raw {
        STATE_RUNNING => OutputState::Running,
        STATE_SUSPENDED => OutputState::Suspended,
        _ => OutputState::Closed,
    }
}

/// Commands sent to the stream-owner thread
#[derive(Debug)]
enum StreamCommand {
    Resume(Sender<bool>),
    Shutdown,
}

/// Opens a [`CpalOutput`] on the configured device
#[derive(Debug, Clone, Default)]
pub struct CpalOutputProvider {
    pub preferred_device: Option<String>,
    pub buffer_frames: Option<u32>,
}

impl CpalOutputProvider {
    pub fn new(preferred_device: Option<String>, buffer_frames: Option<u32>) -> Self {
        Self {
            preferred_device,
            buffer_frames,
        }
    }
}

impl OutputProvider for CpalOutputProvider {
    fn open(&self) -> Result<Box<dyn AudioOutput>, AudioError> {
        let output = CpalOutput::open(self.preferred_device.clone(), self.buffer_frames)?;
        Ok(Box::new(output))
    }
}

/// cpal-backed output.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that only builds it, toggles it on command and drops it on shutdown.
/// Rendering happens in the cpal callback against the shared [`Mixer`].
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    state: Arc<AtomicU8>,
    sample_rate: u32,
    device_name: Option<String>,
    commands: Sender<StreamCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// Build and start the stream, reporting setup failures synchronously
    pub fn open(preferred_device: Option<String>, buffer_frames: Option<u32>) -> Result<Self, AudioError> {
        let (command_sender, command_receiver) = mpsc::channel::<StreamCommand>();
        let (ready_sender, ready_receiver) =
            mpsc::channel::<Result<(Arc<Mutex<Mixer>>, u32, Option<String>), AudioError>>();
        let state = Arc::new(AtomicU8::new(STATE_SUSPENDED));
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("stem-player-output".to_string())
            .spawn(move || {
                let (stream, mixer, sample_rate, device_name) =
                    match Self::build_stream(preferred_device.as_deref(), buffer_frames, &thread_state) {
                        Ok(parts) => parts,
                        Err(e) => {
                            thread_state.store(STATE_CLOSED, Ordering::SeqCst);
                            let _ = ready_sender.send(Err(e));
                            return;
                        }
                    };

                match stream.play() {
                    Ok(()) => thread_state.store(STATE_RUNNING, Ordering::SeqCst),
                    Err(e) => {
                        // Leave it suspended; the engine gets one resume attempt
                        log::warn!("Output stream did not start: {}", e);
                    }
                }
                let _ = ready_sender.send(Ok((mixer, sample_rate, device_name)));

                Self::command_loop(&stream, &command_receiver, &thread_state);

                let _ = stream.pause();
                thread_state.store(STATE_CLOSED, Ordering::SeqCst);
            })
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to create output thread: {}", e)))?;

        let (mixer, sample_rate, device_name) = match ready_receiver.recv() {
            Ok(result) => result?,
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::InitializationFailed("Output thread exited during setup".to_string()));
            }
        };

        log::info!(
            "Audio output ready on {} at {} Hz",
            device_name.as_deref().unwrap_or("default device"),
            sample_rate
        );

        Ok(Self {
            mixer,
            state,
            sample_rate,
            device_name,
            commands: command_sender,
            thread: Some(handle),
        })
    }

    fn build_stream(
        preferred_device: Option<&str>,
        buffer_frames: Option<u32>,
        state: &Arc<AtomicU8>,
    ) -> Result<(Stream, Arc<Mutex<Mixer>>, u32, Option<String>), AudioError> {
        let mut device_manager = DeviceManager::new()?;
        device_manager.select_device_with_fallback(preferred_device)?;

        let device = device_manager.current_device()
            .ok_or_else(|| AudioError::InitializationFailed("No device selected".to_string()))?
            .clone();
        let default_config = device_manager.current_config()?;
        let sample_format = default_config.sample_format();
        if !is_supported_format(sample_format) {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", sample_format),
            });
        }

        let mut config: StreamConfig = default_config.config();
        if let Some(frames) = buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0, config.channels)));

        let stream = match sample_format {
            SampleFormat::F32 => Self::create_stream::<f32>(&device, &config, &mixer, state),
            SampleFormat::I16 => Self::create_stream::<i16>(&device, &config, &mixer, state),
            SampleFormat::U16 => Self::create_stream::<u16>(&device, &config, &mixer, state),
            other => Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", other),
            }),
        }?;

        Ok((stream, mixer, config.sample_rate.0, device_manager.current_device_name()))
    }

    /// Create a typed output stream rendering from the mixer
    fn create_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mixer: &Arc<Mutex<Mixer>>,
        state: &Arc<AtomicU8>,
    ) -> Result<Stream, AudioError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        T: cpal::FromSample<f32>,
    {
        let mixer = Arc::clone(mixer);
        let error_state = Arc::clone(state);
        let mut scratch: Vec<f32> = Vec::new();

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                {
                    let mut mixer = mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    mixer.render(&mut scratch);
                }
                for (sample, value) in data.iter_mut().zip(scratch.iter()) {
                    *sample = cpal::Sample::from_sample(*value);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                let _ = error_state.compare_exchange(
                    STATE_RUNNING,
                    STATE_SUSPENDED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))
    }

    fn command_loop(stream: &Stream, commands: &Receiver<StreamCommand>, state: &Arc<AtomicU8>) {
        // Exits on Shutdown or when the owning CpalOutput is dropped
        while let Ok(command) = commands.recv() {
            match command {
                StreamCommand::Resume(reply) => {
                    let resumed = match stream.play() {
                        Ok(()) => {
                            state.store(STATE_RUNNING, Ordering::SeqCst);
                            true
                        }
                        Err(e) => {
                            log::warn!("Output resume failed: {}", e);
                            false
                        }
                    };
                    let _ = reply.send(resumed);
                }
                StreamCommand::Shutdown => break,
            }
        }
    }

    fn lock_mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    fn ensure_open(&self) -> Result<(), AudioError> {
        if self.state() == OutputState::Closed {
            Err(AudioError::OutputClosed)
        } else {
            Ok(())
        }
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.lock_mixer().now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> OutputState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    fn resume(&mut self) -> OutputState {
        if self.state() != OutputState::Suspended {
            return self.state();
        }
        let (reply_sender, reply_receiver) = mpsc::channel();
        if self.commands.send(StreamCommand::Resume(reply_sender)).is_err() {
            return OutputState::Closed;
        }
        match reply_receiver.recv_timeout(Duration::from_secs(2)) {
            Ok(_) => self.state(),
            Err(_) => {
                log::warn!("Output thread did not answer the resume request");
                self.state()
            }
        }
    }

    fn start_voices(&mut self, at: f64, voices: Vec<VoiceSpec>) -> Result<StartedVoices, AudioError> {
        self.ensure_open()?;
        self.lock_mixer().start_voices(at, voices)
    }

    fn stop_voice(&mut self, id: VoiceId) -> Result<(), AudioError> {
        self.lock_mixer().stop_voice(id)
    }

    fn set_voice_rate(&mut self, ids: &[VoiceId], rate: f64, at: f64) -> Result<f64, AudioError> {
        self.lock_mixer().set_voice_rate(ids, rate, at)
    }

    fn set_bus_gain(&mut self, bus: Bus, gain: f32, at: f64) {
        self.lock_mixer().set_bus_gain(bus, gain, at);
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        self.lock_mixer().drain_ended()
    }

    fn close(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Output thread panicked during shutdown");
            }
        }
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.lock_mixer().clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.close();
        }
    }
}
