// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Audio output threads.
//!
//! Every output runs on its own thread. A device output owns a cpal stream
//! (streams are not `Send`, so the stream is built and dropped on that
//! thread); a null output pulls blocks at real-time pace and discards them.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{AudioError, RENDER_CHANNELS};

/// Where rendered audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Default output device
    #[default]
    Device,
    /// Rendered and discarded at real-time pace
    Null,
}

/// Audio output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Buffer size in frames
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    /// Number of output channels
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Output sink
    #[serde(default)]
    pub output: OutputKind,
}

fn default_sample_rate() -> u32 {
    44100
}
fn default_buffer_size() -> u32 {
    512
}
fn default_channels() -> u16 {
    2
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            buffer_size: default_buffer_size(),
            channels: default_channels(),
            output: OutputKind::default(),
        }
    }
}

impl AudioConfig {
    /// Calculate latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        (self.buffer_size as f64 / self.sample_rate as f64) * 1000.0
    }
}

enum Command {
    Play,
    Pause,
    Shutdown,
}

/// A running output thread
pub struct AudioOutput {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    config: AudioConfig,
}

impl AudioOutput {
    /// Spawn an output thread, initially paused.
    ///
    /// `callback` fills interleaved stereo frames. For device outputs the
    /// stream is built before this returns, so device errors surface here.
    pub fn new<F>(config: AudioConfig, name: &str, callback: F) -> Result<Self, AudioError>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let (commands, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let thread_config = config.clone();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match thread_config.output {
                OutputKind::Device => run_device(thread_config, receiver, ready_tx, callback),
                OutputKind::Null => {
                    let _ = ready_tx.send(Ok(()));
                    run_null(thread_config, receiver, callback);
                }
            })
            .map_err(|e| AudioError::InitFailed(format!("Failed to spawn output thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::InitFailed("Output thread exited during setup".to_string()))
            .and_then(|result| result);
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Self {
            commands,
            thread_id: thread.thread().id(),
            thread: Some(thread),
            config,
        })
    }

    /// Start pulling audio
    pub fn play(&self) -> Result<(), AudioError> {
        self.send(Command::Play)
    }

    /// Stop pulling audio
    pub fn pause(&self) -> Result<(), AudioError> {
        self.send(Command::Pause)
    }

    fn send(&self, command: Command) -> Result<(), AudioError> {
        self.commands
            .send(command)
            .map_err(|_| AudioError::StreamFailed("Output thread has exited".to_string()))
    }

    /// Get current configuration
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            // The last owner may be released from inside the render callback
            if thread::current().id() != self.thread_id {
                let _ = thread.join();
            }
        }
    }
}

fn run_device<F>(
    config: AudioConfig,
    commands: Receiver<Command>,
    ready: mpsc::SyncSender<Result<(), AudioError>>,
    mut callback: F,
) where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(AudioError::NoDevice));
        return;
    };

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
    };

    let channels = config.channels.max(1) as usize;
    let mut scratch = Vec::new();

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if channels == RENDER_CHANNELS {
                data.fill(0.0);
                callback(data);
                return;
            }
            // Render stereo, then map onto the device layout
            let frames = data.len() / channels;
            scratch.clear();
            scratch.resize(frames * RENDER_CHANNELS, 0.0);
            callback(&mut scratch);
            for (frame, out) in data.chunks_mut(channels).enumerate() {
                let left = scratch[frame * 2];
                let right = scratch[frame * 2 + 1];
                if channels == 1 {
                    out[0] = (left + right) * 0.5;
                } else {
                    out.fill(0.0);
                    out[0] = left;
                    out[1] = right;
                }
            }
        },
        move |err| {
            error!("Audio stream error: {}", err);
        },
        None, // No timeout
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(AudioError::StreamFailed(format!(
                "Failed to build stream: {}",
                e
            ))));
            return;
        }
    };
    // Streams may start running as soon as they are built
    let _ = stream.pause();
    let _ = ready.send(Ok(()));
    debug!("Device output ready ({} Hz, {} frames)", config.sample_rate, config.buffer_size);

    while let Ok(command) = commands.recv() {
        let result = match command {
            Command::Play => stream.play().map_err(|e| e.to_string()),
            Command::Pause => stream.pause().map_err(|e| e.to_string()),
            Command::Shutdown => break,
        };
        if let Err(e) = result {
            warn!("Audio stream control failed: {}", e);
        }
    }
}

fn run_null<F>(config: AudioConfig, commands: Receiver<Command>, mut callback: F)
where
    F: FnMut(&mut [f32]),
{
    let frames = config.buffer_size.max(1) as usize;
    let period = Duration::from_secs_f64(frames as f64 / config.sample_rate.max(1) as f64);
    let mut buffer = vec![0.0f32; frames * RENDER_CHANNELS];
    let mut playing = false;
    let mut deadline = Instant::now();

    loop {
        let command = if playing {
            let wait = deadline.saturating_duration_since(Instant::now());
            match commands.recv_timeout(wait) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        };

        match command {
            Some(Command::Play) => {
                if !playing {
                    playing = true;
                    deadline = Instant::now();
                }
            }
            Some(Command::Pause) => playing = false,
            Some(Command::Shutdown) => break,
            None => {
                buffer.fill(0.0);
                callback(&mut buffer);
                deadline += period;
            }
        }
    }
}

/// List available audio output devices
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Get default device name
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
