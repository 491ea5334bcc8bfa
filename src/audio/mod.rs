// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Audio rendering and output.
//!
//! This module provides:
//! - The `Renderer` trait implemented by each synthesis backend
//! - FluidLite SoundFont synthesis
//! - A built-in waveform synthesizer that needs no sound bank
//! - Output threads driving a cpal device or a paced null sink
//! - Gain and pan laws shared by every player

pub mod fluidsynth;
pub mod output;
pub mod wave;

pub use fluidsynth::FluidRenderer;
pub use output::{default_device_name, list_devices, AudioConfig, AudioOutput, OutputKind};
pub use wave::WaveRenderer;

use thiserror::Error;

use crate::midi::{messages, ChannelMessage};

/// Output is always rendered as interleaved stereo
pub const RENDER_CHANNELS: usize = 2;

/// A synthesis backend driven by channel messages.
///
/// Renderers are owned by a single pipeline and only ever touched while
/// holding that pipeline's lock.
pub trait Renderer: Send {
    /// Send note on
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8);

    /// Send note off
    fn note_off(&mut self, channel: u8, note: u8);

    /// Send control change
    fn control_change(&mut self, channel: u8, control: u8, value: u8);

    /// Send program change
    fn program_change(&mut self, channel: u8, program: u8);

    /// Send pitch bend (-8192 to 8191)
    fn pitch_bend(&mut self, channel: u8, value: i16);

    /// Send channel pressure
    fn channel_pressure(&mut self, _channel: u8, _pressure: u8) {}

    /// Silence all voices and reset controllers
    fn reset(&mut self);

    /// Render interleaved stereo frames into `buffer`
    fn render(&mut self, buffer: &mut [f32]) -> Result<(), AudioError>;

    /// Route a classified message to the matching call
    fn dispatch(&mut self, message: &ChannelMessage) {
        match *message {
            ChannelMessage::NoteOn { channel, note, velocity } => {
                self.note_on(channel, note, velocity)
            }
            ChannelMessage::NoteOff { channel, note, .. } => self.note_off(channel, note),
            ChannelMessage::ControlChange { channel, controller, value } => {
                self.control_change(channel, controller, value)
            }
            ChannelMessage::ProgramChange { channel, program } => {
                self.program_change(channel, program)
            }
            ChannelMessage::PitchBend { channel, value } => self.pitch_bend(channel, value),
            ChannelMessage::ChannelAftertouch { channel, pressure } => {
                self.channel_pressure(channel, pressure)
            }
            ChannelMessage::PolyAftertouch { .. } => {}
        }
    }

    /// All notes off on all channels
    fn all_notes_off(&mut self) {
        for channel in 0..16 {
            self.control_change(channel, messages::CC_ALL_NOTES_OFF, 0);
            self.control_change(channel, messages::CC_ALL_SOUND_OFF, 0);
        }
    }
}

/// Perceptual gain for a volume level (0-100)
pub fn compute_gain(level: u8) -> f32 {
    let level = level.min(100) as f32;
    1.0 - (101.0 - level).ln() / 101f32.ln()
}

/// Left/right gains for a pan position (-100 to 100, 0 = center)
pub fn pan_gains(pan: i32) -> (f32, f32) {
    let pan = pan.clamp(-100, 100) as f32 / 100.0;
    if pan < 0.0 {
        (1.0, 1.0 + pan)
    } else {
        (1.0 - pan, 1.0)
    }
}

/// Audio error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("Audio initialization failed: {0}")]
    InitFailed(String),
    #[error("Soundfont load failed: {0}")]
    SoundfontLoadFailed(String),
    #[error("Audio stream failed: {0}")]
    StreamFailed(String),
    #[error("No audio device available")]
    NoDevice,
    #[error("Render failed: {0}")]
    RenderFailed(String),
}
