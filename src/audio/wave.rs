// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Built-in waveform synthesizer.
//!
//! A small polyphonic oscillator bank used when no sound bank is available.
//! Programs select one of four waveforms; channel 10 plays decaying noise
//! bursts for percussion.

use std::f32::consts::{PI, TAU};

use super::{AudioError, Renderer};
use crate::midi::{messages, PERCUSSION_CHANNEL};
use crate::tone::note_to_frequency;

/// Maximum simultaneous voices
const MAX_VOICES: usize = 32;
/// Attack time in seconds
const ATTACK: f32 = 0.005;
/// Release time in seconds
const RELEASE: f32 = 0.03;
/// Percussion decay time in seconds
const DRUM_DECAY: f32 = 0.12;
/// Headroom so a few full-velocity voices do not clip
const VOICE_GAIN: f32 = 0.25;

/// Oscillator shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    Noise,
}

impl Waveform {
    /// Waveform for a GM program number
    pub fn for_program(program: u8) -> Self {
        match (program / 8) % 4 {
            0 => Waveform::Sine,
            1 => Waveform::Triangle,
            2 => Waveform::Square,
            _ => Waveform::Sawtooth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Attack,
    Sustain,
    Release,
}

#[derive(Debug, Clone)]
struct Voice {
    channel: u8,
    note: u8,
    waveform: Waveform,
    frequency: f32,
    phase: f32,
    velocity: f32,
    envelope: f32,
    stage: Stage,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    program: u8,
    volume: f32,
    pan: f32,
    bend: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 100.0 / 127.0,
            pan: 0.0,
            bend: 0.0,
        }
    }
}

/// Polyphonic oscillator renderer
pub struct WaveRenderer {
    sample_rate: f32,
    voices: Vec<Voice>,
    channels: [ChannelState; 16],
    noise: u32,
}

impl WaveRenderer {
    /// Create a renderer at `sample_rate`
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate: sample_rate.max(1.0),
            voices: Vec::with_capacity(MAX_VOICES),
            channels: [ChannelState::default(); 16],
            noise: 0x1234_5678,
        }
    }

    /// Number of sounding voices
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Program currently selected on `channel`
    pub fn program(&self, channel: u8) -> u8 {
        self.channels[(channel & 0x0F) as usize].program
    }

    fn next_noise(&mut self) -> f32 {
        // xorshift32
        let mut x = self.noise;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

impl Renderer for WaveRenderer {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        let channel = channel & 0x0F;
        if velocity == 0 {
            self.note_off(channel, note);
            return;
        }

        // Retrigger an existing voice, else steal the oldest
        self.voices.retain(|v| !(v.channel == channel && v.note == note));
        if self.voices.len() >= MAX_VOICES {
            self.voices.remove(0);
        }

        let waveform = if channel == PERCUSSION_CHANNEL {
            Waveform::Noise
        } else {
            Waveform::for_program(self.channels[channel as usize].program)
        };

        self.voices.push(Voice {
            channel,
            note,
            waveform,
            frequency: note_to_frequency(note) as f32,
            phase: 0.0,
            velocity: velocity as f32 / 127.0,
            envelope: 0.0,
            stage: Stage::Attack,
        });
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        let channel = channel & 0x0F;
        for voice in &mut self.voices {
            // Percussion voices always run out their decay
            if voice.channel == channel && voice.note == note && voice.waveform != Waveform::Noise {
                voice.stage = Stage::Release;
            }
        }
    }

    fn control_change(&mut self, channel: u8, control: u8, value: u8) {
        let channel = channel & 0x0F;
        let state = &mut self.channels[channel as usize];
        match control {
            messages::CC_CHANNEL_VOLUME => state.volume = value as f32 / 127.0,
            messages::CC_PAN => state.pan = (value as f32 - 64.0) / 64.0,
            messages::CC_RESET_ALL_CONTROLLERS => {
                let program = state.program;
                *state = ChannelState {
                    program,
                    ..ChannelState::default()
                };
            }
            messages::CC_ALL_SOUND_OFF => self.voices.retain(|v| v.channel != channel),
            messages::CC_ALL_NOTES_OFF => {
                for voice in &mut self.voices {
                    if voice.channel == channel {
                        voice.stage = Stage::Release;
                    }
                }
            }
            _ => {}
        }
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        self.channels[(channel & 0x0F) as usize].program = program & 0x7F;
    }

    fn pitch_bend(&mut self, channel: u8, value: i16) {
        // +/- 2 semitones
        self.channels[(channel & 0x0F) as usize].bend = value as f32 / 8192.0 * 2.0;
    }

    fn reset(&mut self) {
        self.voices.clear();
        self.channels = [ChannelState::default(); 16];
    }

    fn render(&mut self, buffer: &mut [f32]) -> Result<(), AudioError> {
        let attack_step = 1.0 / (ATTACK * self.sample_rate);
        let release_step = 1.0 / (RELEASE * self.sample_rate);
        let drum_step = 1.0 / (DRUM_DECAY * self.sample_rate);

        for frame in buffer.chunks_mut(2) {
            let mut left = 0.0f32;
            let mut right = 0.0f32;

            for i in 0..self.voices.len() {
                let (channel, phase, waveform) = {
                    let voice = &self.voices[i];
                    (voice.channel, voice.phase, voice.waveform)
                };
                let state = self.channels[channel as usize];

                let sample = match waveform {
                    Waveform::Sine => phase.sin(),
                    Waveform::Square => {
                        if phase < PI {
                            0.6
                        } else {
                            -0.6
                        }
                    }
                    Waveform::Triangle => 1.0 - 2.0 * (phase / PI - 1.0).abs(),
                    Waveform::Sawtooth => 0.6 * (phase / PI - 1.0),
                    Waveform::Noise => self.next_noise(),
                };

                let voice = &mut self.voices[i];
                match voice.stage {
                    Stage::Attack if waveform == Waveform::Noise => {
                        voice.envelope = 1.0;
                        voice.stage = Stage::Release;
                    }
                    Stage::Attack => {
                        voice.envelope += attack_step;
                        if voice.envelope >= 1.0 {
                            voice.envelope = 1.0;
                            voice.stage = Stage::Sustain;
                        }
                    }
                    Stage::Sustain => {}
                    Stage::Release if waveform == Waveform::Noise => voice.envelope -= drum_step,
                    Stage::Release => voice.envelope -= release_step,
                }

                let frequency = voice.frequency * 2f32.powf(state.bend / 12.0);
                voice.phase += frequency / self.sample_rate * TAU;
                if voice.phase >= TAU {
                    voice.phase -= TAU;
                }

                let value =
                    sample * voice.envelope.max(0.0) * voice.velocity * state.volume * VOICE_GAIN;
                left += value * (1.0 - state.pan.max(0.0));
                right += value * (1.0 + state.pan.min(0.0));
            }

            self.voices.retain(|v| v.envelope > 0.0 || v.stage != Stage::Release);

            frame[0] = left;
            if frame.len() > 1 {
                frame[1] = right;
            }
        }
        Ok(())
    }
}
