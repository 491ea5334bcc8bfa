// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! FluidSynth integration for software synthesis.
//!
//! Provides a renderer around FluidLite for SF2 soundfont playback.
//! Each player owns its own synth instance loaded from the shared bank file.

use std::path::Path;

use fluidlite::{IsSettings, Settings, Synth};
use tracing::debug;

use super::{AudioError, Renderer};

/// FluidLite renderer
pub struct FluidRenderer {
    /// FluidLite synth instance
    synth: Synth,
    /// Loaded soundfont ID
    soundfont_id: u32,
    /// Sample rate
    sample_rate: f64,
}

impl FluidRenderer {
    /// Create a synth at `sample_rate` with the soundfont at `path` loaded
    pub fn new(sample_rate: f64, path: &Path) -> Result<Self, AudioError> {
        let settings = Settings::new()
            .map_err(|e| AudioError::InitFailed(format!("FluidLite settings: {:?}", e)))?;

        // Configure settings
        if let Some(setting) = settings.num("synth.sample-rate") {
            setting.set(sample_rate);
        }
        if let Some(setting) = settings.num("synth.gain") {
            setting.set(0.5);
        }
        if let Some(setting) = settings.int("synth.polyphony") {
            setting.set(64);
        }
        if let Some(setting) = settings.int("synth.midi-channels") {
            setting.set(16);
        }

        let synth = Synth::new(settings)
            .map_err(|e| AudioError::InitFailed(format!("FluidLite synth: {:?}", e)))?;

        // Disable reverb and chorus for lower latency
        synth.set_reverb_on(false);
        synth.set_chorus_on(false);

        if !path.exists() {
            return Err(AudioError::SoundfontLoadFailed(format!(
                "Soundfont file not found: {}",
                path.display()
            )));
        }
        let soundfont_id = synth.sfload(path, true).map_err(|_| {
            AudioError::SoundfontLoadFailed(format!("Failed to load soundfont: {}", path.display()))
        })?;
        debug!("Loaded soundfont {} as {}", path.display(), soundfont_id);

        Ok(Self {
            synth,
            soundfont_id,
            sample_rate,
        })
    }

    /// Loaded soundfont ID
    pub fn soundfont_id(&self) -> u32 {
        self.soundfont_id
    }

    /// Get sample rate
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

impl Renderer for FluidRenderer {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        let _ = self.synth.note_on(channel as u32, note as u32, velocity as u32);
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        let _ = self.synth.note_off(channel as u32, note as u32);
    }

    fn control_change(&mut self, channel: u8, control: u8, value: u8) {
        let _ = self.synth.cc(channel as u32, control as u32, value as u32);
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        let _ = self.synth.program_change(channel as u32, program as u32);
    }

    fn pitch_bend(&mut self, channel: u8, value: i16) {
        // FluidLite expects 0-16383, center at 8192
        let bend_value = (value as i32 + 8192).clamp(0, 16383) as u32;
        let _ = self.synth.pitch_bend(channel as u32, bend_value);
    }

    fn reset(&mut self) {
        self.all_notes_off();
        for channel in 0..16 {
            // CC 121 = Reset All Controllers
            let _ = self.synth.cc(channel, 121, 0);
        }
    }

    fn render(&mut self, buffer: &mut [f32]) -> Result<(), AudioError> {
        self.synth
            .write(&mut *buffer)
            .map_err(|e| AudioError::RenderFailed(format!("FluidLite write: {:?}", e)))
    }
}
