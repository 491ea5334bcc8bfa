// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Configuration for the synthesis engine.
//!
//! Settings are read once at startup from YAML: the sound bank used by the
//! SoundFont backend, the order in which backends are tried, audio output
//! parameters, and player policies.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;

/// Root engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// SoundFont used by the FluidLite backend
    #[serde(default)]
    pub sound_bank: Option<PathBuf>,
    /// Backends in the order they are tried
    #[serde(default = "default_backends")]
    pub backends: Vec<Backend>,
    /// Audio output settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Tone playback settings
    #[serde(default)]
    pub tone: ToneConfig,
    /// Which negative loop counts mean "loop forever"
    #[serde(default)]
    pub looping: LoopPolicy,
}

fn default_backends() -> Vec<Backend> {
    vec![Backend::Fluid, Backend::Wave]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sound_bank: None,
            backends: default_backends(),
            audio: AudioConfig::default(),
            tone: ToneConfig::default(),
            looping: LoopPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("At least one backend must be configured");
        }
        if !(8000..=192_000).contains(&self.audio.sample_rate) {
            bail!("Sample rate {} is out of range", self.audio.sample_rate);
        }
        if !(64..=8192).contains(&self.audio.buffer_size) {
            bail!("Buffer size {} is out of range", self.audio.buffer_size);
        }
        if self.audio.channels == 0 {
            bail!("Audio output needs at least one channel");
        }
        if self.tone.channel > 15 {
            bail!("Tone channel {} is out of range (0-15)", self.tone.channel);
        }
        if self.tone.program > 127 {
            bail!("Tone program {} is out of range (0-127)", self.tone.program);
        }
        Ok(())
    }
}

/// Synthesis backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// FluidLite SoundFont synthesis (needs a sound bank)
    Fluid,
    /// Built-in waveform synthesis
    Wave,
}

impl Backend {
    /// Backend name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Fluid => "fluid",
            Backend::Wave => "wave",
        }
    }
}

/// Tone playback settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToneConfig {
    /// MIDI channel for tone sequences (0-15)
    #[serde(default)]
    pub channel: u8,
    /// GM program for tone sequences
    #[serde(default)]
    pub program: u8,
}

/// Loop count sentinel convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopPolicy {
    /// Every negative count loops forever
    #[default]
    AnyNegative,
    /// Only -1 loops forever; other negative counts are rejected
    MinusOne,
}

impl LoopPolicy {
    /// Check whether `count` is an accepted "loop forever" value.
    ///
    /// Returns None for positive counts.
    pub fn infinite(&self, count: i32) -> Option<bool> {
        if count >= 0 {
            return None;
        }
        Some(match self {
            LoopPolicy::AnyNegative => true,
            LoopPolicy::MinusOne => count == -1,
        })
    }
}
