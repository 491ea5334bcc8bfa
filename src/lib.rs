// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! mmsynth - software MIDI and tone sequence playback engine.
//!
//! Media is played through `Player`s created by a `Manager`. Each player
//! drives an engine-side pipeline that renders MIDI or tone sequences
//! through FluidLite or the built-in waveform synthesizer.

pub mod audio;
pub mod config;
pub mod engine;
pub mod manager;
pub mod midi;
pub mod player;
pub mod tone;

pub use config::EngineConfig;
pub use engine::{ContentType, Locator, SynthLibrary};
pub use manager::{Manager, ManagerError};
pub use player::{Player, PlayerError, PlayerEvent, PlayerListener, PlayerState};
