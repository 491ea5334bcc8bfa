// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Player controls.
//!
//! Each control is a thin handle over its player. Which controls a player
//! offers depends on its locator: the MIDI device gets MIDI control, the
//! tone device gets tone and volume controls, media gets volume control,
//! and every player gets pan and metadata controls.

use tracing::debug;

use super::{Player, PlayerError, PlayerEvent, PlayerState, Result};
use crate::engine::Locator;
use crate::midi::{check_range, router, Metadata, BANK_RANGE, CHANNEL_RANGE, DATA_RANGE};
use crate::tone;

/// Highest legacy gain value
pub const MAX_GAIN: i32 = 255;

/// Kinds of control a player can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Volume,
    Pan,
    Tone,
    Midi,
    MetaData,
}

impl ControlKind {
    /// Control interface name
    pub fn name(&self) -> &'static str {
        match self {
            ControlKind::Volume => "VolumeControl",
            ControlKind::Pan => "PanControl",
            ControlKind::Tone => "ToneControl",
            ControlKind::Midi => "MIDIControl",
            ControlKind::MetaData => "MetaDataControl",
        }
    }

    /// Controls offered for `locator`
    pub fn for_locator(locator: &Locator) -> &'static [ControlKind] {
        match locator {
            Locator::MidiDevice => &[ControlKind::Midi, ControlKind::Pan, ControlKind::MetaData],
            Locator::ToneDevice => &[
                ControlKind::Tone,
                ControlKind::Volume,
                ControlKind::Pan,
                ControlKind::MetaData,
            ],
            _ => &[ControlKind::Volume, ControlKind::Pan, ControlKind::MetaData],
        }
    }
}

/// Convert a legacy 0-255 gain to a 0-100 level
pub fn gain_to_level(gain: i32) -> i32 {
    gain.clamp(0, MAX_GAIN) * 100 / MAX_GAIN
}

/// Convert a 0-100 level to a legacy 0-255 gain
pub fn level_to_gain(level: i32) -> i32 {
    level.clamp(0, 100) * MAX_GAIN / 100
}

/// Output level and mute
#[derive(Debug, Clone)]
pub struct VolumeControl {
    player: Player,
}

impl VolumeControl {
    pub(crate) fn new(player: Player) -> Self {
        Self { player }
    }

    /// Set the level, clamped to 0-100; returns the level set
    pub fn set_level(&self, level: i32) -> Result<i32> {
        let level = level.clamp(0, 100);
        let _call = self.player.lock_call();
        self.player.check_closed()?;
        let library = self.player.library();
        let handle = self.player.handle();
        if library.get_volume(handle) == level {
            return Ok(level);
        }
        let level = library.set_volume(handle, level)?;
        self.player.post(PlayerEvent::VolumeChanged {
            level: level as u8,
            muted: library.is_muted(handle),
        });
        Ok(level)
    }

    /// Current level (0-100), kept while muted
    pub fn level(&self) -> Result<i32> {
        self.player.check_closed()?;
        Ok(self.player.library().get_volume(self.player.handle()))
    }

    /// Mute or unmute
    pub fn set_mute(&self, mute: bool) -> Result<()> {
        let _call = self.player.lock_call();
        self.player.check_closed()?;
        if self.player.set_muted_flag(mute) == mute {
            return Ok(());
        }
        let library = self.player.library();
        let handle = self.player.handle();
        library.set_mute(handle, mute)?;
        self.player.post(PlayerEvent::VolumeChanged {
            level: library.get_volume(handle) as u8,
            muted: mute,
        });
        Ok(())
    }

    /// Check the mute flag
    pub fn is_muted(&self) -> Result<bool> {
        self.player.check_closed()?;
        Ok(self.player.library().is_muted(self.player.handle()))
    }

    /// Set the level from a legacy 0-255 gain; returns the gain set
    pub fn set_gain(&self, gain: i32) -> Result<i32> {
        self.set_level(gain_to_level(gain)).map(level_to_gain)
    }

    /// Current level as a legacy 0-255 gain
    pub fn gain(&self) -> Result<i32> {
        self.level().map(level_to_gain)
    }
}

/// Stereo position
#[derive(Debug, Clone)]
pub struct PanControl {
    player: Player,
}

impl PanControl {
    pub(crate) fn new(player: Player) -> Self {
        Self { player }
    }

    /// Set pan, clamped to -100 (left) .. 100 (right); returns the value set
    pub fn set_pan(&self, pan: i32) -> Result<i32> {
        let _call = self.player.lock_call();
        self.player.check_closed()?;
        Ok(self
            .player
            .library()
            .set_pan(self.player.handle(), pan.clamp(-100, 100))?)
    }

    /// Current pan
    pub fn pan(&self) -> Result<i32> {
        self.player.check_closed()?;
        Ok(self.player.library().get_pan(self.player.handle()))
    }
}

/// Sequence of the tone device
#[derive(Debug, Clone)]
pub struct ToneControl {
    player: Player,
}

impl ToneControl {
    pub(crate) fn new(player: Player) -> Self {
        Self { player }
    }

    /// Replace the tone sequence.
    ///
    /// Only allowed before the player is prefetched. Backends without native
    /// tone support receive the sequence as a Standard MIDI File.
    pub fn set_sequence(&self, sequence: &[u8]) -> Result<()> {
        let _call = self.player.lock_call();
        if self.player.check_closed()? >= PlayerState::Prefetched {
            return Err(PlayerError::State(
                "tone sequence cannot change once prefetched",
            ));
        }

        let library = self.player.library();
        let data = if library.has_tone_control() {
            sequence.to_vec()
        } else {
            let decoded = tone::decode(sequence)?;
            let config = self.player.tone_config();
            tone::to_midi(&decoded, config.channel, config.program)
        };
        library.set_data_source(self.player.handle(), &data)?;
        debug!(
            "Player {} tone sequence set ({} bytes)",
            self.player.handle(),
            data.len()
        );
        Ok(())
    }
}

/// Direct access to the MIDI device
#[derive(Debug, Clone)]
pub struct MidiControl {
    player: Player,
}

impl MidiControl {
    pub(crate) fn new(player: Player) -> Self {
        Self { player }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(self
            .player
            .library()
            .write_midi(self.player.handle(), data)?)
    }

    /// Bank queries are never supported
    pub fn is_bank_query_supported(&self) -> bool {
        false
    }

    /// Send one short message; system messages are accepted and dropped
    pub fn short_midi_event(&self, status: i32, data1: i32, data2: i32) -> Result<()> {
        let _call = self.player.lock_call();
        self.player.check_realized()?;
        if let Some(bytes) = router::short_event(status, data1, data2)? {
            self.write(&bytes)?;
        }
        Ok(())
    }

    /// Send `length` raw bytes from `offset`; returns the bytes accepted
    pub fn long_midi_event(&self, data: &[u8], offset: i32, length: i32) -> Result<usize> {
        let _call = self.player.lock_call();
        self.player.check_realized()?;
        let slice = router::long_event(data, offset, length)?;
        self.write(slice)
    }

    /// Select a program, with a bank select first unless `bank` is -1
    pub fn set_program(&self, channel: i32, bank: i32, program: i32) -> Result<()> {
        let _call = self.player.lock_call();
        self.player.check_realized()?;
        for message in router::program_change(channel, bank, program)? {
            self.write(&message.to_bytes())?;
        }
        Ok(())
    }

    /// Set channel volume (CC 7)
    pub fn set_channel_volume(&self, channel: i32, volume: i32) -> Result<()> {
        let _call = self.player.lock_call();
        self.player.check_realized()?;
        let message = router::channel_volume(channel, volume)?;
        self.write(&message.to_bytes())?;
        Ok(())
    }

    /// Channel volume is not tracked; always None
    pub fn channel_volume(&self, channel: i32) -> Result<Option<i32>> {
        self.player.check_realized()?;
        check_range("channel", channel, CHANNEL_RANGE)?;
        Ok(None)
    }

    /// Current bank and program of a channel
    pub fn program(&self, channel: i32) -> Result<(i32, i32)> {
        self.player.check_realized()?;
        check_range("channel", channel, CHANNEL_RANGE)?;
        Err(PlayerError::NotSupported("program query"))
    }

    /// Installed banks
    pub fn bank_list(&self, _custom: bool) -> Result<Vec<i32>> {
        self.player.check_realized()?;
        Err(PlayerError::NotSupported("bank query"))
    }

    /// Programs in a bank
    pub fn program_list(&self, bank: i32) -> Result<Vec<i32>> {
        self.player.check_realized()?;
        check_range("bank", bank, BANK_RANGE)?;
        Err(PlayerError::NotSupported("program list query"))
    }

    /// Name of a program
    pub fn program_name(&self, bank: i32, program: i32) -> Result<String> {
        self.player.check_realized()?;
        check_range("bank", bank, BANK_RANGE)?;
        check_range("program", program, DATA_RANGE)?;
        Err(PlayerError::NotSupported("program name query"))
    }

    /// Name of a key in a drum program
    pub fn key_name(&self, bank: i32, program: i32, key: i32) -> Result<String> {
        self.player.check_realized()?;
        check_range("bank", bank, BANK_RANGE)?;
        check_range("program", program, DATA_RANGE)?;
        check_range("key", key, DATA_RANGE)?;
        Err(PlayerError::NotSupported("key name query"))
    }
}

/// Text metadata of the media
#[derive(Debug, Clone)]
pub struct MetaDataControl {
    player: Player,
}

impl MetaDataControl {
    pub(crate) fn new(player: Player) -> Self {
        Self { player }
    }

    fn metadata(&self) -> Result<Metadata> {
        self.player.check_closed()?;
        Ok(self.player.library().metadata(self.player.handle()))
    }

    /// Keys with a value
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.metadata()?.into_keys().collect())
    }

    /// Value for `key`
    pub fn key_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.metadata()?.remove(key))
    }
}
