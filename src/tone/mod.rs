// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Monophonic tone sequences.
//!
//! This module provides:
//! - The byte-level command set of the compact tone format
//! - A decoder that fully materializes a sequence before playback
//! - Expansion of blocks and repeats into absolute-time notes
//! - Conversion to a Standard MIDI File for synthesizers without tone support

pub mod decoder;
pub mod smf;

pub use decoder::decode;
pub use smf::to_midi;

use std::collections::HashMap;

use thiserror::Error;

/// Tone format command bytes (signed)
pub mod commands {
    pub const VERSION: i8 = -2;
    pub const TEMPO: i8 = -3;
    pub const RESOLUTION: i8 = -4;
    pub const BLOCK_START: i8 = -5;
    pub const BLOCK_END: i8 = -6;
    pub const PLAY_BLOCK: i8 = -7;
    pub const SET_VOLUME: i8 = -8;
    pub const REPEAT: i8 = -9;
    pub const SILENCE: i8 = -1;

    /// Middle C
    pub const C4: i8 = 60;
}

/// Only supported format version
pub const TONE_VERSION: u8 = 1;
/// Tempo modifier used when a sequence has no body (bpm = 4 * tempo)
pub const DEFAULT_TEMPO: u8 = 30;
/// Default resolution in units per whole note
pub const DEFAULT_RESOLUTION: u8 = 64;
/// Tempo modifier range
pub const TEMPO_RANGE: std::ops::RangeInclusive<u8> = 5..=127;
/// Resolution range
pub const RESOLUTION_RANGE: std::ops::RangeInclusive<u8> = 1..=127;
/// Repeat count range
pub const REPEAT_RANGE: std::ops::RangeInclusive<u8> = 2..=127;
/// Maximum tone volume
pub const MAX_VOLUME: u8 = 100;
/// Pitch value reserved for silence
pub const SILENCE_PITCH: u8 = 127;
/// Upper bound on notes produced by expanding blocks and repeats
pub const MAX_EXPANDED_NOTES: usize = 32768;

/// Tone format errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("tone sequence truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("tone sequence is missing its {0} header")]
    MissingHeader(&'static str),
    #[error("header command {command} at byte {offset} is not allowed here")]
    UnexpectedHeader { command: i8, offset: usize },
    #[error("unknown tone command {command} at byte {offset}")]
    UnknownCommand { command: i8, offset: usize },
    #[error("invalid {what} value {value} at byte {offset}")]
    InvalidValue {
        what: &'static str,
        value: i8,
        offset: usize,
    },
    #[error("unbalanced block {id} at byte {offset}")]
    UnbalancedBlock { id: u8, offset: usize },
    #[error("block {id} played at byte {offset} is not defined")]
    UndefinedBlock { id: u8, offset: usize },
    #[error("repeat at byte {offset} is not followed by a tone")]
    RepeatWithoutTone { offset: usize },
    #[error("tone sequence expands to more than 32768 notes")]
    SequenceTooLong,
}

/// A decoded tone event with durations already resolved to milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneEvent {
    Note { pitch: u8, duration_ms: u32 },
    Silence { duration_ms: u32 },
    BlockStart(u8),
    BlockEnd(u8),
    PlayBlock(u8),
    /// Volume 0-100
    SetVolume(u8),
    /// Applies to the following note or silence
    Repeat(u8),
    SequenceEnd,
}

/// A fully decoded tone sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneSequence {
    /// Format version
    pub version: u8,
    /// Tempo modifier (bpm / 4)
    pub tempo: u8,
    /// Units per whole note
    pub resolution: u8,
    /// Events in stream order, terminated by `SequenceEnd`
    pub events: Vec<ToneEvent>,
}

/// A note (or rest) placed on the absolute timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneNote {
    /// Start time in milliseconds
    pub start_ms: u64,
    /// Duration in milliseconds
    pub duration_ms: u32,
    /// MIDI pitch, or None for silence
    pub pitch: Option<u8>,
    /// Volume 0-100
    pub volume: u8,
}

impl ToneNote {
    /// End time in milliseconds
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms as u64
    }
}

impl ToneSequence {
    /// Tempo in beats per minute
    pub fn bpm(&self) -> u32 {
        self.tempo as u32 * 4
    }

    /// Resolve a duration in tone units to milliseconds
    pub fn units_to_ms(&self, units: u8) -> u32 {
        units_to_ms(units, self.tempo, self.resolution)
    }

    /// Flatten blocks and repeats into absolute-time notes.
    ///
    /// Block definitions are silent; only `PlayBlock` renders their content.
    pub fn expand(&self) -> Vec<ToneNote> {
        let mut player = Expander {
            events: &self.events,
            blocks: HashMap::new(),
            notes: Vec::new(),
            time_ms: 0,
            volume: MAX_VOLUME,
        };
        player.play(0, self.events.len());
        player.notes
    }

    /// Total playing time in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.expand().last().map(|n| n.end_ms()).unwrap_or(0)
    }
}

/// Duration in milliseconds of `units` at the given tempo modifier and resolution
pub fn units_to_ms(units: u8, tempo: u8, resolution: u8) -> u32 {
    let divisor = resolution.max(1) as u32 * tempo.max(1) as u32;
    units as u32 * 60_000 / divisor
}

/// Nearest equal-tempered MIDI note for a frequency in Hz
pub fn frequency_to_note(hz: f64) -> u8 {
    if hz <= 0.0 || !hz.is_finite() {
        return 0;
    }
    let note = 69.0 + 12.0 * (hz / 440.0).log2();
    note.round().clamp(0.0, 127.0) as u8
}

/// Frequency in Hz of a MIDI note
pub fn note_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

struct Expander<'a> {
    events: &'a [ToneEvent],
    blocks: HashMap<u8, (usize, usize)>,
    notes: Vec<ToneNote>,
    time_ms: u64,
    volume: u8,
}

impl Expander<'_> {
    fn play(&mut self, start: usize, end: usize) {
        let mut repeat = 1u8;
        let mut i = start;
        while i < end {
            match self.events[i] {
                ToneEvent::BlockStart(id) => {
                    i = self.define(id, i);
                    continue;
                }
                ToneEvent::PlayBlock(id) => {
                    if let Some(&(from, to)) = self.blocks.get(&id) {
                        self.play(from, to);
                    }
                }
                ToneEvent::SetVolume(level) => self.volume = level.min(MAX_VOLUME),
                ToneEvent::Repeat(count) => repeat = count,
                ToneEvent::Note { pitch, duration_ms } => {
                    self.push(Some(pitch), duration_ms, repeat);
                    repeat = 1;
                }
                ToneEvent::Silence { duration_ms } => {
                    self.push(None, duration_ms, repeat);
                    repeat = 1;
                }
                ToneEvent::BlockEnd(_) => {}
                ToneEvent::SequenceEnd => break,
            }
            i += 1;
        }
    }

    /// Record the block starting at `start` (and any nested definitions),
    /// returning the index just past its end marker.
    fn define(&mut self, id: u8, start: usize) -> usize {
        let mut i = start + 1;
        while i < self.events.len() {
            match self.events[i] {
                ToneEvent::BlockStart(inner) => {
                    i = self.define(inner, i);
                    continue;
                }
                ToneEvent::BlockEnd(end_id) if end_id == id => {
                    self.blocks.insert(id, (start + 1, i));
                    return i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        i
    }

    fn push(&mut self, pitch: Option<u8>, duration_ms: u32, count: u8) {
        for _ in 0..count {
            if self.notes.len() >= MAX_EXPANDED_NOTES {
                return;
            }
            self.notes.push(ToneNote {
                start_ms: self.time_ms,
                duration_ms,
                pitch,
                volume: self.volume,
            });
            self.time_ms += duration_ms as u64;
        }
    }
}
