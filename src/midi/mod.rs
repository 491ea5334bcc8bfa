// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI message layer.
//!
//! This module provides:
//! - Classified channel messages and their wire encoding
//! - A running-status parser for raw byte runs written to a MIDI device
//! - Range validation shared by the router and the MIDI control surface
//! - Timelines built from Standard MIDI Files or tone sequences

pub mod router;
pub mod timeline;

use std::ops::RangeInclusive;

use thiserror::Error;

pub use timeline::{Metadata, TimedMessage, Timeline, TimelineError};

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    // System Common Messages
    pub const SYSEX_START: u8 = 0xF0;
    pub const TIME_CODE: u8 = 0xF1;
    pub const SONG_POSITION: u8 = 0xF2;
    pub const SONG_SELECT: u8 = 0xF3;
    pub const SYSEX_END: u8 = 0xF7;

    // Controllers
    pub const CC_BANK_SELECT_MSB: u8 = 0x00;
    pub const CC_CHANNEL_VOLUME: u8 = 0x07;
    pub const CC_PAN: u8 = 0x0A;
    pub const CC_BANK_SELECT_LSB: u8 = 0x20;
    pub const CC_ALL_SOUND_OFF: u8 = 0x78;
    pub const CC_RESET_ALL_CONTROLLERS: u8 = 0x79;
    pub const CC_ALL_NOTES_OFF: u8 = 0x7B;
}

/// Channel range
pub const CHANNEL_RANGE: RangeInclusive<i32> = 0..=15;
/// Data byte range (key, velocity, program, controller values)
pub const DATA_RANGE: RangeInclusive<i32> = 0..=127;
/// Bank range (14 bits)
pub const BANK_RANGE: RangeInclusive<i32> = 0..=16383;

/// Percussion channel (GM channel 10)
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Protocol-level argument errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("{name} {value} is out of range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("offset {offset} and length {length} exceed a buffer of {size} bytes")]
    OutOfBounds {
        offset: i64,
        length: i64,
        size: usize,
    },
}

/// Check `value` against `range`
pub fn check_range(
    name: &'static str,
    value: i32,
    range: RangeInclusive<i32>,
) -> Result<i32, RangeError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(RangeError::OutOfRange {
            name,
            value: value as i64,
            min: *range.start() as i64,
            max: *range.end() as i64,
        })
    }
}

/// Classified MIDI channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Poly Aftertouch: channel (0-15), note (0-127), pressure (0-127)
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    /// Control Change: channel (0-15), controller (0-127), value (0-127)
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },
    /// Channel Aftertouch: channel (0-15), pressure (0-127)
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// Pitch Bend: channel (0-15), value (-8192 to 8191)
    PitchBend { channel: u8, value: i16 },
}

impl ChannelMessage {
    /// Build from a status byte and its data bytes.
    ///
    /// Returns None for system messages (status 0xF0 and above) and for
    /// bytes that are not status bytes.
    pub fn from_parts(status: u8, data1: u8, data2: u8) -> Option<Self> {
        let channel = status & 0x0F;
        let data1 = data1 & 0x7F;
        let data2 = data2 & 0x7F;

        match status & 0xF0 {
            messages::NOTE_OFF => Some(ChannelMessage::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            }),
            // Note On with velocity 0 is equivalent to Note Off
            messages::NOTE_ON if data2 == 0 => Some(ChannelMessage::NoteOff {
                channel,
                note: data1,
                velocity: 0,
            }),
            messages::NOTE_ON => Some(ChannelMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            }),
            messages::POLY_AFTERTOUCH => Some(ChannelMessage::PolyAftertouch {
                channel,
                note: data1,
                pressure: data2,
            }),
            messages::CONTROL_CHANGE => Some(ChannelMessage::ControlChange {
                channel,
                controller: data1,
                value: data2,
            }),
            messages::PROGRAM_CHANGE => Some(ChannelMessage::ProgramChange {
                channel,
                program: data1,
            }),
            messages::CHANNEL_AFTERTOUCH => Some(ChannelMessage::ChannelAftertouch {
                channel,
                pressure: data1,
            }),
            messages::PITCH_BEND => {
                let raw = ((data2 as i16) << 7) | data1 as i16;
                Some(ChannelMessage::PitchBend {
                    channel,
                    value: raw - 8192,
                })
            }
            _ => None,
        }
    }

    /// Channel (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            ChannelMessage::NoteOff { channel, .. }
            | ChannelMessage::NoteOn { channel, .. }
            | ChannelMessage::PolyAftertouch { channel, .. }
            | ChannelMessage::ControlChange { channel, .. }
            | ChannelMessage::ProgramChange { channel, .. }
            | ChannelMessage::ChannelAftertouch { channel, .. }
            | ChannelMessage::PitchBend { channel, .. } => channel,
        }
    }

    /// Encode to wire bytes (2 or 3 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            ChannelMessage::NoteOff { channel, note, velocity } => {
                vec![messages::NOTE_OFF | channel, note, velocity]
            }
            ChannelMessage::NoteOn { channel, note, velocity } => {
                vec![messages::NOTE_ON | channel, note, velocity]
            }
            ChannelMessage::PolyAftertouch { channel, note, pressure } => {
                vec![messages::POLY_AFTERTOUCH | channel, note, pressure]
            }
            ChannelMessage::ControlChange { channel, controller, value } => {
                vec![messages::CONTROL_CHANGE | channel, controller, value]
            }
            ChannelMessage::ProgramChange { channel, program } => {
                vec![messages::PROGRAM_CHANGE | channel, program]
            }
            ChannelMessage::ChannelAftertouch { channel, pressure } => {
                vec![messages::CHANNEL_AFTERTOUCH | channel, pressure]
            }
            ChannelMessage::PitchBend { channel, value } => {
                let raw = (value as i32 + 8192).clamp(0, 16383) as u16;
                vec![
                    messages::PITCH_BEND | channel,
                    (raw & 0x7F) as u8,
                    (raw >> 7) as u8,
                ]
            }
        }
    }
}

/// Number of data bytes following a status byte
pub fn data_length(status: u8) -> usize {
    match status & 0xF0 {
        messages::PROGRAM_CHANGE | messages::CHANNEL_AFTERTOUCH => 1,
        0x80..=0xE0 => 2,
        _ => match status {
            messages::TIME_CODE | messages::SONG_SELECT => 1,
            messages::SONG_POSITION => 2,
            _ => 0,
        },
    }
}

/// An item parsed from a raw MIDI byte run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Channel(ChannelMessage),
    /// System exclusive message, including the framing bytes
    SysEx(Vec<u8>),
}

/// Parse a raw MIDI byte run, honoring running status.
///
/// System common and real-time messages are skipped; a truncated trailing
/// message is dropped.
pub fn parse_stream(data: &[u8]) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut running: Option<u8> = None;
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];

        if byte >= 0xF8 {
            // Real-time bytes may appear anywhere and do not cancel running status
            i += 1;
            continue;
        }

        if byte == messages::SYSEX_START {
            running = None;
            let end = data[i..]
                .iter()
                .position(|&b| b == messages::SYSEX_END)
                .map(|p| i + p + 1)
                .unwrap_or(data.len());
            events.push(StreamEvent::SysEx(data[i..end].to_vec()));
            i = end;
            continue;
        }

        if byte >= 0xF1 {
            running = None;
            i += 1 + data_length(byte);
            continue;
        }

        let status = if byte & 0x80 != 0 {
            i += 1;
            running = Some(byte);
            byte
        } else if let Some(status) = running {
            status
        } else {
            // Stray data byte
            i += 1;
            continue;
        };

        let length = data_length(status);
        if i + length > data.len() {
            break;
        }
        let data1 = data[i];
        let data2 = if length == 2 { data[i + 1] } else { 0 };
        i += length;

        if let Some(message) = ChannelMessage::from_parts(status, data1, data2) {
            events.push(StreamEvent::Channel(message));
        }
    }

    events
}
