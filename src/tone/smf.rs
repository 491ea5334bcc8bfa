// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Tone sequence to Standard MIDI File conversion.
//!
//! Synthesizers without native tone support play tone sequences as a
//! Type 0 MIDI file. The file is written at 1000 PPQN with a tempo of one
//! quarter note per second, so one tick is one millisecond.

use super::{ToneSequence, MAX_VOLUME};

/// Ticks per quarter note
pub const PPQN: u16 = 1000;
/// Microseconds per quarter note
pub const TEMPO_MICROS: u32 = 1_000_000;
/// Largest delta time a variable-length quantity can carry
pub const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// MIDI event for export
#[derive(Debug, Clone)]
struct SmfEvent {
    /// Absolute tick (milliseconds)
    tick: u64,
    /// Event data
    data: Vec<u8>,
}

impl SmfEvent {
    fn note_on(tick: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            tick,
            data: vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
        }
    }

    fn note_off(tick: u64, channel: u8, note: u8) -> Self {
        Self {
            tick,
            data: vec![0x80 | (channel & 0x0F), note & 0x7F, 0],
        }
    }

    fn program_change(tick: u64, channel: u8, program: u8) -> Self {
        Self {
            tick,
            data: vec![0xC0 | (channel & 0x0F), program & 0x7F],
        }
    }

    fn tempo(tick: u64, microseconds: u32) -> Self {
        Self {
            tick,
            data: vec![
                0xFF, 0x51, 0x03,
                ((microseconds >> 16) & 0xFF) as u8,
                ((microseconds >> 8) & 0xFF) as u8,
                (microseconds & 0xFF) as u8,
            ],
        }
    }

    fn end_of_track(tick: u64) -> Self {
        Self {
            tick,
            data: vec![0xFF, 0x2F, 0x00],
        }
    }
}

/// Tone volume (0-100) to note velocity
pub fn volume_to_velocity(volume: u8) -> u8 {
    (volume.min(MAX_VOLUME) as u32 * 127 / MAX_VOLUME as u32) as u8
}

/// Convert a decoded tone sequence to a Type 0 MIDI file
pub fn to_midi(sequence: &ToneSequence, channel: u8, program: u8) -> Vec<u8> {
    let mut events = vec![
        SmfEvent::tempo(0, TEMPO_MICROS),
        SmfEvent::program_change(0, channel, program),
    ];

    let mut end = 0u64;
    for note in sequence.expand() {
        end = note.end_ms();
        let velocity = volume_to_velocity(note.volume);
        // Rests and muted notes only advance time
        let Some(pitch) = note.pitch else { continue };
        if velocity == 0 {
            continue;
        }
        events.push(SmfEvent::note_on(note.start_ms, channel, pitch, velocity));
        events.push(SmfEvent::note_off(note.end_ms(), channel, pitch));
    }

    // Stable sort keeps each note off ahead of a note on at the same tick
    events.sort_by_key(|e| e.tick);
    // A trailing rest still counts toward the length
    events.push(SmfEvent::end_of_track(end));

    let mut buffer = Vec::new();
    write_header(&mut buffer, PPQN);
    write_track(&mut buffer, &events);
    buffer
}

/// Write MIDI file header chunk (format 0, one track)
fn write_header(out: &mut Vec<u8>, ppqn: u16) {
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&ppqn.to_be_bytes());
}

/// Write a track chunk
fn write_track(out: &mut Vec<u8>, events: &[SmfEvent]) {
    let mut track_data = Vec::new();
    let mut last_tick = 0u64;

    for event in events {
        let delta = event.tick.saturating_sub(last_tick);
        write_variable_length(&mut track_data, delta.min(MAX_DELTA as u64) as u32);
        track_data.extend_from_slice(&event.data);
        last_tick = event.tick;
    }

    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
    out.extend_from_slice(&track_data);
}

/// Write variable-length quantity
fn write_variable_length(out: &mut Vec<u8>, mut value: u32) {
    let mut buffer = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        buffer.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    buffer.reverse();
    out.extend_from_slice(&buffer);
}
