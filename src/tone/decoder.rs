// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Single-pass tone sequence decoder.
//!
//! The whole sequence is validated and materialized up front, so a player
//! never discovers a malformed stream in the middle of playback.

use std::collections::HashMap;

use tracing::debug;

use super::commands::*;
use super::{
    units_to_ms, FormatError, ToneEvent, ToneSequence, DEFAULT_RESOLUTION, DEFAULT_TEMPO,
    MAX_EXPANDED_NOTES, MAX_VOLUME, REPEAT_RANGE, RESOLUTION_RANGE, SILENCE_PITCH, TEMPO_RANGE,
    TONE_VERSION,
};

/// Decode a tone sequence.
///
/// The stream must open with `VERSION`; `TEMPO` is required before the first
/// body event and `RESOLUTION` defaults to 64.
pub fn decode(bytes: &[u8]) -> Result<ToneSequence, FormatError> {
    let mut decoder = Decoder::new(bytes);
    decoder.header()?;
    decoder.body()?;

    debug!(
        "Decoded tone sequence: {} events, tempo {}, resolution {}",
        decoder.events.len(),
        decoder.tempo.unwrap_or(DEFAULT_TEMPO),
        decoder.resolution
    );

    Ok(ToneSequence {
        version: TONE_VERSION,
        tempo: decoder.tempo.unwrap_or(DEFAULT_TEMPO),
        resolution: decoder.resolution,
        events: decoder.events,
    })
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    tempo: Option<u8>,
    resolution: u8,
    events: Vec<ToneEvent>,
    /// Open block ids with the note count accumulated inside each
    open: Vec<(u8, u64)>,
    /// Note counts of closed blocks
    closed: HashMap<u8, u64>,
    /// Notes played at the top level
    total: u64,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            tempo: None,
            resolution: DEFAULT_RESOLUTION,
            events: Vec::new(),
            open: Vec::new(),
            closed: HashMap::new(),
            total: 0,
        }
    }

    fn peek(&self) -> Option<i8> {
        self.bytes.get(self.pos).map(|&b| b as i8)
    }

    fn next(&mut self) -> Result<i8, FormatError> {
        let byte = self
            .peek()
            .ok_or(FormatError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read an argument byte that must fall in `range`
    fn arg(
        &mut self,
        what: &'static str,
        range: std::ops::RangeInclusive<u8>,
    ) -> Result<u8, FormatError> {
        let offset = self.pos;
        let value = self.next()?;
        if value < 0 || !range.contains(&(value as u8)) {
            return Err(FormatError::InvalidValue {
                what,
                value,
                offset,
            });
        }
        Ok(value as u8)
    }

    fn header(&mut self) -> Result<(), FormatError> {
        match self.peek() {
            Some(VERSION) => self.pos += 1,
            Some(_) => return Err(FormatError::MissingHeader("VERSION")),
            None => return Err(FormatError::Truncated { offset: 0 }),
        }
        self.arg("version", TONE_VERSION..=TONE_VERSION)?;

        let mut resolution_seen = false;
        loop {
            let offset = self.pos;
            match self.peek() {
                Some(TEMPO) if self.tempo.is_none() => {
                    self.pos += 1;
                    self.tempo = Some(self.arg("tempo", TEMPO_RANGE)?);
                }
                Some(RESOLUTION) if !resolution_seen => {
                    self.pos += 1;
                    self.resolution = self.arg("resolution", RESOLUTION_RANGE)?;
                    resolution_seen = true;
                }
                Some(command @ (VERSION | TEMPO | RESOLUTION)) => {
                    return Err(FormatError::UnexpectedHeader { command, offset });
                }
                _ => return Ok(()),
            }
        }
    }

    fn body(&mut self) -> Result<(), FormatError> {
        if self.pos < self.bytes.len() && self.tempo.is_none() {
            return Err(FormatError::MissingHeader("TEMPO"));
        }

        while self.pos < self.bytes.len() {
            let offset = self.pos;
            let command = self.next()?;
            match command {
                VERSION | TEMPO | RESOLUTION => {
                    return Err(FormatError::UnexpectedHeader { command, offset });
                }
                BLOCK_START => {
                    let id = self.arg("block id", 0..=127)?;
                    if self.open.iter().any(|&(open, _)| open == id) {
                        return Err(FormatError::UnbalancedBlock { id, offset });
                    }
                    self.open.push((id, 0));
                    self.events.push(ToneEvent::BlockStart(id));
                }
                BLOCK_END => {
                    let id = self.arg("block id", 0..=127)?;
                    match self.open.pop() {
                        Some((open, count)) if open == id => {
                            self.closed.insert(id, count);
                        }
                        _ => return Err(FormatError::UnbalancedBlock { id, offset }),
                    }
                    self.events.push(ToneEvent::BlockEnd(id));
                }
                PLAY_BLOCK => {
                    let id = self.arg("block id", 0..=127)?;
                    let count = *self
                        .closed
                        .get(&id)
                        .ok_or(FormatError::UndefinedBlock { id, offset })?;
                    self.count(count)?;
                    self.events.push(ToneEvent::PlayBlock(id));
                }
                SET_VOLUME => {
                    let level = self.arg("volume", 0..=127)?;
                    self.events.push(ToneEvent::SetVolume(level.min(MAX_VOLUME)));
                }
                REPEAT => {
                    let count = self.arg("repeat", REPEAT_RANGE)?;
                    let tone_offset = self.pos;
                    match self.peek() {
                        Some(SILENCE) => {}
                        Some(pitch) if pitch >= 0 => {}
                        _ => {
                            return Err(FormatError::RepeatWithoutTone {
                                offset: tone_offset,
                            })
                        }
                    }
                    self.events.push(ToneEvent::Repeat(count));
                    let event = self.tone()?;
                    self.count(count as u64)?;
                    self.events.push(event);
                }
                SILENCE => {
                    self.pos = offset;
                    let event = self.tone()?;
                    self.count(1)?;
                    self.events.push(event);
                }
                pitch if pitch >= 0 => {
                    self.pos = offset;
                    let event = self.tone()?;
                    self.count(1)?;
                    self.events.push(event);
                }
                _ => return Err(FormatError::UnknownCommand { command, offset }),
            }
        }

        if let Some(&(id, _)) = self.open.last() {
            return Err(FormatError::UnbalancedBlock {
                id,
                offset: self.pos,
            });
        }

        self.events.push(ToneEvent::SequenceEnd);
        Ok(())
    }

    /// Decode a note or silence (pitch/command byte then duration byte)
    fn tone(&mut self) -> Result<ToneEvent, FormatError> {
        let pitch = self.next()?;
        let units = self.arg("duration", 1..=127)?;
        let duration_ms = units_to_ms(units, self.tempo.unwrap_or(DEFAULT_TEMPO), self.resolution);
        if pitch == SILENCE || pitch as u8 == SILENCE_PITCH {
            Ok(ToneEvent::Silence { duration_ms })
        } else {
            Ok(ToneEvent::Note {
                pitch: pitch as u8,
                duration_ms,
            })
        }
    }

    /// Account for notes that will be produced on expansion
    fn count(&mut self, notes: u64) -> Result<(), FormatError> {
        let slot = match self.open.last_mut() {
            Some((_, count)) => count,
            None => &mut self.total,
        };
        *slot = slot.saturating_add(notes);
        if *slot > MAX_EXPANDED_NOTES as u64 {
            return Err(FormatError::SequenceTooLong);
        }
        Ok(())
    }
}
