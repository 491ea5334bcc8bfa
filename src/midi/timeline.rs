// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Playback timelines.
//!
//! A timeline is a flat list of channel messages stamped with absolute
//! microsecond times. Standard MIDI Files are parsed with `midly` and their
//! tempo maps resolved up front; tone sequences are expanded directly.

use std::collections::BTreeMap;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;
use tracing::debug;

use super::ChannelMessage;
use crate::tone::{smf::volume_to_velocity, ToneSequence};

/// Default tempo (120 BPM) in microseconds per quarter note
const DEFAULT_TEMPO_MICROS: u64 = 500_000;

/// Metadata keys
pub const TITLE_KEY: &str = "title";
pub const COPYRIGHT_KEY: &str = "copyright";

/// Content metadata (key/value text)
pub type Metadata = BTreeMap<String, String>;

/// Timeline construction errors
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid MIDI file: {0}")]
    Parse(#[from] midly::Error),
}

/// A channel message at an absolute time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMessage {
    /// Time from the start of the media in microseconds
    pub time_us: u64,
    /// Message to deliver
    pub message: ChannelMessage,
}

/// A fully resolved playback timeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    events: Vec<TimedMessage>,
    duration_us: u64,
    metadata: Metadata,
}

/// Intermediate event used while merging tracks
enum RawKind {
    Tempo(u32),
    Message(ChannelMessage),
    End,
}

impl Timeline {
    /// Parse a Standard MIDI File
    pub fn from_smf(data: &[u8]) -> Result<Self, TimelineError> {
        let smf = Smf::parse(data)?;
        let mut metadata = Metadata::new();
        let mut raw: Vec<(u64, RawKind)> = Vec::new();

        for track in smf.tracks.iter() {
            let mut tick = 0u64;
            for event in track.iter() {
                tick += event.delta.as_int() as u64;
                match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        let message = convert_message(channel.as_int(), message);
                        raw.push((tick, RawKind::Message(message)));
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                        raw.push((tick, RawKind::Tempo(tempo.as_int())));
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => {
                        raw.push((tick, RawKind::End));
                    }
                    TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                        insert_text(&mut metadata, TITLE_KEY, name);
                    }
                    TrackEventKind::Meta(MetaMessage::Copyright(text)) => {
                        insert_text(&mut metadata, COPYRIGHT_KEY, text);
                    }
                    _ => {}
                }
            }
        }

        // Tempo changes apply before messages sharing their tick
        raw.sort_by_key(|(tick, kind)| (*tick, !matches!(kind, RawKind::Tempo(_))));

        let mut events = Vec::with_capacity(raw.len());
        let mut duration_us = 0u64;

        match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => {
                let tpb = ticks_per_beat.as_int().max(1) as u64;
                let mut tempo = DEFAULT_TEMPO_MICROS;
                let mut anchor_tick = 0u64;
                let mut anchor_us = 0u64;

                for (tick, kind) in raw {
                    let time_us = anchor_us + (tick - anchor_tick) * tempo / tpb;
                    match kind {
                        RawKind::Tempo(micros) => {
                            anchor_us = time_us;
                            anchor_tick = tick;
                            tempo = micros as u64;
                        }
                        RawKind::Message(message) => events.push(TimedMessage { time_us, message }),
                        RawKind::End => {}
                    }
                    duration_us = duration_us.max(time_us);
                }
            }
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = fps.as_f32() as f64 * subframes.max(1) as f64;
                for (tick, kind) in raw {
                    let time_us = (tick as f64 * 1_000_000.0 / ticks_per_second) as u64;
                    if let RawKind::Message(message) = kind {
                        events.push(TimedMessage { time_us, message });
                    }
                    duration_us = duration_us.max(time_us);
                }
            }
        }

        debug!(
            "Parsed MIDI file: {} tracks, {} events, {} us",
            smf.tracks.len(),
            events.len(),
            duration_us
        );

        Ok(Self {
            events,
            duration_us,
            metadata,
        })
    }

    /// Expand a tone sequence onto a single channel
    pub fn from_tone(sequence: &ToneSequence, channel: u8, program: u8) -> Self {
        let channel = channel & 0x0F;
        let mut events = vec![TimedMessage {
            time_us: 0,
            message: ChannelMessage::ProgramChange {
                channel,
                program: program & 0x7F,
            },
        }];
        let mut duration_us = 0u64;

        for note in sequence.expand() {
            duration_us = note.end_ms() * 1000;
            let velocity = volume_to_velocity(note.volume);
            let Some(pitch) = note.pitch else { continue };
            if velocity == 0 {
                continue;
            }
            events.push(TimedMessage {
                time_us: note.start_ms * 1000,
                message: ChannelMessage::NoteOn {
                    channel,
                    note: pitch,
                    velocity,
                },
            });
            events.push(TimedMessage {
                time_us: duration_us,
                message: ChannelMessage::NoteOff {
                    channel,
                    note: pitch,
                    velocity: 0,
                },
            });
        }

        events.sort_by_key(|e| e.time_us);

        Self {
            events,
            duration_us,
            metadata: Metadata::new(),
        }
    }

    /// Messages in time order
    pub fn events(&self) -> &[TimedMessage] {
        &self.events
    }

    /// Media duration in microseconds
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    /// Text metadata found in the media
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Index of the first message at or after `time_us`
    pub fn position(&self, time_us: u64) -> usize {
        self.events.partition_point(|e| e.time_us < time_us)
    }

    /// Check if the timeline has no messages
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn insert_text(metadata: &mut Metadata, key: &str, text: &[u8]) {
    let value = String::from_utf8_lossy(text).trim().to_string();
    if !value.is_empty() && !metadata.contains_key(key) {
        metadata.insert(key.to_string(), value);
    }
}

/// Convert a midly message to our channel message
fn convert_message(channel: u8, message: MidiMessage) -> ChannelMessage {
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => ChannelMessage::NoteOff {
            channel,
            note: key.as_int(),
            velocity: 0,
        },
        MidiMessage::NoteOn { key, vel } => ChannelMessage::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, vel } => ChannelMessage::NoteOff {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::Aftertouch { key, vel } => ChannelMessage::PolyAftertouch {
            channel,
            note: key.as_int(),
            pressure: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => ChannelMessage::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidiMessage::ProgramChange { program } => ChannelMessage::ProgramChange {
            channel,
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => ChannelMessage::ChannelAftertouch {
            channel,
            pressure: vel.as_int(),
        },
        MidiMessage::PitchBend { bend } => ChannelMessage::PitchBend {
            channel,
            // midly stores the raw 14-bit value, center = 8192
            value: bend.0.as_int() as i16 - 8192,
        },
    }
}
