// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Synthesis engine.
//!
//! This module provides:
//! - The `SynthLibrary` capability trait every backend implements
//! - Opaque player handles and media locators
//! - Native notifications raised from the render thread
//! - `SynthEngine`, the renderer-generic implementation
//! - Sound bank loading

pub mod library;
pub mod pipeline;
pub mod soundbank;

pub use library::SynthEngine;
pub use pipeline::RendererFactory;
pub use soundbank::SoundBank;

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::audio::AudioError;
use crate::midi::{Metadata, TimelineError};
use crate::tone::{commands, FormatError};

/// Locator of the live MIDI device
pub const MIDI_DEVICE_LOCATOR: &str = "device://midi";
/// Locator of the interactive tone device
pub const TONE_DEVICE_LOCATOR: &str = "device://tone";

/// Opaque identifier of an engine-side player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerHandle(u64);

impl PlayerHandle {
    /// Wrap a library-assigned identifier
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of media the engine can play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Standard MIDI File
    Midi,
    /// Monophonic tone sequence
    Tone,
}

impl ContentType {
    /// MIME type reported to callers
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Midi => "audio/midi",
            ContentType::Tone => "audio/x-tone-seq",
        }
    }

    /// Guess the content type from leading bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"MThd") {
            Some(ContentType::Midi)
        } else if data.first() == Some(&(commands::VERSION as u8)) {
            Some(ContentType::Tone)
        } else {
            None
        }
    }
}

/// Where a player's media comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Live MIDI device driven through the MIDI control
    MidiDevice,
    /// Tone device whose sequence is set through the tone control
    ToneDevice,
    /// Media already in memory
    Memory {
        data: Arc<[u8]>,
        content_type: Option<ContentType>,
    },
    /// Media file on disk
    File(PathBuf),
}

impl Locator {
    /// Parse a locator string.
    ///
    /// Device locators map to devices, `file://` and bare strings to paths.
    pub fn parse(locator: &str) -> Self {
        match locator {
            MIDI_DEVICE_LOCATOR => Locator::MidiDevice,
            TONE_DEVICE_LOCATOR => Locator::ToneDevice,
            other => Locator::File(PathBuf::from(
                other.strip_prefix("file://").unwrap_or(other),
            )),
        }
    }

    /// In-memory media with its type sniffed from the bytes
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let content_type = ContentType::sniff(&data);
        Locator::Memory { data, content_type }
    }

    /// Check if this is one of the device locators
    pub fn is_device(&self) -> bool {
        matches!(self, Locator::MidiDevice | Locator::ToneDevice)
    }

    /// Content type known without reading the media
    pub fn content_type(&self) -> Option<ContentType> {
        match self {
            Locator::MidiDevice => Some(ContentType::Midi),
            Locator::ToneDevice => Some(ContentType::Tone),
            Locator::Memory { content_type, .. } => *content_type,
            Locator::File(path) => match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi") => {
                    Some(ContentType::Midi)
                }
                _ => None,
            },
        }
    }

    /// Read the media bytes.
    ///
    /// Devices have no media of their own and return an empty buffer.
    pub fn load(&self) -> Result<Arc<[u8]>, EngineError> {
        match self {
            Locator::MidiDevice | Locator::ToneDevice => Ok(Arc::from(Vec::new())),
            Locator::Memory { data, .. } => Ok(Arc::clone(data)),
            Locator::File(path) => fs::read(path)
                .map(Arc::from)
                .map_err(|source| EngineError::Io {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::MidiDevice => f.write_str(MIDI_DEVICE_LOCATOR),
            Locator::ToneDevice => f.write_str(TONE_DEVICE_LOCATOR),
            Locator::Memory { data, .. } => write!(f, "memory ({} bytes)", data.len()),
            Locator::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Notifications raised by the engine while rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// Media ended and is looping again
    Restart { media_time_us: u64 },
    /// Media ended with no loops left; playback stopped
    Stop { media_time_us: u64 },
    /// Rendering failed; playback stopped
    Error { message: String },
    /// Volume changed from inside the media (GM master volume)
    VolumeChanged { level: u8 },
}

/// Receiver of native notifications.
///
/// Called from the output thread with no engine lock held; implementations
/// must not block.
pub trait NativeListener: Send + Sync {
    fn post_event(&self, event: NativeEvent);
}

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sound bank error: {0}")]
    SoundBank(String),
    #[error(transparent)]
    Output(#[from] AudioError),
    #[error("unknown player handle {0}")]
    UnknownHandle(PlayerHandle),
    #[error("player {0} is closed")]
    Closed(PlayerHandle),
    #[error("player {handle} must be {required} first")]
    NotReady {
        handle: PlayerHandle,
        required: &'static str,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognized media content")]
    UnknownContent,
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("{0} is not available on this player")]
    Unsupported(&'static str),
}

/// Operations a synthesis backend offers to players.
///
/// Every call names the engine-side player by its handle. Methods that
/// change playback return errors synchronously; failures while rendering
/// arrive through the registered `NativeListener`.
pub trait SynthLibrary: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Whether tone sequences can be handed over without conversion
    fn has_tone_control(&self) -> bool;

    /// Create an engine-side player for `locator`
    fn create_player(&self, locator: &Locator) -> Result<PlayerHandle, EngineError>;

    /// Parse media and create the synthesizer
    fn realize(&self, handle: PlayerHandle) -> Result<(), EngineError>;

    /// Acquire the audio output; returns the media duration if known
    fn prefetch(&self, handle: PlayerHandle) -> Result<Option<u64>, EngineError>;

    /// Start or resume rendering
    fn start(&self, handle: PlayerHandle) -> Result<(), EngineError>;

    /// Pause rendering, keeping the media position
    fn pause(&self, handle: PlayerHandle) -> Result<(), EngineError>;

    /// Release the audio output
    fn deallocate(&self, handle: PlayerHandle) -> Result<(), EngineError>;

    /// Stop rendering and release every resource of the player
    fn close(&self, handle: PlayerHandle);

    /// Forget the handle
    fn finalize(&self, handle: PlayerHandle);

    /// Seek; returns the position actually set
    fn set_media_time(&self, handle: PlayerHandle, time_us: u64) -> Result<u64, EngineError>;

    /// Current media position
    fn get_media_time(&self, handle: PlayerHandle) -> Result<u64, EngineError>;

    /// Media duration if known
    fn get_duration(&self, handle: PlayerHandle) -> Option<u64>;

    /// Number of times to play the media; negative loops forever
    fn set_repeat(&self, handle: PlayerHandle, count: i32) -> Result<(), EngineError>;

    /// Set pan (-100 to 100); returns the value set
    fn set_pan(&self, handle: PlayerHandle, pan: i32) -> Result<i32, EngineError>;

    /// Current pan
    fn get_pan(&self, handle: PlayerHandle) -> i32;

    /// Mute or unmute without touching the level
    fn set_mute(&self, handle: PlayerHandle, mute: bool) -> Result<(), EngineError>;

    /// Check the mute flag
    fn is_muted(&self, handle: PlayerHandle) -> bool;

    /// Set volume level (0-100); returns the value set
    fn set_volume(&self, handle: PlayerHandle, level: i32) -> Result<i32, EngineError>;

    /// Current volume level
    fn get_volume(&self, handle: PlayerHandle) -> i32;

    /// Register the receiver of native notifications
    fn set_listener(
        &self,
        handle: PlayerHandle,
        listener: Arc<dyn NativeListener>,
    ) -> Result<(), EngineError>;

    /// Replace the media of a tone device player
    fn set_data_source(&self, handle: PlayerHandle, data: &[u8]) -> Result<(), EngineError>;

    /// Send raw MIDI bytes to a MIDI device player; returns bytes accepted
    fn write_midi(&self, handle: PlayerHandle, data: &[u8]) -> Result<usize, EngineError>;

    /// Text metadata of the media
    fn metadata(&self, handle: PlayerHandle) -> Metadata;
}
