// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Backend discovery and player creation.
//!
//! Libraries are built from an ordered list of factories; a factory that
//! fails is logged and skipped. Players are created on the first library
//! that accepts the locator.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Backend, EngineConfig};
use crate::engine::{EngineError, Locator, SynthEngine, SynthLibrary};
use crate::player::{Player, PlayerError, PlayerEvent, PlayerListener};
use crate::tone::{commands, DEFAULT_RESOLUTION, DEFAULT_TEMPO, MAX_VOLUME, TONE_VERSION};

/// Builds a library from the configuration
pub type LibraryFactory =
    Box<dyn Fn(&EngineConfig) -> Result<Arc<dyn SynthLibrary>, EngineError> + Send + Sync>;

/// Why a backend could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

/// Manager error types
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no synthesis backend available ({})", join_failures(.0))]
    NoBackend(Vec<BackendFailure>),
    #[error(transparent)]
    Player(#[from] PlayerError),
}

impl From<EngineError> for ManagerError {
    fn from(err: EngineError) -> Self {
        ManagerError::Player(err.into())
    }
}

fn join_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "none configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Factory for a configured backend
pub fn backend_factory(backend: Backend) -> LibraryFactory {
    match backend {
        Backend::Fluid => Box::new(|config: &EngineConfig| {
            Ok(Arc::new(SynthEngine::fluid(config)?) as Arc<dyn SynthLibrary>)
        }),
        Backend::Wave => Box::new(|config: &EngineConfig| {
            Ok(Arc::new(SynthEngine::wave(config)) as Arc<dyn SynthLibrary>)
        }),
    }
}

/// Entry point for creating players
pub struct Manager {
    config: EngineConfig,
    libraries: Vec<Arc<dyn SynthLibrary>>,
    failures: Vec<BackendFailure>,
    /// Single-tone players kept alive until they finish
    tones: Arc<Mutex<Vec<Player>>>,
}

impl Manager {
    /// Build the backends listed in `config`
    pub fn new(config: EngineConfig) -> Result<Self, ManagerError> {
        let factories = config
            .backends
            .iter()
            .map(|backend| (backend.name().to_string(), backend_factory(*backend)))
            .collect();
        Self::with_factories(config, factories)
    }

    /// Build libraries from `factories`, in order
    pub fn with_factories(
        config: EngineConfig,
        factories: Vec<(String, LibraryFactory)>,
    ) -> Result<Self, ManagerError> {
        let mut libraries = Vec::new();
        let mut failures = Vec::new();

        for (name, factory) in factories {
            match factory(&config) {
                Ok(library) => {
                    info!("Backend {} available", name);
                    libraries.push(library);
                }
                Err(e) => {
                    warn!("Backend {} unavailable: {}", name, e);
                    failures.push(BackendFailure {
                        backend: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if libraries.is_empty() {
            return Err(ManagerError::NoBackend(failures));
        }
        Ok(Self {
            config,
            libraries,
            failures,
            tones: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Use already constructed libraries
    pub fn with_libraries(config: EngineConfig, libraries: Vec<Arc<dyn SynthLibrary>>) -> Self {
        Self {
            config,
            libraries,
            failures: Vec::new(),
            tones: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Libraries in the order they are tried
    pub fn libraries(&self) -> &[Arc<dyn SynthLibrary>] {
        &self.libraries
    }

    /// Backends that failed to initialize
    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a player on the first library that accepts `locator`
    pub fn create_player(&self, locator: Locator) -> Result<Player, ManagerError> {
        let mut last_error = None;
        for library in &self.libraries {
            match Player::new(
                Arc::clone(library),
                locator.clone(),
                self.config.looping,
                self.config.tone.clone(),
            ) {
                Ok(player) => {
                    debug!("{} plays {}", library.name(), locator);
                    return Ok(player);
                }
                Err(e) => {
                    debug!("{} rejected {}: {}", library.name(), locator, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(ManagerError::NoBackend(self.failures.clone())),
        }
    }

    /// Create a player from a locator string
    pub fn create_player_for(&self, locator: &str) -> Result<Player, ManagerError> {
        self.create_player(Locator::parse(locator))
    }

    /// Play a single note on the tone device without blocking.
    ///
    /// The player closes itself at the end of the note.
    pub fn play_tone(&self, note: i32, duration_ms: i32, volume: i32) -> Result<(), ManagerError> {
        let sequence = single_tone(note, duration_ms, volume)?;

        let player = self.create_player(Locator::ToneDevice)?;
        player.realize()?;
        let control = player
            .tone_control()?
            .ok_or(PlayerError::NotSupported("tone control"))?;
        control.set_sequence(&sequence)?;

        let tones = Arc::clone(&self.tones);
        let listener: Arc<dyn PlayerListener> =
            Arc::new(move |player: &Player, event: &PlayerEvent| {
                if matches!(
                    event,
                    PlayerEvent::EndOfMedia { .. } | PlayerEvent::Error { .. }
                ) {
                    player.close();
                    tones
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|p| !p.ptr_eq(player));
                }
            });
        player.add_listener(listener)?;

        self.tones_guard().push(player.clone());
        if let Err(e) = player.start() {
            self.tones_guard().retain(|p| !p.ptr_eq(&player));
            player.close();
            return Err(e.into());
        }
        Ok(())
    }

    /// Number of single tones still sounding
    pub fn active_tones(&self) -> usize {
        self.tones_guard().len()
    }

    fn tones_guard(&self) -> std::sync::MutexGuard<'_, Vec<Player>> {
        self.tones.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tone sequence for one note.
///
/// Volume is clamped to 0-100; the duration is converted to tone units at
/// the default tempo and resolution and clamped to 1-127.
pub fn single_tone(note: i32, duration_ms: i32, volume: i32) -> Result<Vec<u8>, PlayerError> {
    if !(0..=127).contains(&note) {
        return Err(PlayerError::InvalidArgument(format!(
            "note {} is out of range 0..=127",
            note
        )));
    }
    if duration_ms <= 0 {
        return Err(PlayerError::InvalidArgument(
            "duration must be positive".to_string(),
        ));
    }
    let volume = volume.clamp(0, MAX_VOLUME as i32);
    let units = duration_ms as i64 * DEFAULT_RESOLUTION as i64 * DEFAULT_TEMPO as i64 / 60_000;
    let units = units.clamp(1, 127);

    Ok(vec![
        commands::VERSION as u8,
        TONE_VERSION,
        commands::TEMPO as u8,
        DEFAULT_TEMPO,
        commands::RESOLUTION as u8,
        DEFAULT_RESOLUTION,
        commands::SET_VOLUME as u8,
        volume as u8,
        note as u8,
        units as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone;

    #[test]
    fn test_single_tone_sequence() {
        let bytes = single_tone(69, 1000, 80).unwrap();
        let sequence = tone::decode(&bytes).unwrap();
        let notes = sequence.expand();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, Some(69));
        assert_eq!(notes[0].volume, 80);
        // 1000 ms -> 32 units -> 1000 ms
        assert_eq!(notes[0].duration_ms, 1000);
    }

    #[test]
    fn test_single_tone_clamps() {
        let short = single_tone(60, 1, 500).unwrap();
        assert_eq!(short[7], 100);
        assert_eq!(short[9], 1);

        let long = single_tone(60, 60_000, -5).unwrap();
        assert_eq!(long[7], 0);
        assert_eq!(long[9], 127);
    }

    #[test]
    fn test_single_tone_rejects_bad_arguments() {
        assert!(matches!(
            single_tone(128, 100, 50),
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(matches!(
            single_tone(-1, 100, 50),
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(matches!(
            single_tone(60, 0, 50),
            Err(PlayerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_no_backend_reports_failures() {
        let config = EngineConfig {
            backends: vec![Backend::Fluid],
            ..EngineConfig::default()
        };
        match Manager::new(config) {
            Err(ManagerError::NoBackend(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].backend, "fluid");
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("fluid backend without a sound bank"),
        }
    }

    #[test]
    fn test_falls_back_to_wave() {
        let manager = Manager::new(EngineConfig::default()).unwrap();
        assert_eq!(manager.libraries().len(), 1);
        assert_eq!(manager.libraries()[0].name(), "wave");
        assert_eq!(manager.failures().len(), 1);
    }
}
