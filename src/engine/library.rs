// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Renderer-generic synthesis library.
//!
//! `SynthEngine` keeps one `Pipeline` per handle in a map. The map lock is
//! always taken before a pipeline's core lock, and the output threads only
//! ever take core locks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::pipeline::{Pipeline, RendererFactory};
use super::{EngineError, Locator, NativeListener, PlayerHandle, SoundBank, SynthLibrary};
use crate::audio::{AudioConfig, FluidRenderer, Renderer, WaveRenderer};
use crate::config::{EngineConfig, ToneConfig};
use crate::midi::Metadata;

/// Synthesis library over any renderer
pub struct SynthEngine {
    name: String,
    factory: RendererFactory,
    native_tone: bool,
    audio: AudioConfig,
    tone: ToneConfig,
    sound_bank: Option<Arc<SoundBank>>,
    next_id: AtomicU64,
    players: Mutex<HashMap<PlayerHandle, Pipeline>>,
}

impl SynthEngine {
    /// Create a library from a renderer factory
    pub fn new(
        name: &str,
        factory: RendererFactory,
        native_tone: bool,
        audio: AudioConfig,
        tone: ToneConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            factory,
            native_tone,
            audio,
            tone,
            sound_bank: None,
            next_id: AtomicU64::new(1),
            players: Mutex::new(HashMap::new()),
        }
    }

    /// FluidLite library over the configured sound bank.
    ///
    /// The bank is validated and loaded once here so a broken bank fails
    /// library creation.
    pub fn fluid(config: &EngineConfig) -> Result<Self, EngineError> {
        let path = config
            .sound_bank
            .as_deref()
            .ok_or_else(|| EngineError::SoundBank("no sound bank configured".to_string()))?;
        let bank = Arc::new(SoundBank::load(path)?);

        let sample_rate = config.audio.sample_rate;
        FluidRenderer::new(sample_rate as f64, bank.path())
            .map_err(|e| EngineError::SoundBank(e.to_string()))?;

        let factory_bank = Arc::clone(&bank);
        let factory: RendererFactory = Arc::new(move |sample_rate: u32| {
            let renderer = FluidRenderer::new(sample_rate as f64, factory_bank.path())
                .map_err(EngineError::Output)?;
            Ok(Box::new(renderer) as Box<dyn Renderer>)
        });

        info!("FluidLite library ready with {}", bank.path().display());
        let mut engine = Self::new(
            "fluid",
            factory,
            false,
            config.audio.clone(),
            config.tone.clone(),
        );
        engine.sound_bank = Some(bank);
        Ok(engine)
    }

    /// Built-in waveform library; needs no sound bank
    pub fn wave(config: &EngineConfig) -> Self {
        let factory: RendererFactory = Arc::new(|sample_rate: u32| {
            Ok(Box::new(WaveRenderer::new(sample_rate as f32)) as Box<dyn Renderer>)
        });
        Self::new(
            "wave",
            factory,
            true,
            config.audio.clone(),
            config.tone.clone(),
        )
    }

    /// Sound bank shared by every player, if any
    pub fn sound_bank(&self) -> Option<&Path> {
        self.sound_bank.as_deref().map(SoundBank::path)
    }

    /// Audio settings used for new outputs
    pub fn audio_config(&self) -> &AudioConfig {
        &self.audio
    }

    /// Number of live handles
    pub fn player_count(&self) -> usize {
        self.players().len()
    }

    fn players(&self) -> MutexGuard<'_, HashMap<PlayerHandle, Pipeline>> {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_pipeline<R>(
        &self,
        handle: PlayerHandle,
        f: impl FnOnce(&mut Pipeline) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut players = self.players();
        let pipeline = players
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle))?;
        f(pipeline)
    }

    fn query<R: Default>(&self, handle: PlayerHandle, f: impl FnOnce(&Pipeline) -> R) -> R {
        self.players().get(&handle).map(f).unwrap_or_default()
    }
}

impl SynthLibrary for SynthEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_tone_control(&self) -> bool {
        self.native_tone
    }

    fn create_player(&self, locator: &Locator) -> Result<PlayerHandle, EngineError> {
        let handle = PlayerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pipeline = Pipeline::new(handle, locator, self.audio.sample_rate)?;
        self.players().insert(handle, pipeline);
        debug!("{}: created player {} for {}", self.name, handle, locator);
        Ok(handle)
    }

    fn realize(&self, handle: PlayerHandle) -> Result<(), EngineError> {
        self.with_pipeline(handle, |p| p.realize(&self.factory, &self.tone))
    }

    fn prefetch(&self, handle: PlayerHandle) -> Result<Option<u64>, EngineError> {
        self.with_pipeline(handle, |p| p.prefetch(&self.audio))
    }

    fn start(&self, handle: PlayerHandle) -> Result<(), EngineError> {
        self.with_pipeline(handle, Pipeline::start)
    }

    fn pause(&self, handle: PlayerHandle) -> Result<(), EngineError> {
        self.with_pipeline(handle, Pipeline::pause)
    }

    fn deallocate(&self, handle: PlayerHandle) -> Result<(), EngineError> {
        self.with_pipeline(handle, Pipeline::deallocate)
    }

    fn close(&self, handle: PlayerHandle) {
        let _ = self.with_pipeline(handle, |p| {
            p.close();
            Ok(())
        });
    }

    fn finalize(&self, handle: PlayerHandle) {
        let pipeline = self.players().remove(&handle);
        // Drop outside the map lock; closing joins the output thread
        if let Some(mut pipeline) = pipeline {
            pipeline.close();
            debug!("{}: finalized player {}", self.name, handle);
        }
    }

    fn set_media_time(&self, handle: PlayerHandle, time_us: u64) -> Result<u64, EngineError> {
        self.with_pipeline(handle, |p| p.set_media_time(time_us))
    }

    fn get_media_time(&self, handle: PlayerHandle) -> Result<u64, EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            Ok(p.core().media_time_us())
        })
    }

    fn get_duration(&self, handle: PlayerHandle) -> Option<u64> {
        self.query(handle, |p| p.core().duration_us())
    }

    fn set_repeat(&self, handle: PlayerHandle, count: i32) -> Result<(), EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            p.core().set_repeat(count);
            Ok(())
        })
    }

    fn set_pan(&self, handle: PlayerHandle, pan: i32) -> Result<i32, EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            Ok(p.core().set_pan(pan))
        })
    }

    fn get_pan(&self, handle: PlayerHandle) -> i32 {
        self.query(handle, |p| p.core().pan())
    }

    fn set_mute(&self, handle: PlayerHandle, mute: bool) -> Result<(), EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            p.core().set_muted(mute);
            Ok(())
        })
    }

    fn is_muted(&self, handle: PlayerHandle) -> bool {
        self.query(handle, |p| p.core().is_muted())
    }

    fn set_volume(&self, handle: PlayerHandle, level: i32) -> Result<i32, EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            Ok(p.core().set_level(level) as i32)
        })
    }

    fn get_volume(&self, handle: PlayerHandle) -> i32 {
        self.query(handle, |p| p.core().level() as i32)
    }

    fn set_listener(
        &self,
        handle: PlayerHandle,
        listener: Arc<dyn NativeListener>,
    ) -> Result<(), EngineError> {
        self.with_pipeline(handle, |p| {
            p.check_open()?;
            p.core().set_listener(Some(listener));
            Ok(())
        })
    }

    fn set_data_source(&self, handle: PlayerHandle, data: &[u8]) -> Result<(), EngineError> {
        self.with_pipeline(handle, |p| p.set_data_source(data, &self.tone))
    }

    fn write_midi(&self, handle: PlayerHandle, data: &[u8]) -> Result<usize, EngineError> {
        self.with_pipeline(handle, |p| p.write_midi(data))
    }

    fn metadata(&self, handle: PlayerHandle) -> Metadata {
        self.query(handle, |p| p.metadata().clone())
    }
}
