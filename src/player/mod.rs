// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Media players.
//!
//! A `Player` wraps one engine handle and walks it through the lifecycle
//! UNREALIZED -> REALIZED -> PREFETCHED -> STARTED, with CLOSED as the
//! terminal state. Listeners are called asynchronously on the player's
//! callback thread, in the order events happened.
//!
//! Lifecycle state lives in an atomic so notifications arriving from the
//! output thread never wait on a caller; caller operations are serialized
//! by a per-player call lock.

pub mod controls;
pub mod dispatch;

pub use controls::{
    gain_to_level, level_to_gain, ControlKind, MetaDataControl, MidiControl, PanControl,
    ToneControl, VolumeControl,
};
pub use dispatch::EventDispatcher;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{LoopPolicy, ToneConfig};
use crate::engine::{
    ContentType, EngineError, Locator, NativeEvent, NativeListener, PlayerHandle, SynthLibrary,
};
use crate::midi::RangeError;
use crate::tone::FormatError;

/// Player lifecycle states, ordered by how far a player has progressed
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerState {
    Closed = 0,
    Unrealized = 1,
    Realized = 2,
    Prefetched = 3,
    Started = 4,
}

impl PlayerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerState::Unrealized,
            2 => PlayerState::Realized,
            3 => PlayerState::Prefetched,
            4 => PlayerState::Started,
            _ => PlayerState::Closed,
        }
    }

    /// Legacy numeric state code
    pub fn code(&self) -> i32 {
        match self {
            PlayerState::Closed => 0,
            PlayerState::Unrealized => 100,
            PlayerState::Realized => 200,
            PlayerState::Prefetched => 300,
            PlayerState::Started => 400,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Closed => "CLOSED",
            PlayerState::Unrealized => "UNREALIZED",
            PlayerState::Realized => "REALIZED",
            PlayerState::Prefetched => "PREFETCHED",
            PlayerState::Started => "STARTED",
        };
        f.write_str(name)
    }
}

/// Events delivered to player listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback started at the given media time
    Started { media_time_us: u64 },
    /// Playback stopped by the caller
    Stopped { media_time_us: u64 },
    /// The media reached its end
    EndOfMedia { media_time_us: u64 },
    /// The player was closed
    Closed,
    /// Playback failed
    Error { message: String },
    /// Volume or mute changed
    VolumeChanged { level: u8, muted: bool },
}

impl PlayerEvent {
    /// Legacy event name
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Started { .. } => "started",
            PlayerEvent::Stopped { .. } => "stopped",
            PlayerEvent::EndOfMedia { .. } => "endOfMedia",
            PlayerEvent::Closed => "closed",
            PlayerEvent::Error { .. } => "error",
            PlayerEvent::VolumeChanged { .. } => "volumeChanged",
        }
    }

    /// Media time carried by the event
    pub fn media_time_us(&self) -> Option<u64> {
        match self {
            PlayerEvent::Started { media_time_us }
            | PlayerEvent::Stopped { media_time_us }
            | PlayerEvent::EndOfMedia { media_time_us } => Some(*media_time_us),
            _ => None,
        }
    }
}

/// Receiver of player events
pub trait PlayerListener: Send + Sync {
    fn player_update(&self, player: &Player, event: &PlayerEvent);
}

impl<F> PlayerListener for F
where
    F: Fn(&Player, &PlayerEvent) + Send + Sync,
{
    fn player_update(&self, player: &Player, event: &PlayerEvent) {
        self(player, event)
    }
}

/// Player error types
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("illegal state: {0}")]
    State(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Format(FormatError),
    #[error(transparent)]
    Engine(EngineError),
    #[error("{0} is not supported")]
    NotSupported(&'static str),
}

impl From<RangeError> for PlayerError {
    fn from(err: RangeError) -> Self {
        PlayerError::InvalidArgument(err.to_string())
    }
}

impl From<FormatError> for PlayerError {
    fn from(err: FormatError) -> Self {
        PlayerError::Format(err)
    }
}

impl From<EngineError> for PlayerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Format(err) => PlayerError::Format(err),
            other => PlayerError::Engine(other),
        }
    }
}

/// Result type for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;

/// State reachable from both callers and the output thread
struct Shared {
    state: AtomicU8,
    muted: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn PlayerListener>>>,
    dispatcher: EventDispatcher,
}

impl Shared {
    fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: PlayerState) -> PlayerState {
        PlayerState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    fn transition(&self, from: PlayerState, to: PlayerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn PlayerListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_registered(&self, listener: &Arc<dyn PlayerListener>) -> bool {
        self.listeners().iter().any(|l| same_listener(l, listener))
    }

    /// Queue one job per registered listener
    fn post(self: &Arc<Self>, origin: &Origin, event: PlayerEvent) {
        let snapshot = self.listeners().clone();
        for listener in snapshot {
            let shared = Arc::clone(self);
            let origin = origin.clone();
            let event = event.clone();
            self.dispatcher.submit(Box::new(move || {
                // Removed since the event was queued
                if !shared.is_registered(&listener) {
                    return;
                }
                if let Some(player) = origin.resolve() {
                    listener.player_update(&player, &event);
                }
            }));
        }
    }
}

fn same_listener(a: &Arc<dyn PlayerListener>, b: &Arc<dyn PlayerListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Player an event refers to
#[derive(Clone)]
enum Origin {
    Strong(Player),
    Weak(Weak<PlayerInner>),
}

impl Origin {
    fn resolve(&self) -> Option<Player> {
        match self {
            Origin::Strong(player) => Some(player.clone()),
            Origin::Weak(inner) => inner.upgrade().map(|inner| Player { inner }),
        }
    }
}

/// Forwards engine notifications onto the callback queue
struct NativeBridge {
    shared: Arc<Shared>,
    player: Weak<PlayerInner>,
}

impl NativeListener for NativeBridge {
    fn post_event(&self, event: NativeEvent) {
        if self.shared.state() == PlayerState::Closed {
            return;
        }
        let origin = Origin::Weak(self.player.clone());
        match event {
            NativeEvent::Restart { media_time_us } => {
                // A block rendered before stop() may still report a loop
                if self.shared.state() != PlayerState::Started {
                    return;
                }
                self.shared
                    .post(&origin, PlayerEvent::EndOfMedia { media_time_us });
                self.shared
                    .post(&origin, PlayerEvent::Started { media_time_us: 0 });
            }
            NativeEvent::Stop { media_time_us } => {
                if self
                    .shared
                    .transition(PlayerState::Started, PlayerState::Prefetched)
                {
                    self.shared
                        .post(&origin, PlayerEvent::EndOfMedia { media_time_us });
                }
            }
            NativeEvent::Error { message } => {
                self.shared
                    .transition(PlayerState::Started, PlayerState::Prefetched);
                self.shared.post(&origin, PlayerEvent::Error { message });
            }
            NativeEvent::VolumeChanged { level } => {
                let muted = self.shared.muted.load(Ordering::SeqCst);
                self.shared
                    .post(&origin, PlayerEvent::VolumeChanged { level, muted });
            }
        }
    }
}

struct PlayerInner {
    library: Arc<dyn SynthLibrary>,
    handle: PlayerHandle,
    locator: Locator,
    looping: LoopPolicy,
    tone: ToneConfig,
    shared: Arc<Shared>,
    call: Mutex<()>,
}

impl Drop for PlayerInner {
    fn drop(&mut self) {
        if self.shared.set_state(PlayerState::Closed) != PlayerState::Closed {
            debug!("Player {} dropped while open; closing", self.handle);
            self.library.close(self.handle);
        }
        self.library.finalize(self.handle);
    }
}

/// A media player bound to one engine handle.
///
/// Clones share the same player; the handle is closed and released when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("handle", &self.inner.handle)
            .field("locator", &self.inner.locator)
            .field("state", &self.state())
            .finish()
    }
}

impl Player {
    /// Create a player for `locator` on `library`
    pub fn new(
        library: Arc<dyn SynthLibrary>,
        locator: Locator,
        looping: LoopPolicy,
        tone: ToneConfig,
    ) -> Result<Self> {
        let handle = library.create_player(&locator)?;
        let shared = Arc::new(Shared {
            state: AtomicU8::new(PlayerState::Unrealized as u8),
            muted: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            dispatcher: EventDispatcher::new(),
        });

        let inner = Arc::new(PlayerInner {
            library,
            handle,
            locator,
            looping,
            tone,
            shared: Arc::clone(&shared),
            call: Mutex::new(()),
        });

        let bridge = Arc::new(NativeBridge {
            shared,
            player: Arc::downgrade(&inner),
        });
        inner.library.set_listener(handle, bridge)?;

        debug!(
            "Created player {} for {} on {}",
            handle,
            inner.locator,
            inner.library.name()
        );
        Ok(Self { inner })
    }

    /// Engine handle
    pub fn handle(&self) -> PlayerHandle {
        self.inner.handle
    }

    /// Locator the player was created for
    pub fn locator(&self) -> &Locator {
        &self.inner.locator
    }

    /// Check if two values refer to the same player
    pub fn ptr_eq(&self, other: &Player) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> PlayerState {
        self.inner.shared.state()
    }

    pub(crate) fn library(&self) -> &dyn SynthLibrary {
        self.inner.library.as_ref()
    }

    pub(crate) fn tone_config(&self) -> &ToneConfig {
        &self.inner.tone
    }

    pub(crate) fn lock_call(&self) -> MutexGuard<'_, ()> {
        self.inner
            .call
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn check_closed(&self) -> Result<PlayerState> {
        match self.state() {
            PlayerState::Closed => Err(PlayerError::State("player is closed")),
            state => Ok(state),
        }
    }

    pub(crate) fn check_realized(&self) -> Result<PlayerState> {
        let state = self.check_closed()?;
        if state < PlayerState::Realized {
            return Err(PlayerError::State("call realize() before using the player"));
        }
        Ok(state)
    }

    pub(crate) fn set_muted_flag(&self, muted: bool) -> bool {
        self.inner.shared.muted.swap(muted, Ordering::SeqCst)
    }

    pub(crate) fn post(&self, event: PlayerEvent) {
        self.inner
            .shared
            .post(&Origin::Strong(self.clone()), event);
    }

    /// Move to REALIZED; no-op if already realized
    pub fn realize(&self) -> Result<()> {
        let _call = self.lock_call();
        self.realize_locked()
    }

    fn realize_locked(&self) -> Result<()> {
        if self.check_closed()? == PlayerState::Unrealized {
            self.inner.library.realize(self.inner.handle)?;
            self.inner.shared.set_state(PlayerState::Realized);
        }
        Ok(())
    }

    /// Move to PREFETCHED, realizing first if needed
    pub fn prefetch(&self) -> Result<()> {
        let _call = self.lock_call();
        self.prefetch_locked()
    }

    fn prefetch_locked(&self) -> Result<()> {
        self.realize_locked()?;
        if self.state() == PlayerState::Realized {
            self.inner.library.prefetch(self.inner.handle)?;
            self.inner.shared.set_state(PlayerState::Prefetched);
        }
        Ok(())
    }

    /// Start playback, prefetching first if needed
    pub fn start(&self) -> Result<()> {
        let _call = self.lock_call();
        self.prefetch_locked()?;
        if self.state() != PlayerState::Prefetched {
            return Ok(());
        }

        let media_time_us = self.inner.library.get_media_time(self.inner.handle)?;
        // The end of the media may be reported as soon as the engine starts
        self.inner.shared.set_state(PlayerState::Started);
        self.post(PlayerEvent::Started { media_time_us });

        if let Err(e) = self.inner.library.start(self.inner.handle) {
            warn!("Player {} failed to start: {}", self.inner.handle, e);
            self.inner
                .shared
                .transition(PlayerState::Started, PlayerState::Prefetched);
            self.post(PlayerEvent::Error {
                message: e.to_string(),
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop playback, keeping the media position
    pub fn stop(&self) -> Result<()> {
        let _call = self.lock_call();
        self.stop_locked()
    }

    fn stop_locked(&self) -> Result<()> {
        if self.check_closed()? != PlayerState::Started {
            return Ok(());
        }
        self.inner.library.pause(self.inner.handle)?;
        // The media may have ended on its own in the meantime
        if self
            .inner
            .shared
            .transition(PlayerState::Started, PlayerState::Prefetched)
        {
            let media_time_us = self
                .inner
                .library
                .get_media_time(self.inner.handle)
                .unwrap_or(0);
            self.post(PlayerEvent::Stopped { media_time_us });
        }
        Ok(())
    }

    /// Stop and release the audio output
    pub fn deallocate(&self) -> Result<()> {
        let _call = self.lock_call();
        self.stop_locked()?;
        if self.state() == PlayerState::Prefetched {
            self.inner.library.deallocate(self.inner.handle)?;
            self.inner.shared.set_state(PlayerState::Unrealized);
        }
        Ok(())
    }

    /// Close the player and release its resources.
    ///
    /// Emits a single CLOSED event; later calls do nothing.
    pub fn close(&self) {
        let _call = self.lock_call();
        if self.inner.shared.set_state(PlayerState::Closed) == PlayerState::Closed {
            return;
        }
        self.inner.library.close(self.inner.handle);
        self.post(PlayerEvent::Closed);
        debug!("Closed player {}", self.inner.handle);
    }

    /// Set how many times the media plays; negative loops forever
    pub fn set_loop_count(&self, count: i32) -> Result<()> {
        if count == 0 {
            return Err(PlayerError::InvalidArgument(
                "loop count must not be 0".to_string(),
            ));
        }
        let _call = self.lock_call();
        if self.check_closed()? == PlayerState::Started {
            return Err(PlayerError::State(
                "loop count cannot change while started",
            ));
        }
        if self.inner.looping.infinite(count) == Some(false) {
            return Err(PlayerError::InvalidArgument(format!(
                "loop count {} is not supported; use -1 to loop forever",
                count
            )));
        }
        self.inner.library.set_repeat(self.inner.handle, count)?;
        Ok(())
    }

    /// Seek; returns the media time actually set
    pub fn set_media_time(&self, time_us: i64) -> Result<u64> {
        let _call = self.lock_call();
        self.check_realized()?;
        let time_us = time_us.max(0) as u64;
        Ok(self
            .inner
            .library
            .set_media_time(self.inner.handle, time_us)?)
    }

    /// Media time; None before the player is prefetched
    pub fn media_time(&self) -> Result<Option<u64>> {
        if self.check_closed()? < PlayerState::Prefetched {
            return Ok(None);
        }
        Ok(Some(
            self.inner.library.get_media_time(self.inner.handle)?,
        ))
    }

    /// Media duration; None when unknown
    pub fn duration(&self) -> Result<Option<u64>> {
        self.check_closed()?;
        Ok(self.inner.library.get_duration(self.inner.handle))
    }

    /// Type of the media being played
    pub fn content_type(&self) -> Result<Option<ContentType>> {
        self.check_realized()?;
        Ok(self.inner.locator.content_type())
    }

    /// Register a listener; registering twice has no effect
    pub fn add_listener(&self, listener: Arc<dyn PlayerListener>) -> Result<()> {
        self.check_closed()?;
        let mut listeners = self.inner.shared.listeners();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
        Ok(())
    }

    /// Unregister a listener; pending events for it are dropped
    pub fn remove_listener(&self, listener: &Arc<dyn PlayerListener>) -> Result<()> {
        self.check_closed()?;
        self.inner
            .shared
            .listeners()
            .retain(|l| !same_listener(l, listener));
        Ok(())
    }

    /// Controls offered by this player
    pub fn controls(&self) -> Result<Vec<ControlKind>> {
        self.check_realized()?;
        Ok(ControlKind::for_locator(&self.inner.locator).to_vec())
    }

    /// Look a control up by name, e.g. `VolumeControl`
    pub fn control(&self, name: &str) -> Result<Option<ControlKind>> {
        let short = name.rsplit('.').next().unwrap_or(name);
        Ok(self
            .controls()?
            .into_iter()
            .find(|kind| kind.name() == short))
    }

    fn typed_control<T>(&self, kind: ControlKind, make: fn(Player) -> T) -> Result<Option<T>> {
        Ok(self
            .controls()?
            .contains(&kind)
            .then(|| make(self.clone())))
    }

    /// Volume control, if offered
    pub fn volume_control(&self) -> Result<Option<VolumeControl>> {
        self.typed_control(ControlKind::Volume, VolumeControl::new)
    }

    /// Pan control
    pub fn pan_control(&self) -> Result<Option<PanControl>> {
        self.typed_control(ControlKind::Pan, PanControl::new)
    }

    /// Tone control; tone device only
    pub fn tone_control(&self) -> Result<Option<ToneControl>> {
        self.typed_control(ControlKind::Tone, ToneControl::new)
    }

    /// MIDI control; MIDI device only
    pub fn midi_control(&self) -> Result<Option<MidiControl>> {
        self.typed_control(ControlKind::Midi, MidiControl::new)
    }

    /// Metadata control
    pub fn metadata_control(&self) -> Result<Option<MetaDataControl>> {
        self.typed_control(ControlKind::MetaData, MetaDataControl::new)
    }
}
