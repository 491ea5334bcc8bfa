// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Integration tests for mmsynth
//!
//! Player behavior is checked against a capturing fake library; the last
//! tests run real playback on the waveform backend with a null output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mmsynth::audio::OutputKind;
use mmsynth::config::{Backend, EngineConfig, LoopPolicy, ToneConfig};
use mmsynth::engine::{
    EngineError, Locator, NativeEvent, NativeListener, PlayerHandle, SynthLibrary,
};
use mmsynth::manager::{LibraryFactory, Manager, ManagerError};
use mmsynth::midi::Metadata;
use mmsynth::player::{Player, PlayerError, PlayerEvent, PlayerListener, PlayerState};
use mmsynth::tone::commands::*;

const TIMEOUT: Duration = Duration::from_secs(3);

/// One half note of middle C
const ONE_NOTE: [u8; 6] = [VERSION as u8, 1, TEMPO as u8, 30, 60, 32];

#[derive(Default)]
struct HandleState {
    volume: i32,
    pan: i32,
    muted: bool,
    repeat: i32,
    data: Vec<u8>,
    listener: Option<Arc<dyn NativeListener>>,
}

/// Library that records every call instead of rendering
#[derive(Default)]
struct FakeLibrary {
    calls: Mutex<Vec<String>>,
    writes: Mutex<Vec<Vec<u8>>>,
    handles: Mutex<HashMap<PlayerHandle, HandleState>>,
    next_id: AtomicU64,
    fail_start: AtomicBool,
    reject_all: bool,
}

impl FakeLibrary {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject_all: true,
            ..Self::default()
        })
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    fn data(&self, handle: PlayerHandle) -> Vec<u8> {
        self.handles.lock().unwrap()[&handle].data.clone()
    }

    fn repeat(&self, handle: PlayerHandle) -> i32 {
        self.handles.lock().unwrap()[&handle].repeat
    }

    /// Raise a notification as the render thread would
    fn fire(&self, handle: PlayerHandle, event: NativeEvent) {
        let listener = self.handles.lock().unwrap()[&handle].listener.clone();
        if let Some(listener) = listener {
            listener.post_event(event);
        }
    }

    fn with<R>(&self, handle: PlayerHandle, f: impl FnOnce(&mut HandleState) -> R) -> R {
        let mut handles = self.handles.lock().unwrap();
        f(handles.entry(handle).or_default())
    }
}

impl SynthLibrary for FakeLibrary {
    fn name(&self) -> &str {
        "fake"
    }

    fn has_tone_control(&self) -> bool {
        false
    }

    fn create_player(&self, _locator: &Locator) -> Result<PlayerHandle, EngineError> {
        if self.reject_all {
            return Err(EngineError::UnknownContent);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PlayerHandle::new(id);
        self.with(handle, |state| state.volume = 100);
        self.record("create");
        Ok(handle)
    }

    fn realize(&self, _handle: PlayerHandle) -> Result<(), EngineError> {
        self.record("realize");
        Ok(())
    }

    fn prefetch(&self, _handle: PlayerHandle) -> Result<Option<u64>, EngineError> {
        self.record("prefetch");
        Ok(Some(1_000_000))
    }

    fn start(&self, _handle: PlayerHandle) -> Result<(), EngineError> {
        self.record("start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Unsupported("start"));
        }
        Ok(())
    }

    fn pause(&self, _handle: PlayerHandle) -> Result<(), EngineError> {
        self.record("pause");
        Ok(())
    }

    fn deallocate(&self, _handle: PlayerHandle) -> Result<(), EngineError> {
        self.record("deallocate");
        Ok(())
    }

    fn close(&self, _handle: PlayerHandle) {
        self.record("close");
    }

    fn finalize(&self, _handle: PlayerHandle) {
        self.record("finalize");
    }

    fn set_media_time(&self, _handle: PlayerHandle, time_us: u64) -> Result<u64, EngineError> {
        Ok(time_us.min(1_000_000))
    }

    fn get_media_time(&self, _handle: PlayerHandle) -> Result<u64, EngineError> {
        Ok(0)
    }

    fn get_duration(&self, _handle: PlayerHandle) -> Option<u64> {
        Some(1_000_000)
    }

    fn set_repeat(&self, handle: PlayerHandle, count: i32) -> Result<(), EngineError> {
        self.with(handle, |state| state.repeat = count);
        Ok(())
    }

    fn set_pan(&self, handle: PlayerHandle, pan: i32) -> Result<i32, EngineError> {
        Ok(self.with(handle, |state| {
            state.pan = pan;
            pan
        }))
    }

    fn get_pan(&self, handle: PlayerHandle) -> i32 {
        self.with(handle, |state| state.pan)
    }

    fn set_mute(&self, handle: PlayerHandle, mute: bool) -> Result<(), EngineError> {
        self.with(handle, |state| state.muted = mute);
        Ok(())
    }

    fn is_muted(&self, handle: PlayerHandle) -> bool {
        self.with(handle, |state| state.muted)
    }

    fn set_volume(&self, handle: PlayerHandle, level: i32) -> Result<i32, EngineError> {
        Ok(self.with(handle, |state| {
            state.volume = level;
            level
        }))
    }

    fn get_volume(&self, handle: PlayerHandle) -> i32 {
        self.with(handle, |state| state.volume)
    }

    fn set_listener(
        &self,
        handle: PlayerHandle,
        listener: Arc<dyn NativeListener>,
    ) -> Result<(), EngineError> {
        self.with(handle, |state| state.listener = Some(listener));
        Ok(())
    }

    fn set_data_source(&self, handle: PlayerHandle, data: &[u8]) -> Result<(), EngineError> {
        self.with(handle, |state| state.data = data.to_vec());
        Ok(())
    }

    fn write_midi(&self, handle: PlayerHandle, data: &[u8]) -> Result<usize, EngineError> {
        if self.count("close") > 0 {
            return Err(EngineError::Closed(handle));
        }
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn metadata(&self, _handle: PlayerHandle) -> Metadata {
        Metadata::from([("title".to_string(), "Fake".to_string())])
    }
}

fn fake_player(library: &Arc<FakeLibrary>, locator: Locator) -> Player {
    Player::new(
        Arc::clone(library) as Arc<dyn SynthLibrary>,
        locator,
        LoopPolicy::AnyNegative,
        ToneConfig::default(),
    )
    .expect("player")
}

fn media() -> Locator {
    Locator::from_bytes(ONE_NOTE.to_vec())
}

/// Listener forwarding every event into a channel
fn recorder(player: &Player) -> (Arc<dyn PlayerListener>, Receiver<PlayerEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener: Arc<dyn PlayerListener> =
        Arc::new(move |_player: &Player, event: &PlayerEvent| {
            let _ = tx.lock().unwrap().send(event.clone());
        });
    player.add_listener(Arc::clone(&listener)).unwrap();
    (listener, rx)
}

fn next(rx: &Receiver<PlayerEvent>) -> PlayerEvent {
    rx.recv_timeout(TIMEOUT).expect("event")
}

/// Wait until `event` arrives, returning everything seen before it
fn drain_until(rx: &Receiver<PlayerEvent>, done: impl Fn(&PlayerEvent) -> bool) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next(rx);
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

#[test]
fn test_start_from_unrealized() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);

    player.start().unwrap();
    assert_eq!(player.state(), PlayerState::Started);
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });

    player.close();
    let events = drain_until(&rx, |e| *e == PlayerEvent::Closed);
    assert!(!events.iter().any(|e| matches!(e, PlayerEvent::Started { .. })));

    let calls = library.calls();
    let lifecycle: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| ["realize", "prefetch", "start"].contains(c))
        .collect();
    assert_eq!(lifecycle, ["realize", "prefetch", "start"]);
}

#[test]
fn test_lifecycle_is_idempotent() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());

    player.realize().unwrap();
    player.realize().unwrap();
    player.prefetch().unwrap();
    player.prefetch().unwrap();
    player.realize().unwrap();
    assert_eq!(player.state(), PlayerState::Prefetched);
    assert_eq!(library.count("realize"), 1);
    assert_eq!(library.count("prefetch"), 1);

    player.stop().unwrap();
    assert_eq!(library.count("pause"), 0);

    player.deallocate().unwrap();
    assert_eq!(player.state(), PlayerState::Unrealized);
    assert_eq!(library.count("deallocate"), 1);
}

#[test]
fn test_stop_and_deallocate_from_started() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);

    player.start().unwrap();
    player.stop().unwrap();
    assert_eq!(player.state(), PlayerState::Prefetched);
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });
    assert_eq!(next(&rx), PlayerEvent::Stopped { media_time_us: 0 });

    player.start().unwrap();
    player.deallocate().unwrap();
    assert_eq!(player.state(), PlayerState::Unrealized);
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });
    assert_eq!(next(&rx), PlayerEvent::Stopped { media_time_us: 0 });
}

#[test]
fn test_close_from_every_state() {
    let setups: [fn(&Player); 4] = [
        |_| {},
        |p| p.realize().unwrap(),
        |p| p.prefetch().unwrap(),
        |p| p.start().unwrap(),
    ];

    for setup in setups {
        let library = FakeLibrary::new();
        let player = fake_player(&library, media());
        player.prefetch().unwrap();
        let volume = player.volume_control().unwrap().unwrap();
        let pan = player.pan_control().unwrap().unwrap();
        let metadata = player.metadata_control().unwrap().unwrap();
        player.deallocate().unwrap();
        assert_eq!(player.state(), PlayerState::Unrealized);

        setup(&player);
        let (_listener, rx) = recorder(&player);
        player.close();
        player.close();
        assert_eq!(player.state(), PlayerState::Closed);

        let events = drain_until(&rx, |e| *e == PlayerEvent::Closed);
        assert_eq!(
            events.iter().filter(|e| **e == PlayerEvent::Closed).count(),
            1
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(library.count("close"), 1);

        assert!(matches!(player.start(), Err(PlayerError::State(_))));
        assert!(matches!(player.stop(), Err(PlayerError::State(_))));
        assert!(matches!(player.realize(), Err(PlayerError::State(_))));
        assert!(matches!(volume.set_level(10), Err(PlayerError::State(_))));
        assert!(matches!(volume.level(), Err(PlayerError::State(_))));
        assert!(matches!(volume.is_muted(), Err(PlayerError::State(_))));
        assert!(matches!(volume.gain(), Err(PlayerError::State(_))));
        assert!(matches!(pan.pan(), Err(PlayerError::State(_))));
        assert!(matches!(metadata.keys(), Err(PlayerError::State(_))));
        assert!(matches!(metadata.key_value("title"), Err(PlayerError::State(_))));
        assert!(matches!(player.media_time(), Err(PlayerError::State(_))));
    }
}

#[test]
fn test_drop_releases_handle() {
    let library = FakeLibrary::new();
    {
        let player = fake_player(&library, media());
        player.start().unwrap();
    }
    assert_eq!(library.count("close"), 1);
    assert_eq!(library.count("finalize"), 1);

    {
        let player = fake_player(&library, media());
        player.close();
    }
    assert_eq!(library.count("close"), 2);
    assert_eq!(library.count("finalize"), 2);
}

#[test]
fn test_set_level_clamps() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    player.realize().unwrap();
    let (_listener, rx) = recorder(&player);
    let volume = player.volume_control().unwrap().expect("volume control");

    assert_eq!(volume.set_level(150).unwrap(), 100);
    assert_eq!(volume.level().unwrap(), 100);
    assert_eq!(volume.set_level(-5).unwrap(), 0);
    assert_eq!(volume.level().unwrap(), 0);

    // Only the change to 0 is reported
    assert_eq!(
        next(&rx),
        PlayerEvent::VolumeChanged {
            level: 0,
            muted: false
        }
    );

    volume.set_mute(true).unwrap();
    volume.set_mute(true).unwrap();
    assert!(volume.is_muted().unwrap());
    assert_eq!(volume.level().unwrap(), 0);
    assert_eq!(
        next(&rx),
        PlayerEvent::VolumeChanged {
            level: 0,
            muted: true
        }
    );
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    assert_eq!(volume.set_gain(255).unwrap(), 255);
    assert_eq!(volume.level().unwrap(), 100);
    assert_eq!(volume.gain().unwrap(), 255);
}

#[test]
fn test_loop_count_rules() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());

    assert!(matches!(
        player.set_loop_count(0),
        Err(PlayerError::InvalidArgument(_))
    ));
    player.set_loop_count(3).unwrap();
    assert_eq!(library.repeat(player.handle()), 3);
    player.set_loop_count(-7).unwrap();

    player.start().unwrap();
    assert!(matches!(
        player.set_loop_count(2),
        Err(PlayerError::State(_))
    ));
    assert!(matches!(
        player.set_loop_count(0),
        Err(PlayerError::InvalidArgument(_))
    ));

    player.stop().unwrap();
    player.set_loop_count(2).unwrap();

    player.close();
    assert!(matches!(
        player.set_loop_count(0),
        Err(PlayerError::InvalidArgument(_))
    ));
    assert!(matches!(
        player.set_loop_count(2),
        Err(PlayerError::State(_))
    ));
}

#[test]
fn test_minus_one_loop_policy() {
    let library = FakeLibrary::new();
    let player = Player::new(
        Arc::clone(&library) as Arc<dyn SynthLibrary>,
        media(),
        LoopPolicy::MinusOne,
        ToneConfig::default(),
    )
    .unwrap();

    player.set_loop_count(-1).unwrap();
    assert!(matches!(
        player.set_loop_count(-2),
        Err(PlayerError::InvalidArgument(_))
    ));
    assert_eq!(library.repeat(player.handle()), -1);
}

#[test]
fn test_program_change_with_bank() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, Locator::MidiDevice);
    player.realize().unwrap();
    let midi = player.midi_control().unwrap().expect("midi control");

    midi.set_program(0, 5, 10).unwrap();
    assert_eq!(
        library.writes(),
        vec![vec![0xB0, 0x00, 0], vec![0xB0, 0x20, 5], vec![0xC0, 10]]
    );
}

#[test]
fn test_midi_control_requires_realize() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, Locator::MidiDevice);
    assert!(matches!(
        player.midi_control(),
        Err(PlayerError::State(_))
    ));

    player.realize().unwrap();
    let midi = player.midi_control().unwrap().unwrap();
    assert!(player.tone_control().unwrap().is_none());
    assert!(player.volume_control().unwrap().is_none());

    midi.short_midi_event(0xF8, 0, 0).unwrap();
    assert!(library.writes().is_empty());
    midi.short_midi_event(0x91, 64, 90).unwrap();
    assert_eq!(library.writes(), vec![vec![0x91, 64, 90]]);

    assert!(matches!(
        midi.short_midi_event(0x90, 128, 0),
        Err(PlayerError::InvalidArgument(_))
    ));
    assert!(matches!(
        midi.set_program(16, -1, 0),
        Err(PlayerError::InvalidArgument(_))
    ));
    assert_eq!(midi.long_midi_event(&[0x90, 60, 100, 0x80], 0, 3).unwrap(), 3);
    assert!(matches!(
        midi.long_midi_event(&[0x90, 60], 1, 5),
        Err(PlayerError::InvalidArgument(_))
    ));

    player.close();
    assert!(matches!(
        midi.short_midi_event(0x90, 60, 100),
        Err(PlayerError::State(_))
    ));
}

#[test]
fn test_midi_writes_racing_close_report_state() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, Locator::MidiDevice);
    player.realize().unwrap();
    let midi = player.midi_control().unwrap().unwrap();

    let writer = std::thread::spawn(move || loop {
        match midi.short_midi_event(0x90, 60, 100) {
            Ok(()) => continue,
            Err(err) => return err,
        }
    });
    std::thread::sleep(Duration::from_millis(20));
    player.close();

    let err = writer.join().unwrap();
    assert!(matches!(err, PlayerError::State(_)), "got {:?}", err);
}

#[test]
fn test_tone_sequence_converted_for_midi_backends() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, Locator::ToneDevice);
    player.realize().unwrap();
    let tone = player.tone_control().unwrap().expect("tone control");

    tone.set_sequence(&ONE_NOTE).unwrap();
    assert!(library.data(player.handle()).starts_with(b"MThd"));

    // Forward reference to a block that is still open
    let open_block = [
        VERSION as u8,
        1,
        TEMPO as u8,
        30,
        BLOCK_START as u8,
        1,
        60,
        100,
        PLAY_BLOCK as u8,
        1,
    ];
    assert!(matches!(
        tone.set_sequence(&open_block),
        Err(PlayerError::Format(_))
    ));

    player.prefetch().unwrap();
    assert!(matches!(
        tone.set_sequence(&ONE_NOTE),
        Err(PlayerError::State(_))
    ));
}

#[test]
fn test_native_end_of_media() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);
    player.start().unwrap();
    assert!(matches!(next(&rx), PlayerEvent::Started { .. }));

    library.fire(player.handle(), NativeEvent::Restart { media_time_us: 1_000_000 });
    assert_eq!(next(&rx), PlayerEvent::EndOfMedia { media_time_us: 1_000_000 });
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });
    assert_eq!(player.state(), PlayerState::Started);

    library.fire(player.handle(), NativeEvent::Stop { media_time_us: 1_000_000 });
    assert_eq!(next(&rx), PlayerEvent::EndOfMedia { media_time_us: 1_000_000 });
    assert_eq!(player.state(), PlayerState::Prefetched);

    // Late stop and loop notifications after the player stopped are ignored
    library.fire(player.handle(), NativeEvent::Stop { media_time_us: 1_000_000 });
    library.fire(player.handle(), NativeEvent::Restart { media_time_us: 1_000_000 });
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(player.state(), PlayerState::Prefetched);
}

#[test]
fn test_restart_after_stop_is_ignored() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);
    player.start().unwrap();
    assert!(matches!(next(&rx), PlayerEvent::Started { .. }));

    player.stop().unwrap();
    assert!(matches!(next(&rx), PlayerEvent::Stopped { .. }));

    library.fire(player.handle(), NativeEvent::Restart { media_time_us: 1_000_000 });
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(player.state(), PlayerState::Prefetched);
}

#[test]
fn test_native_error() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);
    player.start().unwrap();
    next(&rx);

    library.fire(
        player.handle(),
        NativeEvent::Error {
            message: "render failed".to_string(),
        },
    );
    assert_eq!(
        next(&rx),
        PlayerEvent::Error {
            message: "render failed".to_string()
        }
    );
    assert_eq!(player.state(), PlayerState::Prefetched);

    player.close();
    next(&rx);
    library.fire(player.handle(), NativeEvent::VolumeChanged { level: 5 });
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_start_failure_reports_error() {
    let library = FakeLibrary::new();
    library.fail_start.store(true, Ordering::SeqCst);
    let player = fake_player(&library, media());
    let (_listener, rx) = recorder(&player);

    assert!(matches!(player.start(), Err(PlayerError::Engine(_))));
    assert_eq!(player.state(), PlayerState::Prefetched);
    assert!(matches!(next(&rx), PlayerEvent::Started { .. }));
    assert!(matches!(next(&rx), PlayerEvent::Error { .. }));
}

#[test]
fn test_listener_removed_during_callback() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());

    let (seen_tx, seen_rx) = mpsc::channel();
    let seen_tx = Mutex::new(seen_tx);
    let slot: Arc<Mutex<Option<Arc<dyn PlayerListener>>>> = Arc::new(Mutex::new(None));
    let self_ref = Arc::clone(&slot);
    let removing: Arc<dyn PlayerListener> =
        Arc::new(move |player: &Player, event: &PlayerEvent| {
            if let Some(me) = self_ref.lock().unwrap().as_ref() {
                player.remove_listener(me).unwrap();
            }
            let _ = seen_tx.lock().unwrap().send(event.clone());
        });
    *slot.lock().unwrap() = Some(Arc::clone(&removing));
    player.add_listener(Arc::clone(&removing)).unwrap();
    let (_other, rx) = recorder(&player);

    for level in 1..=3 {
        library.fire(player.handle(), NativeEvent::VolumeChanged { level });
    }
    for _ in 0..3 {
        next(&rx);
    }

    assert!(matches!(
        seen_rx.recv_timeout(TIMEOUT).unwrap(),
        PlayerEvent::VolumeChanged { level: 1, .. }
    ));
    assert!(seen_rx.try_recv().is_err());
    *slot.lock().unwrap() = None;
}

#[test]
fn test_listener_registration() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    let (listener, rx) = recorder(&player);
    player.add_listener(Arc::clone(&listener)).unwrap();

    player.start().unwrap();
    assert!(matches!(next(&rx), PlayerEvent::Started { .. }));
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    player.remove_listener(&listener).unwrap();
    player.stop().unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    player.close();
    assert!(matches!(
        player.add_listener(listener),
        Err(PlayerError::State(_))
    ));
}

#[test]
fn test_controls_and_metadata() {
    let library = FakeLibrary::new();
    let player = fake_player(&library, media());
    assert!(matches!(player.controls(), Err(PlayerError::State(_))));

    player.realize().unwrap();
    assert!(player.control("javax.microedition.media.control.VolumeControl").unwrap().is_some());
    assert!(player.control("ToneControl").unwrap().is_none());

    let pan = player.pan_control().unwrap().unwrap();
    assert_eq!(pan.set_pan(-250).unwrap(), -100);
    assert_eq!(pan.pan().unwrap(), -100);

    let metadata = player.metadata_control().unwrap().unwrap();
    assert_eq!(metadata.keys().unwrap(), vec!["title".to_string()]);
    assert_eq!(metadata.key_value("title").unwrap().as_deref(), Some("Fake"));
    assert_eq!(metadata.key_value("author").unwrap(), None);

    assert_eq!(player.set_media_time(-40).unwrap(), 0);
    assert_eq!(player.set_media_time(5_000_000).unwrap(), 1_000_000);
    assert_eq!(player.media_time().unwrap(), None);
    player.prefetch().unwrap();
    assert_eq!(player.media_time().unwrap(), Some(0));
    assert_eq!(player.duration().unwrap(), Some(1_000_000));
}

#[test]
fn test_manager_tries_libraries_in_order() {
    let rejecting = FakeLibrary::rejecting();
    let accepting = FakeLibrary::new();
    let manager = Manager::with_libraries(
        EngineConfig::default(),
        vec![
            Arc::clone(&rejecting) as Arc<dyn SynthLibrary>,
            Arc::clone(&accepting) as Arc<dyn SynthLibrary>,
        ],
    );

    let player = manager.create_player(media()).unwrap();
    assert_eq!(accepting.count("create"), 1);
    player.close();

    let manager = Manager::with_libraries(
        EngineConfig::default(),
        vec![rejecting as Arc<dyn SynthLibrary>],
    );
    assert!(matches!(
        manager.create_player(media()),
        Err(ManagerError::Player(PlayerError::Engine(EngineError::UnknownContent)))
    ));
}

#[test]
fn test_manager_skips_failing_factories() {
    let failing: LibraryFactory =
        Box::new(|_config: &EngineConfig| Err(EngineError::SoundBank("missing".to_string())));
    let working: LibraryFactory = Box::new(|_config: &EngineConfig| {
        Ok(FakeLibrary::new() as Arc<dyn SynthLibrary>)
    });

    let manager = Manager::with_factories(
        EngineConfig::default(),
        vec![("broken".to_string(), failing), ("fake".to_string(), working)],
    )
    .unwrap();
    assert_eq!(manager.libraries().len(), 1);
    assert_eq!(manager.failures()[0].backend, "broken");

    let failing: LibraryFactory =
        Box::new(|_config: &EngineConfig| Err(EngineError::SoundBank("missing".to_string())));
    let err = Manager::with_factories(
        EngineConfig::default(),
        vec![("broken".to_string(), failing)],
    )
    .err()
    .expect("no backend");
    assert!(err.to_string().contains("broken: sound bank error: missing"));
}

fn wave_config() -> EngineConfig {
    let mut config = EngineConfig {
        backends: vec![Backend::Wave],
        ..EngineConfig::default()
    };
    config.audio.output = OutputKind::Null;
    config.audio.sample_rate = 8000;
    config.audio.buffer_size = 128;
    config
}

#[test]
fn test_wave_playback_reaches_end_of_media() {
    let manager = Manager::new(wave_config()).unwrap();
    // Two 125 ms notes at tempo 30, resolution 64
    let bytes = vec![
        VERSION as u8,
        1,
        TEMPO as u8,
        30,
        RESOLUTION as u8,
        64,
        60,
        4,
        64,
        4,
    ];
    let player = manager.create_player(Locator::from_bytes(bytes)).unwrap();
    let (_listener, rx) = recorder(&player);

    player.prefetch().unwrap();
    assert_eq!(player.duration().unwrap(), Some(250_000));

    let started = Instant::now();
    player.start().unwrap();
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });
    assert_eq!(next(&rx), PlayerEvent::EndOfMedia { media_time_us: 250_000 });
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(player.state(), PlayerState::Prefetched);
    assert_eq!(player.media_time().unwrap(), Some(0));

    player.close();
    assert_eq!(next(&rx), PlayerEvent::Closed);
}

#[test]
fn test_wave_playback_loops() {
    let manager = Manager::new(wave_config()).unwrap();
    let bytes = vec![VERSION as u8, 1, TEMPO as u8, 30, RESOLUTION as u8, 64, 72, 2];
    let player = manager.create_player(Locator::from_bytes(bytes)).unwrap();
    let (_listener, rx) = recorder(&player);

    player.set_loop_count(2).unwrap();
    player.start().unwrap();

    let events = drain_until(&rx, |e| matches!(e, PlayerEvent::EndOfMedia { .. }));
    assert_eq!(events.len(), 2);
    assert_eq!(next(&rx), PlayerEvent::Started { media_time_us: 0 });
    assert!(matches!(next(&rx), PlayerEvent::EndOfMedia { .. }));

    let deadline = Instant::now() + TIMEOUT;
    while player.state() == PlayerState::Started && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(player.state(), PlayerState::Prefetched);
    player.close();
}

#[test]
fn test_play_tone_closes_itself() {
    let manager = Manager::new(wave_config()).unwrap();
    manager.play_tone(69, 100, 80).unwrap();
    assert_eq!(manager.active_tones(), 1);

    let deadline = Instant::now() + TIMEOUT;
    while manager.active_tones() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(manager.active_tones(), 0);

    assert!(matches!(
        manager.play_tone(200, 100, 80),
        Err(ManagerError::Player(PlayerError::InvalidArgument(_)))
    ));
}
