// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Per-player render pipelines.
//!
//! A `Pipeline` owns everything the engine keeps for one handle: the media,
//! the shared `PipelineCore` and the output thread pulling audio from it.
//! The core is only locked briefly by the output thread once per buffer;
//! notifications gathered while rendering are posted after the lock is
//! released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, warn};

use super::{ContentType, EngineError, Locator, NativeEvent, NativeListener, PlayerHandle};
use crate::audio::{
    compute_gain, pan_gains, AudioConfig, AudioOutput, Renderer, RENDER_CHANNELS,
};
use crate::config::ToneConfig;
use crate::midi::{messages, parse_stream, ChannelMessage, Metadata, StreamEvent, Timeline};
use crate::tone;

/// Frames rendered between timeline checks
pub const BLOCK_FRAMES: usize = 64;

/// Highest volume level
pub const MAX_LEVEL: u8 = 100;

/// Creates a renderer at the given sample rate
pub type RendererFactory =
    Arc<dyn Fn(u32) -> Result<Box<dyn Renderer>, EngineError> + Send + Sync>;

/// State shared between a pipeline and its output thread
pub struct PipelineCore {
    renderer: Option<Box<dyn Renderer>>,
    /// None for the live MIDI device
    timeline: Option<Arc<Timeline>>,
    cursor: usize,
    /// Media time at the last seek
    base_us: u64,
    /// Frames rendered since the last seek
    frames: u64,
    sample_rate: u32,
    playing: bool,
    loop_count: i32,
    loops_left: i32,
    level: u8,
    muted: bool,
    pan: i32,
    listener: Option<Arc<dyn NativeListener>>,
}

impl PipelineCore {
    /// Create an idle core
    pub fn new(sample_rate: u32) -> Self {
        Self {
            renderer: None,
            timeline: None,
            cursor: 0,
            base_us: 0,
            frames: 0,
            sample_rate: sample_rate.max(1),
            playing: false,
            loop_count: 1,
            loops_left: 1,
            level: MAX_LEVEL,
            muted: false,
            pan: 0,
            listener: None,
        }
    }

    /// Install or drop the renderer
    pub fn set_renderer(&mut self, renderer: Option<Box<dyn Renderer>>) {
        self.renderer = renderer;
    }

    /// Check if a renderer is installed
    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Replace the media and rewind
    pub fn set_timeline(&mut self, timeline: Option<Arc<Timeline>>) {
        self.timeline = timeline;
        self.rewind();
    }

    /// Media duration; None for live input
    pub fn duration_us(&self) -> Option<u64> {
        self.timeline.as_ref().map(|t| t.duration_us())
    }

    /// Current media time
    pub fn media_time_us(&self) -> u64 {
        self.base_us + self.frames * 1_000_000 / self.sample_rate as u64
    }

    /// Check if the output is producing media
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Resume or pause media playback
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        if !playing {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.all_notes_off();
            }
        }
    }

    /// Set how many times the media plays; negative loops forever
    pub fn set_repeat(&mut self, count: i32) {
        self.loop_count = count;
        self.loops_left = count;
    }

    /// Set volume level, clamped to 0-100
    pub fn set_level(&mut self, level: i32) -> u8 {
        self.level = level.clamp(0, MAX_LEVEL as i32) as u8;
        self.level
    }

    /// Volume level
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Set the mute flag
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Mute flag
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Set pan, clamped to -100..=100
    pub fn set_pan(&mut self, pan: i32) -> i32 {
        self.pan = pan.clamp(-100, 100);
        self.pan
    }

    /// Pan position
    pub fn pan(&self) -> i32 {
        self.pan
    }

    /// Register the notification receiver
    pub fn set_listener(&mut self, listener: Option<Arc<dyn NativeListener>>) {
        self.listener = listener;
    }

    /// Notification receiver
    pub fn listener(&self) -> Option<Arc<dyn NativeListener>> {
        self.listener.clone()
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.base_us = 0;
        self.frames = 0;
    }

    /// Move to `time_us`, clamped to the media duration.
    ///
    /// The renderer is reset and every non-note message before the target is
    /// replayed so controllers and programs match the new position.
    pub fn seek(&mut self, time_us: u64) -> u64 {
        let target = match self.duration_us() {
            Some(duration) => time_us.min(duration),
            None => time_us,
        };

        if let Some(timeline) = self.timeline.as_ref() {
            let cursor = timeline.position(target);
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.reset();
                for event in &timeline.events()[..cursor] {
                    if !matches!(
                        event.message,
                        ChannelMessage::NoteOn { .. } | ChannelMessage::NoteOff { .. }
                    ) {
                        renderer.dispatch(&event.message);
                    }
                }
            }
            self.cursor = cursor;
        }

        self.base_us = target;
        self.frames = 0;
        target
    }

    /// Fill `buffer` with interleaved stereo audio.
    ///
    /// Returns the notifications raised while rendering.
    pub fn render(&mut self, buffer: &mut [f32]) -> Vec<NativeEvent> {
        let mut events = Vec::new();
        let gain = compute_gain(if self.muted { 0 } else { self.level });
        let (left_gain, right_gain) = pan_gains(self.pan);

        for block in buffer.chunks_mut(BLOCK_FRAMES * RENDER_CHANNELS) {
            if !self.playing {
                block.fill(0.0);
                continue;
            }
            let Some(renderer) = self.renderer.as_mut() else {
                block.fill(0.0);
                continue;
            };

            let frames = (block.len() / RENDER_CHANNELS) as u64;
            let block_end_us =
                self.base_us + (self.frames + frames) * 1_000_000 / self.sample_rate as u64;

            if let Some(timeline) = self.timeline.as_ref() {
                let pending = &timeline.events()[self.cursor..];
                let due = pending.partition_point(|e| e.time_us < block_end_us);
                for event in &pending[..due] {
                    renderer.dispatch(&event.message);
                }
                self.cursor += due;
            }

            if let Err(e) = renderer.render(block) {
                error!("Render failed: {}", e);
                block.fill(0.0);
                self.playing = false;
                events.push(NativeEvent::Error {
                    message: e.to_string(),
                });
                continue;
            }

            for frame in block.chunks_mut(RENDER_CHANNELS) {
                frame[0] *= gain * left_gain;
                if frame.len() > 1 {
                    frame[1] *= gain * right_gain;
                }
            }
            self.frames += frames;

            if let Some(event) = self.check_end_of_media() {
                events.push(event);
            }
        }

        events
    }

    fn check_end_of_media(&mut self) -> Option<NativeEvent> {
        let timeline = self.timeline.as_ref()?;
        let duration = timeline.duration_us();
        if self.cursor < timeline.events().len() || self.media_time_us() < duration {
            return None;
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.reset();
        }
        self.rewind();

        let again = if self.loops_left < 0 {
            // Empty media would restart on every block
            duration > 0
        } else {
            self.loops_left -= 1;
            self.loops_left > 0
        };

        if again {
            Some(NativeEvent::Restart {
                media_time_us: duration,
            })
        } else {
            self.playing = false;
            self.loops_left = self.loop_count;
            Some(NativeEvent::Stop {
                media_time_us: duration,
            })
        }
    }

    /// Send a raw MIDI run to the renderer.
    ///
    /// GM master volume messages change the pipeline volume instead.
    pub fn write_midi(&mut self, data: &[u8]) -> Vec<NativeEvent> {
        let mut events = Vec::new();
        for event in parse_stream(data) {
            match event {
                StreamEvent::Channel(message) => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.dispatch(&message);
                    }
                }
                StreamEvent::SysEx(sysex) => {
                    if let Some(level) = master_volume_level(&sysex) {
                        self.level = level;
                        events.push(NativeEvent::VolumeChanged { level });
                    } else {
                        debug!("Ignoring {} byte system exclusive message", sysex.len());
                    }
                }
            }
        }
        events
    }
}

/// Volume level carried by a GM master volume message
fn master_volume_level(sysex: &[u8]) -> Option<u8> {
    match sysex {
        [messages::SYSEX_START, 0x7F, _, 0x04, 0x01, lsb, msb, messages::SYSEX_END] => {
            let value = ((*msb as u32) << 7) | *lsb as u32;
            Some((value * MAX_LEVEL as u32 / 0x3FFF) as u8)
        }
        _ => None,
    }
}

/// Deliver notifications outside the core lock
pub fn post_events(listener: Option<Arc<dyn NativeListener>>, events: Vec<NativeEvent>) {
    if let Some(listener) = listener {
        for event in events {
            listener.post_event(event);
        }
    }
}

/// Build the output thread callback for `core`
pub fn render_callback(core: Arc<Mutex<PipelineCore>>) -> impl FnMut(&mut [f32]) + Send + 'static {
    move |buffer: &mut [f32]| {
        let (events, listener) = {
            let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
            let events = core.render(buffer);
            (events, core.listener())
        };
        post_events(listener, events);
    }
}

/// Everything the engine keeps for one handle
pub struct Pipeline {
    handle: PlayerHandle,
    locator: Locator,
    content: Arc<[u8]>,
    content_type: Option<ContentType>,
    core: Arc<Mutex<PipelineCore>>,
    output: Option<AudioOutput>,
    metadata: Metadata,
    closed: bool,
}

impl Pipeline {
    /// Create a pipeline for `locator`, reading its media
    pub fn new(
        handle: PlayerHandle,
        locator: &Locator,
        sample_rate: u32,
    ) -> Result<Self, EngineError> {
        let content = locator.load()?;
        let content_type = match locator {
            Locator::MidiDevice => None,
            Locator::ToneDevice => Some(ContentType::Tone),
            Locator::Memory {
                content_type: Some(kind),
                ..
            } => Some(*kind),
            _ => ContentType::sniff(&content),
        };

        Ok(Self {
            handle,
            locator: locator.clone(),
            content,
            content_type,
            core: Arc::new(Mutex::new(PipelineCore::new(sample_rate))),
            output: None,
            metadata: Metadata::new(),
            closed: false,
        })
    }

    /// Lock the shared core
    pub fn core(&self) -> MutexGuard<'_, PipelineCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail if the pipeline was closed
    pub fn check_open(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::Closed(self.handle))
        } else {
            Ok(())
        }
    }

    fn not_ready(&self, required: &'static str) -> EngineError {
        EngineError::NotReady {
            handle: self.handle,
            required,
        }
    }

    /// Check if the output thread is running
    pub fn is_prefetched(&self) -> bool {
        self.output.is_some()
    }

    /// Media text metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn build_timeline(&self, tone: &ToneConfig) -> Result<Option<Timeline>, EngineError> {
        if self.locator == Locator::MidiDevice {
            return Ok(None);
        }
        if self.content.is_empty() && self.locator == Locator::ToneDevice {
            return Ok(Some(Timeline::default()));
        }
        let timeline = match self.content_type {
            Some(ContentType::Midi) => Timeline::from_smf(&self.content)?,
            Some(ContentType::Tone) => {
                let sequence = tone::decode(&self.content)?;
                Timeline::from_tone(&sequence, tone.channel, tone.program)
            }
            None => return Err(EngineError::UnknownContent),
        };
        Ok(Some(timeline))
    }

    /// Parse the media and create the renderer
    pub fn realize(
        &mut self,
        factory: &RendererFactory,
        tone: &ToneConfig,
    ) -> Result<(), EngineError> {
        self.check_open()?;
        if self.core().has_renderer() {
            return Ok(());
        }

        let timeline = self.build_timeline(tone)?;
        let sample_rate = self.core().sample_rate;
        let renderer = factory(sample_rate)?;

        if let Some(timeline) = timeline.as_ref() {
            self.metadata = timeline.metadata().clone();
        }
        let mut core = self.core();
        core.set_renderer(Some(renderer));
        core.set_timeline(timeline.map(Arc::new));
        debug!("Realized player {} for {}", self.handle, self.locator);
        Ok(())
    }

    /// Replace the media of a tone device
    pub fn set_data_source(&mut self, data: &[u8], tone: &ToneConfig) -> Result<(), EngineError> {
        self.check_open()?;
        if self.locator != Locator::ToneDevice {
            return Err(EngineError::Unsupported("a tone sequence"));
        }
        if self.output.is_some() {
            return Err(self.not_ready("deallocated"));
        }

        let previous = (Arc::clone(&self.content), self.content_type);
        self.content = Arc::from(data);
        self.content_type = ContentType::sniff(data);

        let timeline = match self.build_timeline(tone) {
            Ok(timeline) => timeline,
            Err(e) => {
                (self.content, self.content_type) = previous;
                return Err(e);
            }
        };
        self.core().set_timeline(timeline.map(Arc::new));
        Ok(())
    }

    /// Start the output thread, initially paused
    pub fn prefetch(&mut self, audio: &AudioConfig) -> Result<Option<u64>, EngineError> {
        self.check_open()?;
        if !self.core().has_renderer() {
            return Err(self.not_ready("realized"));
        }
        if self.output.is_none() {
            let name = format!("synth-output-{}", self.handle.id());
            let callback = render_callback(Arc::clone(&self.core));
            self.output = Some(AudioOutput::new(audio.clone(), &name, callback)?);
        }
        Ok(self.core().duration_us())
    }

    /// Resume playback
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.check_open()?;
        let Some(output) = self.output.as_ref() else {
            return Err(self.not_ready("prefetched"));
        };
        self.core().set_playing(true);
        output.play()?;
        Ok(())
    }

    /// Pause playback
    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.check_open()?;
        self.core().set_playing(false);
        if let Some(output) = self.output.as_ref() {
            output.pause()?;
        }
        Ok(())
    }

    /// Stop the output thread
    pub fn deallocate(&mut self) -> Result<(), EngineError> {
        self.check_open()?;
        self.core().set_playing(false);
        // Joins the output thread, which only takes the core lock
        self.output = None;
        Ok(())
    }

    /// Release every resource
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut core = self.core();
            core.set_playing(false);
            core.set_listener(None);
        }
        self.output = None;
        let mut core = self.core();
        core.set_renderer(None);
        core.set_timeline(None);
        debug!("Closed player {}", self.handle);
    }

    /// Seek; returns the position actually set
    pub fn set_media_time(&mut self, time_us: u64) -> Result<u64, EngineError> {
        self.check_open()?;
        Ok(self.core().seek(time_us))
    }

    /// Send raw MIDI bytes; returns bytes accepted
    pub fn write_midi(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        self.check_open()?;
        if self.locator != Locator::MidiDevice {
            return Err(EngineError::Unsupported("MIDI input"));
        }
        let (events, listener) = {
            let mut core = self.core();
            if !core.has_renderer() {
                return Err(self.not_ready("realized"));
            }
            (core.write_midi(data), core.listener())
        };
        post_events(listener, events);
        Ok(data.len())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Player {} dropped without close", self.handle);
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioError;
    use crate::tone::commands::*;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
        fail: bool,
    }

    struct Recorder(Arc<Mutex<Log>>);

    impl Recorder {
        fn push(&self, call: String) {
            self.0.lock().unwrap().calls.push(call);
        }
    }

    impl Renderer for Recorder {
        fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
            self.push(format!("on {} {} {}", channel, note, velocity));
        }
        fn note_off(&mut self, channel: u8, note: u8) {
            self.push(format!("off {} {}", channel, note));
        }
        fn control_change(&mut self, channel: u8, control: u8, value: u8) {
            if control != messages::CC_ALL_NOTES_OFF && control != messages::CC_ALL_SOUND_OFF {
                self.push(format!("cc {} {} {}", channel, control, value));
            }
        }
        fn program_change(&mut self, channel: u8, program: u8) {
            self.push(format!("pc {} {}", channel, program));
        }
        fn pitch_bend(&mut self, _channel: u8, _value: i16) {}
        fn reset(&mut self) {
            self.push("reset".to_string());
        }
        fn render(&mut self, buffer: &mut [f32]) -> Result<(), AudioError> {
            if self.0.lock().unwrap().fail {
                return Err(AudioError::RenderFailed("broken".to_string()));
            }
            buffer.fill(1.0);
            Ok(())
        }
    }

    /// 1000 Hz makes one 64-frame block last 64 ms
    fn core_with(bytes: &[u8]) -> (PipelineCore, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut core = PipelineCore::new(1000);
        let sequence = tone::decode(bytes).unwrap();
        core.set_renderer(Some(Box::new(Recorder(Arc::clone(&log)))));
        core.set_timeline(Some(Arc::new(Timeline::from_tone(&sequence, 0, 0))));
        (core, log)
    }

    /// Two 125 ms notes at tempo 120 bpm, resolution 64
    fn two_notes() -> Vec<u8> {
        vec![
            VERSION as u8, 1, TEMPO as u8, 30, RESOLUTION as u8, 64, 60, 4, 62, 4,
        ]
    }

    fn block() -> Vec<f32> {
        vec![0.0; BLOCK_FRAMES * RENDER_CHANNELS]
    }

    #[test]
    fn test_paused_core_renders_silence() {
        let (mut core, log) = core_with(&two_notes());
        let mut buffer = vec![1.0; 256];
        assert!(core.render(&mut buffer).is_empty());
        assert!(buffer.iter().all(|s| *s == 0.0));
        assert!(log.lock().unwrap().calls.is_empty());
        assert_eq!(core.media_time_us(), 0);
    }

    #[test]
    fn test_dispatches_due_events_and_stops() {
        let (mut core, log) = core_with(&two_notes());
        core.set_playing(true);
        assert_eq!(core.duration_us(), Some(250_000));

        let mut events = Vec::new();
        for _ in 0..4 {
            events.extend(core.render(&mut block()));
        }
        assert_eq!(
            events,
            vec![NativeEvent::Stop {
                media_time_us: 250_000
            }]
        );
        assert!(!core.is_playing());
        assert_eq!(core.media_time_us(), 0);

        let calls = log.lock().unwrap().calls.clone();
        assert_eq!(
            calls,
            vec!["pc 0 0", "on 0 60 127", "off 0 60", "on 0 62 127", "off 0 62", "reset"]
        );
    }

    #[test]
    fn test_loops_restart_then_stop() {
        let (mut core, _log) = core_with(&two_notes());
        core.set_repeat(2);
        core.set_playing(true);

        let mut events = Vec::new();
        for _ in 0..8 {
            events.extend(core.render(&mut block()));
        }
        assert_eq!(
            events,
            vec![
                NativeEvent::Restart {
                    media_time_us: 250_000
                },
                NativeEvent::Stop {
                    media_time_us: 250_000
                },
            ]
        );
    }

    #[test]
    fn test_infinite_loop_keeps_restarting() {
        let (mut core, _log) = core_with(&two_notes());
        core.set_repeat(-1);
        core.set_playing(true);

        let mut restarts = 0;
        for _ in 0..40 {
            for event in core.render(&mut block()) {
                assert!(matches!(event, NativeEvent::Restart { .. }));
                restarts += 1;
            }
        }
        assert_eq!(restarts, 10);
        assert!(core.is_playing());
    }

    #[test]
    fn test_render_failure_raises_error() {
        let (mut core, log) = core_with(&two_notes());
        core.set_playing(true);
        log.lock().unwrap().fail = true;

        let events = core.render(&mut block());
        assert!(matches!(events.as_slice(), [NativeEvent::Error { .. }]));
        assert!(!core.is_playing());
    }

    #[test]
    fn test_gain_and_pan_applied() {
        let (mut core, _log) = core_with(&two_notes());
        core.set_playing(true);
        core.set_pan(100);
        let mut buffer = block();
        core.render(&mut buffer);
        assert_eq!(buffer[0], 0.0);
        assert!((buffer[1] - 1.0).abs() < 1e-6);

        core.set_pan(0);
        core.set_muted(true);
        core.render(&mut buffer);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_seek_clamps_and_replays_controllers() {
        let (mut core, log) = core_with(&two_notes());
        assert_eq!(core.seek(10_000_000), 250_000);
        assert_eq!(core.media_time_us(), 250_000);

        log.lock().unwrap().calls.clear();
        assert_eq!(core.seek(130_000), 130_000);
        assert_eq!(core.media_time_us(), 130_000);
        // Program change replayed, notes skipped
        assert_eq!(log.lock().unwrap().calls, vec!["reset", "pc 0 0"]);
    }

    #[test]
    fn test_master_volume_sysex() {
        let mut core = PipelineCore::new(1000);
        let events = core.write_midi(&[0xF0, 0x7F, 0x7F, 0x04, 0x01, 0x00, 0x40, 0xF7]);
        assert_eq!(events, vec![NativeEvent::VolumeChanged { level: 50 }]);
        assert_eq!(core.level(), 50);

        assert_eq!(master_volume_level(&[0xF0, 0x7F, 0x7F, 0x04, 0x01, 0x7F, 0x7F, 0xF7]), Some(100));
        assert_eq!(master_volume_level(&[0xF0, 0x43, 0x10, 0xF7]), None);
    }

    #[test]
    fn test_write_midi_reaches_renderer() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut core = PipelineCore::new(1000);
        core.set_renderer(Some(Box::new(Recorder(Arc::clone(&log)))));
        let events = core.write_midi(&[0x90, 60, 100, 62, 100, 0xC1, 5]);
        assert!(events.is_empty());
        assert_eq!(
            log.lock().unwrap().calls,
            vec!["on 0 60 100", "on 0 62 100", "pc 1 5"]
        );
    }

    #[test]
    fn test_pipeline_requires_realize_before_prefetch() {
        let mut pipeline =
            Pipeline::new(PlayerHandle::new(1), &Locator::ToneDevice, 8000).unwrap();
        let audio = AudioConfig {
            output: crate::audio::OutputKind::Null,
            ..AudioConfig::default()
        };
        assert!(matches!(
            pipeline.prefetch(&audio),
            Err(EngineError::NotReady { .. })
        ));
        pipeline.close();
        assert!(matches!(pipeline.start(), Err(EngineError::Closed(_))));
    }

    #[test]
    fn test_set_data_source_rejects_bad_tone() {
        let mut pipeline =
            Pipeline::new(PlayerHandle::new(2), &Locator::ToneDevice, 8000).unwrap();
        let tone = ToneConfig::default();
        let result = pipeline.set_data_source(&[VERSION as u8, 1, 60, 8], &tone);
        assert!(matches!(result, Err(EngineError::Format(_))));
        pipeline.set_data_source(&two_notes(), &tone).unwrap();
        assert_eq!(pipeline.core().duration_us(), Some(250_000));
    }
}
