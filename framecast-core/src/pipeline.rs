//! Tick-driven orchestration of converter, readback queue and channel.
//!
//! ```text
//!            enable()                 first send
//!  Disabled ─────────► Idle ─────────────────────► Streaming
//!     ▲                  ▲                             │
//!     │                  └──────── rename ─────────────┤
//!     └──────────────────── disable() ─────────────────┘
//! ```
//!
//! One logical tick is `advance_tick` → `on_drain_tick` → `on_tick` →
//! `on_end_of_tick`, which [`FramePipeline::update`] performs in one call.
//! In discrete mode `update` drains again after `on_tick`, so each tick
//! settles on its own.
//! None of the tick entry points return errors: every failure is logged
//! and the affected frame dropped.
//!
//! The pipeline is driven from a single thread. Wrap it in a mutex if
//! more than one thread needs to call into it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, NativeSender, VideoFrame};
use crate::convert::FrameConverter;
use crate::device::{ConversionBackend, Surface};
use crate::error::{EnqueueRejected, FrameError};
use crate::format::PixelFormat;
use crate::readback::{
    DEFAULT_MAX_DEPTH, DrainPolicy, FrameMeta, QueueStats, ReadbackQueue, ReadyFrame,
};

// ── ExecutionMode ────────────────────────────────────────────────

/// How ticks arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Real-time cadence; drains never block.
    #[default]
    Continuous,
    /// Sporadic ticks; every tick settles fully before returning.
    Discrete,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continuous => write!(f, "continuous"),
            Self::Discrete => write!(f, "discrete"),
        }
    }
}

// ── PipelineState ────────────────────────────────────────────────

/// Lifecycle state of a [`FramePipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not enabled; queue and channel torn down.
    Disabled,
    /// Enabled, no sender instance open.
    Idle,
    /// Enabled with an open sender instance.
    Streaming,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "Disabled"),
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

// ── PipelineConfig ───────────────────────────────────────────────

/// Configuration for [`FramePipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name the sender advertises.
    pub name: String,
    /// Wire pixel format.
    pub format: PixelFormat,
    /// Flip native formats vertically during conversion.
    pub invert_y: bool,
    /// Tick cadence.
    pub mode: ExecutionMode,
    /// Readback requests allowed in flight.
    pub max_queue_depth: usize,
    /// Bound on each blocking wait in discrete mode, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Total bound on the final drain at disable, in milliseconds.
    pub teardown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "framecast".into(),
            format: PixelFormat::Uyva,
            invert_y: true,
            mode: ExecutionMode::Continuous,
            max_queue_depth: DEFAULT_MAX_DEPTH,
            wait_timeout_ms: 1000,
            teardown_timeout_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.name.trim().is_empty() {
            return Err(FrameError::InvalidConfig("sender name must not be empty"));
        }
        if self.max_queue_depth == 0 {
            return Err(FrameError::InvalidConfig("max_queue_depth must be > 0"));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

// ── PipelineStats ────────────────────────────────────────────────

/// Lifetime counters of a [`FramePipeline`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Logical ticks advanced.
    pub ticks: u64,
    /// Frames handed to the sender.
    pub frames_sent: u64,
    /// Frames dropped because conversion failed.
    pub conversion_errors: u64,
    /// Ready frames dropped because the sender could not take them.
    pub send_errors: u64,
    /// Native sender instances created.
    pub channel_opens: u64,
    /// Readback queue counters.
    pub queue: QueueStats,
}

// ── FramePipeline ────────────────────────────────────────────────

/// Frame capture → readback → sender pipeline.
pub struct FramePipeline<B: ConversionBackend, S: NativeSender> {
    converter: FrameConverter<B>,
    queue: ReadbackQueue<B::Transfer>,
    channel: Channel<S>,
    config: PipelineConfig,
    tick: u64,
    enabled: bool,
    /// Cached `is_available` from the last enable.
    available: bool,
    /// Inside a run of queue-full rejections; gates the warning.
    saturated: bool,
    stats: PipelineStats,
}

impl<B: ConversionBackend, S: NativeSender> FramePipeline<B, S> {
    /// Build a disabled pipeline.
    pub fn new(backend: B, sender: S, config: PipelineConfig) -> Result<Self, FrameError> {
        config.validate()?;
        Ok(Self {
            converter: FrameConverter::new(backend),
            queue: ReadbackQueue::new(config.max_queue_depth),
            channel: Channel::new(sender, config.name.clone()),
            config,
            tick: 0,
            enabled: false,
            available: false,
            saturated: false,
            stats: PipelineStats::default(),
        })
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn state(&self) -> PipelineState {
        if !self.enabled {
            PipelineState::Disabled
        } else if self.channel.is_open() {
            PipelineState::Streaming
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `false` when the sender subsystem was absent at the last enable.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current tick id.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Requests in flight.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            queue: self.queue.stats(),
            ..self.stats
        }
    }

    pub fn converter(&self) -> &FrameConverter<B> {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut FrameConverter<B> {
        &mut self.converter
    }

    pub fn channel(&self) -> &Channel<S> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut Channel<S> {
        &mut self.channel
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Switch tick cadence. Takes effect on the next tick.
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        if mode != self.config.mode {
            debug!(from = %self.config.mode, to = %mode, "execution mode changed");
            self.config.mode = mode;
        }
    }

    /// Change the wire format of subsequently enqueued frames.
    pub fn set_format(&mut self, format: PixelFormat) {
        self.config.format = format;
    }

    pub fn set_invert_y(&mut self, invert_y: bool) {
        self.config.invert_y = invert_y;
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Enter `Idle`. When the sender subsystem is absent the pipeline
    /// stays enabled but every tick is a no-op.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.available = self.channel.sender().is_available();
        if self.available {
            info!(name = %self.config.name, mode = %self.config.mode, "pipeline enabled");
        } else {
            warn!("native sender unavailable; pipeline will not send frames");
        }
    }

    /// Tear down: one bounded blocking drain whose frames are still sent,
    /// a fence, then the remaining requests are discarded and the channel
    /// closed.
    pub fn on_disable(&mut self) {
        if !self.enabled {
            return;
        }

        if self.available && !self.queue.is_empty() {
            let frames = self
                .queue
                .drain(DrainPolicy::Teardown(self.config.teardown_timeout()));
            self.send_all(frames);
            self.channel.fence();
        }

        if let Some(oldest) = self.queue.pending().next() {
            warn!(
                "discarding {} unresolved readbacks at disable (oldest: tick {}, {:?} in flight)",
                self.queue.len(),
                oldest.meta().tick,
                oldest.age()
            );
        }
        self.queue.clear();

        self.channel.close();
        self.converter.release();
        self.queue.reset_tick();
        self.saturated = false;
        self.enabled = false;
        info!(name = %self.config.name, "pipeline disabled");
    }

    /// Alias of [`on_disable`](Self::on_disable).
    pub fn disable(&mut self) {
        self.on_disable();
    }

    /// Rename the advertised sender. An open instance is replaced lazily.
    pub fn on_rename(&mut self, new_name: &str) {
        if new_name == self.config.name {
            return;
        }
        self.config.name = new_name.to_string();
        self.channel.rename(new_name);
    }

    // ── Tick entry points ────────────────────────────────────────

    /// Start a new logical tick.
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.stats.ticks += 1;
        self.tick
    }

    /// Convert `source` and start its readback. Dropped when the queue
    /// is full or this tick already enqueued a frame.
    pub fn on_tick(&mut self, source: &B::Image) {
        if !self.is_active() {
            return;
        }

        let tick = self.tick;
        if let Err(reason) = self.queue.admit(tick) {
            self.note_rejection(reason);
            return;
        }

        let format = self.config.format;
        if let Err(e) = self.converter.convert(source, format, self.config.invert_y) {
            self.stats.conversion_errors += 1;
            warn!("frame conversion failed on tick {tick}; dropping frame: {e}");
            return;
        }

        let meta = FrameMeta {
            width: source.width(),
            height: source.height(),
            format,
            tick,
        };
        let Some((backend, scratch)) = self.converter.transfer_source() else {
            return;
        };
        match self
            .queue
            .try_enqueue(meta, || backend.begin_transfer(scratch))
        {
            Ok(()) => self.saturated = false,
            Err(reason) => self.note_rejection(reason),
        }
    }

    /// Forward resolved readbacks to the channel. Blocks in discrete mode.
    pub fn on_drain_tick(&mut self) {
        if !self.is_active() {
            return;
        }
        let policy = match self.config.mode {
            ExecutionMode::Continuous => DrainPolicy::Poll,
            ExecutionMode::Discrete => DrainPolicy::Wait(self.config.wait_timeout()),
        };
        let frames = self.queue.drain(policy);
        self.send_all(frames);
    }

    /// Fence the sender so no buffer handed over this tick is still being
    /// read when the host reuses memory.
    pub fn on_end_of_tick(&mut self) {
        if !self.is_active() {
            return;
        }
        match self.config.mode {
            ExecutionMode::Continuous => self.channel.fence(),
            ExecutionMode::Discrete => {
                if self.channel.is_open() {
                    self.channel.fence();
                }
            }
        }
    }

    /// One full logical tick: drain, enqueue `source` (if any), fence.
    ///
    /// In discrete mode the frame enqueued this tick is waited for and
    /// sent before the fence, so nothing is left in flight on return.
    pub fn update(&mut self, source: Option<&B::Image>) {
        self.advance_tick();
        self.on_drain_tick();
        if let Some(source) = source {
            self.on_tick(source);
            if self.config.mode == ExecutionMode::Discrete {
                self.on_drain_tick();
            }
        }
        self.on_end_of_tick();
    }

    /// Push everything in flight out now, blocking regardless of mode,
    /// then fence. Used when no further tick is expected soon.
    pub fn flush(&mut self) {
        if !self.is_active() {
            return;
        }
        let frames = self
            .queue
            .drain(DrainPolicy::Wait(self.config.wait_timeout()));
        self.send_all(frames);
        self.channel.fence();
    }

    // ── Internal ─────────────────────────────────────────────────

    fn is_active(&self) -> bool {
        self.enabled && self.available
    }

    fn note_rejection(&mut self, reason: EnqueueRejected) {
        match reason {
            EnqueueRejected::QueueFull { depth } => {
                if !self.saturated {
                    warn!("too many readback requests in flight ({depth}); dropping frames");
                    self.saturated = true;
                }
            }
            EnqueueRejected::DuplicateTick { tick } => {
                trace!("tick {tick} already enqueued; dropping duplicate");
            }
        }
    }

    fn send_all(&mut self, frames: Vec<ReadyFrame>) {
        for frame in frames {
            if let Err(e) = self.send_frame(frame) {
                self.stats.send_errors += 1;
                debug!("frame not sent: {e}");
            }
        }
    }

    fn send_frame(&mut self, frame: ReadyFrame) -> Result<(), FrameError> {
        let was_open = self.channel.is_open();
        self.channel.ensure_open(&self.config.name)?;
        if !was_open {
            self.stats.channel_opens += 1;
        }
        self.channel.send(VideoFrame::from(frame))?;
        self.stats.frames_sent += 1;
        Ok(())
    }
}

impl<B: ConversionBackend, S: NativeSender> Drop for FramePipeline<B, S> {
    fn drop(&mut self) {
        self.on_disable();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::KernelPass;
    use crate::testing::{FakeBackend, FakeImage, FakeSender, SenderEvent, TransferScript};

    type Pipeline = FramePipeline<FakeBackend, FakeSender>;

    fn pipeline(script: TransferScript, mode: ExecutionMode) -> Pipeline {
        let backend = FakeBackend {
            script,
            ..FakeBackend::default()
        };
        let config = PipelineConfig {
            name: "Cam1".into(),
            mode,
            ..PipelineConfig::default()
        };
        let mut p = FramePipeline::new(backend, FakeSender::default(), config).unwrap();
        p.enable();
        p
    }

    fn src() -> FakeImage {
        FakeImage::new(64, 32)
    }

    // ── Log capture ──────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run `f` with every event at TRACE and above written to a buffer.
    fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        let buf = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buf.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        (out, text.lines().map(str::to_owned).collect())
    }

    fn warnings(lines: &[String]) -> Vec<&String> {
        lines.iter().filter(|l| l.contains("WARN")).collect()
    }

    #[test]
    fn config_validation() {
        let mut cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.max_queue_depth = 0;
        assert!(cfg.validate().is_err());
        cfg.max_queue_depth = 4;
        cfg.name = "  ".into();
        assert!(matches!(
            FramePipeline::new(FakeBackend::default(), FakeSender::default(), cfg),
            Err(FrameError::InvalidConfig(_))
        ));
    }

    #[test]
    fn starts_disabled_and_ignores_ticks() {
        let mut p = FramePipeline::new(
            FakeBackend::default(),
            FakeSender::default(),
            PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(p.state(), PipelineState::Disabled);
        p.update(Some(&src()));
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.converter().backend().conversions, 0);
    }

    #[test]
    fn five_back_to_back_enqueues_keep_four() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
        for _ in 0..5 {
            p.advance_tick();
            p.on_tick(&src());
        }
        assert_eq!(p.queue_len(), 4);
        assert_eq!(p.stats().queue.rejected_full, 1);
        // Rejected before conversion.
        assert_eq!(p.converter().backend().conversions, 4);
    }

    #[test]
    fn repeated_callbacks_in_one_tick_enqueue_once() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
        p.advance_tick();
        p.on_tick(&src());
        p.on_tick(&src());
        p.on_tick(&src());
        assert_eq!(p.queue_len(), 1);
        assert_eq!(p.converter().backend().transfers.len(), 1);
    }

    #[test]
    fn first_send_opens_channel() {
        let mut p = pipeline(TransferScript::Immediate, ExecutionMode::Continuous);
        assert_eq!(p.state(), PipelineState::Idle);

        p.update(Some(&src()));
        // Enqueued this tick, drained next tick.
        assert_eq!(p.state(), PipelineState::Idle);
        p.update(None);
        assert_eq!(p.state(), PipelineState::Streaming);

        let sender = p.channel().sender();
        assert_eq!(sender.creates(), 1);
        assert_eq!(
            sender.events[1],
            SenderEvent::Send {
                name: "Cam1".into(),
                width: 64,
                height: 32,
                format: PixelFormat::Uyva,
                len: 64 * 32 * 3,
            }
        );
        assert_eq!(p.stats().frames_sent, 1);
        assert_eq!(p.stats().channel_opens, 1);
    }

    #[test]
    fn continuous_fences_every_tick_once_open() {
        let mut p = pipeline(TransferScript::Immediate, ExecutionMode::Continuous);
        p.update(Some(&src()));
        for _ in 0..3 {
            p.update(Some(&src()));
        }
        assert_eq!(p.channel().sender().fences(), 3);
    }

    #[test]
    fn continuous_drain_does_not_wait() {
        let mut p = pipeline(TransferScript::AfterPolls(3), ExecutionMode::Continuous);
        p.advance_tick();
        p.on_tick(&src());
        p.on_drain_tick();
        assert_eq!(p.queue_len(), 1);
        assert_eq!(p.channel().sender().sends(), 0);
    }

    #[test]
    fn discrete_drain_blocks_until_resolved() {
        let mut p = pipeline(TransferScript::AfterPolls(3), ExecutionMode::Discrete);
        p.advance_tick();
        p.on_tick(&src());
        p.on_drain_tick();
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.channel().sender().sends(), 1);
        assert_eq!(p.converter().backend().transfers[0].waits(), 1);
    }

    #[test]
    fn discrete_update_settles_its_own_frame() {
        let mut p = pipeline(TransferScript::AfterPolls(2), ExecutionMode::Discrete);
        p.update(Some(&src()));
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.channel().sender().sends(), 1);
        assert_eq!(p.channel().sender().fences(), 1);
        assert_eq!(p.state(), PipelineState::Streaming);
    }

    #[test]
    fn discrete_end_of_tick_skips_fence_when_closed() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Discrete);
        p.update(Some(&src()));
        assert!(!p.channel().is_open());
        assert_eq!(p.channel().sender().fences(), 0);
    }

    #[test]
    fn errored_transfer_is_skipped() {
        let mut p = pipeline(TransferScript::Fail, ExecutionMode::Continuous);
        p.update(Some(&src()));
        p.on_drain_tick();
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.channel().sender().sends(), 0);
        assert_eq!(p.stats().queue.transfer_errors, 1);
    }

    #[test]
    fn conversion_error_drops_frame_and_keeps_running() {
        let mut p = pipeline(TransferScript::Immediate, ExecutionMode::Continuous);
        p.converter_mut().backend_mut().missing_pass = Some(KernelPass::PackUyva);
        p.update(Some(&src()));
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.stats().conversion_errors, 1);

        p.converter_mut().backend_mut().missing_pass = None;
        p.update(Some(&src()));
        assert_eq!(p.queue_len(), 1);
        assert!(p.is_enabled());
    }

    #[test]
    fn unavailable_sender_makes_pipeline_noop() {
        let mut p = FramePipeline::new(
            FakeBackend::default(),
            FakeSender::unavailable(),
            PipelineConfig::default(),
        )
        .unwrap();
        p.enable();
        assert!(!p.is_available());
        for _ in 0..3 {
            p.update(Some(&src()));
        }
        p.flush();
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.converter().backend().conversions, 0);
        assert!(p.channel().sender().events.is_empty());
    }

    #[test]
    fn rename_replaces_sender_on_next_send() {
        let mut p = pipeline(TransferScript::Immediate, ExecutionMode::Continuous);
        p.update(Some(&src()));
        p.update(Some(&src()));
        assert!(p.channel().is_open());

        p.on_rename("Cam2");
        assert_eq!(p.state(), PipelineState::Idle);
        assert_eq!(p.name(), "Cam2");

        p.update(None);
        let sender = p.channel().sender();
        assert_eq!(sender.creates(), 2);
        assert_eq!(sender.destroys(), 1);
        assert!(
            sender
                .events
                .contains(&SenderEvent::Create("Cam2".into()))
        );
    }

    #[test]
    fn disable_sends_resolved_and_closes() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
        for _ in 0..2 {
            p.advance_tick();
            p.on_tick(&src());
        }
        for ctl in &p.converter().backend().transfers {
            ctl.complete();
        }

        p.on_disable();
        assert_eq!(p.state(), PipelineState::Disabled);
        assert_eq!(p.queue_len(), 0);

        let events = &p.channel().sender().events;
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                SenderEvent::Create(_) => "create",
                SenderEvent::Send { .. } => "send",
                SenderEvent::Fence(_) => "fence",
                SenderEvent::Destroy(_) => "destroy",
            })
            .collect();
        assert_eq!(kinds, vec!["create", "send", "send", "fence", "fence", "destroy"]);
        assert_eq!(p.converter().backend().live, 0);
    }

    #[test]
    fn disable_abandons_stuck_transfer() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
        for _ in 0..2 {
            p.advance_tick();
            p.on_tick(&src());
        }
        p.converter().backend().transfers[1].complete();

        p.on_disable();
        assert_eq!(p.channel().sender().sends(), 1);
        assert_eq!(p.stats().queue.abandoned, 1);
        assert!(!p.channel().is_open());
    }

    #[test]
    fn reenable_starts_fresh() {
        let mut p = pipeline(TransferScript::Immediate, ExecutionMode::Continuous);
        p.update(Some(&src()));
        let tick = p.tick();
        p.on_disable();
        p.enable();
        assert_eq!(p.state(), PipelineState::Idle);

        // Same tick id is accepted again after the rebuild.
        p.on_tick(&src());
        assert_eq!(p.tick(), tick);
        assert_eq!(p.queue_len(), 1);
    }

    #[test]
    fn flush_sends_without_next_tick() {
        let mut p = pipeline(TransferScript::AfterPolls(2), ExecutionMode::Continuous);
        p.update(Some(&src()));
        assert_eq!(p.queue_len(), 1);
        p.flush();
        assert_eq!(p.queue_len(), 0);
        assert_eq!(p.channel().sender().sends(), 1);
        assert_eq!(p.channel().sender().fences(), 1);
    }

    #[test]
    fn set_mode_switches_drain_policy() {
        let mut p = pipeline(TransferScript::AfterPolls(2), ExecutionMode::Continuous);
        p.advance_tick();
        p.on_tick(&src());
        p.set_mode(ExecutionMode::Discrete);
        assert_eq!(p.mode(), ExecutionMode::Discrete);
        p.on_drain_tick();
        assert_eq!(p.channel().sender().sends(), 1);
    }

    #[test]
    fn saturation_warning_resets_after_success() {
        let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
        p.config.max_queue_depth = 1;
        p.queue = ReadbackQueue::new(1);

        p.advance_tick();
        p.on_tick(&src());
        p.advance_tick();
        p.on_tick(&src());
        assert!(p.saturated);

        p.converter().backend().transfers[0].complete();
        p.update(Some(&src()));
        assert!(!p.saturated);
    }

    #[test]
    fn saturation_warns_once_per_event() {
        let (p, lines) = capture_logs(|| {
            let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
            for _ in 0..6 {
                p.update(Some(&src()));
            }
            p
        });
        assert_eq!(p.stats().queue.rejected_full, 2);
        let warned = warnings(&lines);
        assert_eq!(warned.len(), 1);
        assert!(warned[0].contains("too many readback requests in flight (4)"));

        // A successful enqueue re-arms the warning.
        let (p, lines) = capture_logs(move || {
            let mut p = p;
            p.converter().backend().transfers[0].complete();
            p.update(Some(&src()));
            p.update(Some(&src()));
            p
        });
        assert_eq!(p.stats().queue.rejected_full, 3);
        assert_eq!(warnings(&lines).len(), 1);
    }

    #[test]
    fn duplicate_tick_is_silent() {
        let (p, lines) = capture_logs(|| {
            let mut p = pipeline(TransferScript::Manual, ExecutionMode::Continuous);
            p.advance_tick();
            for _ in 0..3 {
                p.on_tick(&src());
            }
            p
        });
        assert_eq!(p.stats().queue.rejected_duplicate, 2);
        assert!(warnings(&lines).is_empty());
        assert_eq!(
            lines.iter().filter(|l| l.contains("already enqueued")).count(),
            2
        );
    }

    #[test]
    fn config_parses_from_toml() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            name = "Stage Left"
            format = "bgra"
            mode = "discrete"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.name, "Stage Left");
        assert_eq!(cfg.format, PixelFormat::Bgra);
        assert_eq!(cfg.mode, ExecutionMode::Discrete);
        assert_eq!(cfg.max_queue_depth, DEFAULT_MAX_DEPTH);
    }
}
