//! Scripted collaborators for exercising the pipeline without a GPU or
//! a network.
//!
//! [`FakeBackend`] hands out [`FakeTransfer`]s whose completion is driven
//! by a shared [`TransferControl`]; [`FakeSender`] records every call it
//! receives as a [`SenderEvent`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use crate::channel::{NativeSender, VideoFrame};
use crate::device::{ConversionBackend, Surface, Transfer, TransferStatus};
use crate::error::FrameError;
use crate::format::{KernelPass, PixelFormat, SCRATCH_BYTES_PER_TEXEL};

/// Upper bound on polls a blocking [`FakeTransfer::wait`] performs before
/// it reports a timeout.
const WAIT_POLL_LIMIT: u32 = 1024;

// ── FakeImage ────────────────────────────────────────────────────

/// A dimension-only image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeImage {
    pub width: u32,
    pub height: u32,
}

impl FakeImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Surface for FakeImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

// ── TransferControl ──────────────────────────────────────────────

#[derive(Debug)]
struct ControlState {
    status: TransferStatus,
    /// Resolve to `Done` once this many polls have been observed.
    resolve_after: Option<u32>,
    polls: u32,
    waits: u32,
    len: usize,
}

/// Shared switch deciding when a [`FakeTransfer`] resolves.
#[derive(Debug, Clone)]
pub struct TransferControl(Arc<Mutex<ControlState>>);

impl TransferControl {
    fn with(status: TransferStatus, resolve_after: Option<u32>, len: usize) -> Self {
        Self(Arc::new(Mutex::new(ControlState {
            status,
            resolve_after,
            polls: 0,
            waits: 0,
            len,
        })))
    }

    /// Never resolves until [`complete`](Self::complete) or [`fail`](Self::fail).
    pub fn pending(len: usize) -> Self {
        Self::with(TransferStatus::Pending, None, len)
    }

    /// Already complete, yielding `len` bytes.
    pub fn done(len: usize) -> Self {
        Self::with(TransferStatus::Done, None, len)
    }

    /// Already failed.
    pub fn failed() -> Self {
        Self::with(TransferStatus::Failed, None, 0)
    }

    /// Reports pending for the first `polls` polls, then done.
    pub fn after_polls(polls: u32, len: usize) -> Self {
        Self::with(TransferStatus::Pending, Some(polls), len)
    }

    /// A transfer driven by this control.
    pub fn transfer(&self) -> FakeTransfer {
        FakeTransfer {
            control: self.clone(),
        }
    }

    /// Resolve successfully.
    pub fn complete(&self) {
        self.lock().status = TransferStatus::Done;
    }

    /// Resolve with an error.
    pub fn fail(&self) {
        self.lock().status = TransferStatus::Failed;
    }

    /// Number of status polls observed.
    pub fn polls(&self) -> u32 {
        self.lock().polls
    }

    /// Number of blocking waits observed.
    pub fn waits(&self) -> u32 {
        self.lock().waits
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── FakeTransfer ─────────────────────────────────────────────────

/// Transfer whose completion is scripted by a [`TransferControl`].
#[derive(Debug)]
pub struct FakeTransfer {
    control: TransferControl,
}

impl Transfer for FakeTransfer {
    fn status(&mut self) -> TransferStatus {
        let mut st = self.control.lock();
        if st.status == TransferStatus::Pending
            && st.resolve_after.is_some_and(|n| st.polls >= n)
        {
            st.status = TransferStatus::Done;
        }
        st.polls += 1;
        st.status
    }

    fn wait(&mut self, _timeout: Duration) -> TransferStatus {
        self.control.lock().waits += 1;
        for _ in 0..WAIT_POLL_LIMIT {
            let s = self.status();
            if s.is_resolved() {
                return s;
            }
        }
        TransferStatus::Pending
    }

    fn read_bytes(&mut self) -> Result<Bytes, FrameError> {
        let st = self.control.lock();
        match st.status {
            TransferStatus::Done => Ok(Bytes::from(vec![0u8; st.len])),
            TransferStatus::Failed => Err(FrameError::Transfer("injected fault".into())),
            TransferStatus::Pending => Err(FrameError::Timeout(Duration::ZERO)),
        }
    }
}

// ── FakeBackend ──────────────────────────────────────────────────

/// How new transfers started by [`FakeBackend`] behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferScript {
    /// Complete immediately.
    #[default]
    Immediate,
    /// Stay pending until resolved through [`FakeBackend::transfers`].
    Manual,
    /// Resolve after the given number of polls.
    AfterPolls(u32),
    /// Fail immediately.
    Fail,
}

/// Conversion backend that only tracks allocations and transfers.
#[derive(Debug, Default)]
pub struct FakeBackend {
    /// Pass the backend pretends not to have.
    pub missing_pass: Option<KernelPass>,
    /// Behaviour of newly started transfers.
    pub script: TransferScript,
    /// Controls of every transfer started, oldest first.
    pub transfers: Vec<TransferControl>,
    pub allocations: u32,
    pub releases: u32,
    pub live: u32,
    pub conversions: u32,
}

impl ConversionBackend for FakeBackend {
    type Image = FakeImage;
    type Transfer = FakeTransfer;

    fn allocate(&mut self, width: u32, height: u32) -> Result<FakeImage, FrameError> {
        self.allocations += 1;
        self.live += 1;
        Ok(FakeImage::new(width, height))
    }

    fn release(&mut self, _image: FakeImage) {
        self.releases += 1;
        self.live = self.live.saturating_sub(1);
    }

    fn convert(
        &mut self,
        _source: &FakeImage,
        _target: &mut FakeImage,
        pass: KernelPass,
    ) -> Result<(), FrameError> {
        if self.missing_pass == Some(pass) {
            return Err(FrameError::KernelUnavailable(pass));
        }
        self.conversions += 1;
        Ok(())
    }

    fn begin_transfer(&mut self, image: &FakeImage) -> FakeTransfer {
        let len = image.width as usize * image.height as usize * SCRATCH_BYTES_PER_TEXEL;
        let control = match self.script {
            TransferScript::Immediate => TransferControl::done(len),
            TransferScript::Manual => TransferControl::pending(len),
            TransferScript::AfterPolls(n) => TransferControl::after_polls(n, len),
            TransferScript::Fail => TransferControl::failed(),
        };
        let transfer = control.transfer();
        self.transfers.push(control);
        transfer
    }
}

// ── FakeSender ───────────────────────────────────────────────────

/// A call observed by [`FakeSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    Create(String),
    Destroy(String),
    Send {
        name: String,
        width: u32,
        height: u32,
        format: PixelFormat,
        len: usize,
    },
    Fence(String),
}

/// Handle issued by [`FakeSender`].
#[derive(Debug)]
pub struct FakeHandle {
    pub id: u32,
    pub name: String,
}

/// Native sender that records calls.
#[derive(Debug)]
pub struct FakeSender {
    pub available: bool,
    pub fail_create: bool,
    pub events: Vec<SenderEvent>,
    pub(crate) next_id: u32,
}

impl Default for FakeSender {
    fn default() -> Self {
        Self {
            available: true,
            fail_create: false,
            events: Vec::new(),
            next_id: 0,
        }
    }
}

impl FakeSender {
    /// A sender reporting the subsystem as absent.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn creates(&self) -> usize {
        self.count(|e| matches!(e, SenderEvent::Create(_)))
    }

    pub fn destroys(&self) -> usize {
        self.count(|e| matches!(e, SenderEvent::Destroy(_)))
    }

    pub fn sends(&self) -> usize {
        self.count(|e| matches!(e, SenderEvent::Send { .. }))
    }

    pub fn fences(&self) -> usize {
        self.count(|e| matches!(e, SenderEvent::Fence(_)))
    }

    fn count(&self, pred: impl Fn(&SenderEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl NativeSender for FakeSender {
    type Handle = FakeHandle;

    fn is_available(&self) -> bool {
        self.available
    }

    fn create(&mut self, name: &str) -> Option<FakeHandle> {
        if self.fail_create {
            return None;
        }
        self.events.push(SenderEvent::Create(name.to_string()));
        self.next_id += 1;
        Some(FakeHandle {
            id: self.next_id,
            name: name.to_string(),
        })
    }

    fn destroy(&mut self, handle: FakeHandle) {
        self.events.push(SenderEvent::Destroy(handle.name));
    }

    fn send(&mut self, handle: &FakeHandle, frame: VideoFrame) {
        self.events.push(SenderEvent::Send {
            name: handle.name.clone(),
            width: frame.width,
            height: frame.height,
            format: frame.format,
            len: frame.data.len(),
        });
    }

    fn fence(&mut self, handle: &FakeHandle) {
        self.events.push(SenderEvent::Fence(handle.name.clone()));
    }
}
