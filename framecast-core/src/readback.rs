//! Bounded FIFO of in-flight device-to-host transfers.
//!
//! [`ReadbackQueue`] enforces three rules:
//!
//! - at most `max_depth` requests are in flight; a further enqueue is
//!   rejected and the candidate frame dropped (backpressure, not blocking),
//! - at most one request is created per tick,
//! - completed transfers leave strictly in enqueue order. A later request
//!   that resolved early waits behind an earlier unresolved one.
//!
//! A request whose transfer failed is dropped with a warning and draining
//! continues with the next one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::device::{Transfer, TransferStatus};
use crate::error::EnqueueRejected;
use crate::format::PixelFormat;

/// Default number of requests allowed in flight.
pub const DEFAULT_MAX_DEPTH: usize = 4;

// ── FrameMeta ────────────────────────────────────────────────────

/// What the sender needs to know about a frame besides its bytes.
///
/// `width` / `height` are the *source* dimensions, not the scratch
/// image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Wire format of the converted bytes.
    pub format: PixelFormat,
    /// Tick that produced the frame.
    pub tick: u64,
}

// ── TransferRequest ──────────────────────────────────────────────

/// One in-flight transfer. Immutable once created.
pub struct TransferRequest<T> {
    meta: FrameMeta,
    transfer: T,
    enqueued_at: Instant,
}

impl<T> TransferRequest<T> {
    /// Frame metadata.
    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    /// Time since the request was enqueued.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// A drained frame ready to be handed to the sender.
#[derive(Debug, Clone)]
pub struct ReadyFrame {
    /// Frame metadata.
    pub meta: FrameMeta,
    /// Host-side converted bytes.
    pub data: Bytes,
}

// ── DrainPolicy ──────────────────────────────────────────────────

/// How [`ReadbackQueue::drain`] treats an unresolved head request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Stop at the first unresolved request.
    Poll,
    /// Block on each head request for up to the given duration; a head
    /// still pending after that stays queued and draining stops.
    Wait(Duration),
    /// Final drain: block for at most the given total duration, then
    /// abandon whatever is still unresolved.
    Teardown(Duration),
}

// ── QueueStats ───────────────────────────────────────────────────

/// Lifetime counters of a [`ReadbackQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Requests accepted.
    pub enqueued: u64,
    /// Enqueues refused because the queue was full.
    pub rejected_full: u64,
    /// Enqueues refused because the tick already produced a request.
    pub rejected_duplicate: u64,
    /// Requests drained with bytes.
    pub completed: u64,
    /// Requests dropped because the transfer failed.
    pub transfer_errors: u64,
    /// Blocking waits that hit their deadline.
    pub wait_timeouts: u64,
    /// Requests discarded unresolved at teardown.
    pub abandoned: u64,
}

// ── ReadbackQueue ────────────────────────────────────────────────

/// Bounded FIFO of [`TransferRequest`]s.
pub struct ReadbackQueue<T: Transfer> {
    requests: VecDeque<TransferRequest<T>>,
    max_depth: usize,
    last_tick: Option<u64>,
    stats: QueueStats,
}

impl<T: Transfer> ReadbackQueue<T> {
    /// Create a queue holding at most `max_depth` requests (minimum 1).
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            requests: VecDeque::with_capacity(max_depth),
            max_depth,
            last_tick: None,
            stats: QueueStats::default(),
        }
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// `true` when a further enqueue would be rejected as full.
    pub fn is_full(&self) -> bool {
        self.requests.len() >= self.max_depth
    }

    /// Depth cap.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Tick of the most recent accepted request.
    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Lifetime counters.
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Queued requests, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &TransferRequest<T>> {
        self.requests.iter()
    }

    /// Would an enqueue for `tick` be accepted? Does not mutate.
    pub fn check(&self, tick: u64) -> Result<(), EnqueueRejected> {
        if self.is_full() {
            return Err(EnqueueRejected::QueueFull {
                depth: self.requests.len(),
            });
        }
        if self.last_tick == Some(tick) {
            return Err(EnqueueRejected::DuplicateTick { tick });
        }
        Ok(())
    }

    /// [`check`](Self::check), counting a rejection in the stats.
    pub fn admit(&mut self, tick: u64) -> Result<(), EnqueueRejected> {
        self.check(tick).inspect_err(|reason| match reason {
            EnqueueRejected::QueueFull { .. } => self.stats.rejected_full += 1,
            EnqueueRejected::DuplicateTick { .. } => self.stats.rejected_duplicate += 1,
        })
    }

    /// Append a request for `meta`, starting its transfer with `start`.
    ///
    /// `start` runs only when the request is accepted. A rejected
    /// enqueue leaves the queue untouched apart from its counters.
    pub fn try_enqueue<F>(&mut self, meta: FrameMeta, start: F) -> Result<(), EnqueueRejected>
    where
        F: FnOnce() -> T,
    {
        self.admit(meta.tick)?;

        self.last_tick = Some(meta.tick);
        self.requests.push_back(TransferRequest {
            meta,
            transfer: start(),
            enqueued_at: Instant::now(),
        });
        self.stats.enqueued += 1;
        Ok(())
    }

    /// Remove resolved requests from the head of the queue.
    ///
    /// Returns the successfully transferred frames in enqueue order. An
    /// empty queue yields nothing.
    pub fn drain(&mut self, policy: DrainPolicy) -> Vec<ReadyFrame> {
        let mut ready = Vec::new();
        let deadline = match policy {
            DrainPolicy::Teardown(budget) => Some(Instant::now() + budget),
            _ => None,
        };

        while let Some(head) = self.requests.front_mut() {
            let status = match policy {
                DrainPolicy::Poll => head.transfer.status(),
                DrainPolicy::Wait(timeout) => head.transfer.wait(timeout),
                DrainPolicy::Teardown(budget) => {
                    let remaining =
                        deadline.map_or(budget, |d| d.saturating_duration_since(Instant::now()));
                    head.transfer.wait(remaining)
                }
            };

            match status {
                TransferStatus::Pending => {
                    match policy {
                        DrainPolicy::Poll => {}
                        DrainPolicy::Wait(timeout) => {
                            self.stats.wait_timeouts += 1;
                            warn!(
                                "readback for tick {} still pending after {timeout:?}",
                                head.meta.tick
                            );
                        }
                        DrainPolicy::Teardown(_) => {
                            let tick = head.meta.tick;
                            self.requests.pop_front();
                            self.stats.abandoned += 1;
                            warn!("abandoning unresolved readback for tick {tick}");
                            continue;
                        }
                    }
                    break;
                }
                TransferStatus::Failed => {
                    if let Some(mut req) = self.requests.pop_front() {
                        self.stats.transfer_errors += 1;
                        let detail = req
                            .transfer
                            .read_bytes()
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        warn!("GPU readback error on tick {}: {detail}", req.meta.tick);
                    }
                }
                TransferStatus::Done => {
                    if let Some(mut req) = self.requests.pop_front() {
                        match req.transfer.read_bytes() {
                            Ok(data) => {
                                self.stats.completed += 1;
                                ready.push(ReadyFrame {
                                    meta: req.meta,
                                    data,
                                });
                            }
                            Err(e) => {
                                self.stats.transfer_errors += 1;
                                warn!("GPU readback error on tick {}: {e}", req.meta.tick);
                            }
                        }
                    }
                }
            }
        }

        if !ready.is_empty() {
            debug!(count = ready.len(), remaining = self.requests.len(), "drained readbacks");
        }
        ready
    }

    /// Discard every queued request without waiting. Returns how many
    /// were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.requests.len();
        self.requests.clear();
        self.stats.abandoned += n as u64;
        n
    }

    /// Forget the last enqueued tick.
    pub fn reset_tick(&mut self) {
        self.last_tick = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────
