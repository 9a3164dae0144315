//! Sender service core logic.
//!
//! Builds a [`FramePipeline`] over the software device and the UDP
//! sender, then ticks it from a blocking thread at the configured rate
//! until stopped. The pipeline's blocking calls (discrete-mode waits,
//! fences) therefore never run on a runtime worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, info};

use framecast_core::{FramePipeline, PipelineStats, SoftwareDevice, UdpSender};

use crate::config::SenderConfig;
use crate::pattern::TestPattern;

type Pipeline = FramePipeline<SoftwareDevice, UdpSender>;

// ── SenderService ────────────────────────────────────────────────

/// The top-level sender service.
pub struct SenderService {
    config: SenderConfig,
    running: Arc<AtomicBool>,
}

impl SenderService {
    /// Create a new service with the given config.
    pub fn new(config: SenderConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Run the service until stopped.
    ///
    /// 1. Builds the software device, UDP sender and pipeline.
    /// 2. Ticks the pipeline with a test pattern on a blocking thread.
    /// 3. Disables the pipeline (final drain, fence, close) when
    ///    `running` becomes `false`.
    pub async fn run(&self) -> Result<PipelineStats, Box<dyn std::error::Error>> {
        self.config.validate()?;
        self.running.store(true, Ordering::SeqCst);

        let runtime = Handle::current();
        let device = SoftwareDevice::new(runtime.clone())
            .with_latency(Duration::from_millis(self.config.device.latency_ms))
            .with_fault_interval(self.config.device.fault_interval);
        let sender = UdpSender::new(self.config.to_sender_config(), runtime)?;
        let pipeline = FramePipeline::new(device, sender, self.config.pipeline.clone())?;

        info!(
            "streaming {:?} {}x{} @ {} fps to {}",
            self.config.pipeline.name,
            self.config.source.width,
            self.config.source.height,
            self.config.source.fps,
            self.config.network.remote
        );

        let driver = Driver {
            pipeline,
            pattern: TestPattern::new(self.config.source.width, self.config.source.height),
            interval: self.config.tick_interval(),
            report_every: u64::from(self.config.source.fps.max(1)) * 5,
            running: Arc::clone(&self.running),
        };
        let stats = tokio::task::spawn_blocking(move || driver.run()).await?;

        self.running.store(false, Ordering::SeqCst);
        info!(
            ticks = stats.ticks,
            sent = stats.frames_sent,
            dropped_full = stats.queue.rejected_full,
            transfer_errors = stats.queue.transfer_errors,
            "sender service stopped"
        );
        Ok(stats)
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Tick loop, run on a blocking thread.
struct Driver {
    pipeline: Pipeline,
    pattern: TestPattern,
    interval: Duration,
    report_every: u64,
    running: Arc<AtomicBool>,
}

impl Driver {
    fn run(mut self) -> PipelineStats {
        self.pipeline.enable();

        let mut index = 0u64;
        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            let image = self.pattern.render(index);
            self.pipeline.update(Some(image));

            index += 1;
            if index % self.report_every == 0 {
                let s = self.pipeline.stats();
                debug!(
                    state = %self.pipeline.state(),
                    ticks = s.ticks,
                    sent = s.frames_sent,
                    in_flight = self.pipeline.queue_len(),
                    "pipeline progress"
                );
            }

            if let Some(rest) = self.interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        self.pipeline.disable();
        self.pipeline.stats()
    }
}

// ── Tests ────────────────────────────────────────────────────────
