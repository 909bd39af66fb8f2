//! The closed-loop sampling/actuation controller.
//!
//! One background worker owns the monitor outright and runs the cycle
//!
//! ```text
//!   freeze ─▶ read counter ─▶ threshold? ─▶ inject stall (blocking)
//!      ▲                                        │
//!      └── sleep ◀─ unfreeze ◀─ clear ovf ◀─ reset ctr
//! ```
//!
//! until told to stop. Because the injection is a blocking remote call,
//! the loop's own throughput is bounded by the stall it injects; that is
//! intended: the stall is the emulated latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::pmon::{EventDescriptor, Monitor, MonitorError};

use super::smp::{self, DelayTarget};

/// Tuning knobs for the sampling loop.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Event the monitor is programmed to count.
    pub event: EventDescriptor,
    /// Access count at or above which a stall is injected.
    pub threshold: u64,
    /// Pause between sampling cycles.
    pub sample_interval: Duration,
    /// Pause between programming the box and the first sample.
    pub settle: Duration,
    /// Pause after a failed dispatch before the loop continues.
    pub backoff: Duration,
    /// CPU the sampler should run on. The HA box is socket-affine, so
    /// sampling from a CPU on the wrong socket silently skews results.
    pub sampling_cpu: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            event: crate::pmon::events::REMOTE_ACCESS,
            threshold: 1000,
            sample_interval: Duration::from_millis(10),
            settle: Duration::from_millis(100),
            backoff: Duration::from_millis(2000),
            sampling_cpu: 1,
        }
    }
}

/// Handle to the running sampling worker.
///
/// Owns the stop flag and the join handle; the monitor and the delay
/// target move into the worker at start and are released when it exits.
/// Teardown order is therefore controller, then monitor, then box, then
/// endpoint, all by ownership.
pub struct Controller {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Controller {
    /// Program the box and start the sampling worker.
    pub fn start(
        monitor: Monitor,
        target: Box<dyn DelayTarget>,
        tuning: Tuning,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("nvm-emu-sampler".into())
            .spawn(move || sampler(monitor, target, tuning, flag))?;
        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Signal the worker to stop and wait for it to exit.
    ///
    /// The stop flag is only observed between cycles, never during an
    /// outstanding injection, so this can take up to one sampling interval
    /// plus the remaining duration of an in-flight stall.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker body: pin, validate placement, program, loop.
fn sampler(
    mut monitor: Monitor,
    target: Box<dyn DelayTarget>,
    tuning: Tuning,
    stop: Arc<AtomicBool>,
) {
    if let Err(e) = smp::pin_current_thread(tuning.sampling_cpu) {
        log::warn!("could not pin sampler to cpu {}: {e}", tuning.sampling_cpu);
    }
    match smp::current_cpu() {
        Some(cpu) if cpu == tuning.sampling_cpu => {}
        cpu => log::warn!(
            "sampler on cpu {cpu:?} instead of cpu {}; emulation results may be inaccurate",
            tuning.sampling_cpu
        ),
    }

    if let Err(e) = program(&mut monitor, tuning.event) {
        log::error!("programming the monitoring box failed: {e}");
        return;
    }
    thread::sleep(tuning.settle);
    log::info!(
        "emulation started: counting {}, threshold {}, stalls on cpu {}",
        tuning.event.name,
        tuning.threshold,
        target.cpu()
    );

    loop {
        if let Err(e) = cycle(&mut monitor, target.as_ref(), &tuning) {
            // Abandon the cycle, leave the counters alone, and try to get
            // the box counting again for the next interval.
            log::warn!("sampling cycle abandoned: {e}");
            let _ = monitor.unfreeze();
        }
        if stop.load(Ordering::Acquire) {
            log::info!("stop signal received, sampler exiting");
            return;
        }
        thread::sleep(tuning.sample_interval);
    }
}

/// One-time programming sequence, run with the box frozen.
fn program(monitor: &mut Monitor, event: EventDescriptor) -> Result<(), MonitorError> {
    monitor.freeze()?;
    monitor.reset_controls()?;
    monitor.reset_counters()?;
    monitor.clear_overflow()?;
    monitor.disable_overflow()?;
    monitor.select_event(event)?;
    monitor.enable()?;
    monitor.unfreeze()
}

/// One sampling cycle.
fn cycle(
    monitor: &mut Monitor,
    target: &dyn DelayTarget,
    tuning: &Tuning,
) -> Result<(), MonitorError> {
    monitor.freeze()?;
    let count = monitor.read_counter()?;
    log::trace!("{}: {count}", monitor.event().name);

    if count >= tuning.threshold {
        log::debug!(
            "{count} {} over threshold {}, injecting stall",
            monitor.event().name,
            tuning.threshold
        );
        if let Err(e) = target.inject(count) {
            // Transient by contract; the monitoring mission outlives a
            // momentarily unreachable target.
            log::warn!("stall dispatch failed: {e}; backing off");
            thread::sleep(tuning.backoff);
        }
    }

    monitor.reset_counter()?;
    // Overflow interrupts are off, but the status bits latch anyway and
    // must be cleared by hand.
    monitor.clear_overflow()?;
    monitor.unfreeze()
}
