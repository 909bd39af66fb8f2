//! Cross-processor delay dispatch.
//!
//! The sampling loop never stalls its own CPU; it hands the stall to a
//! worker pinned on the target CPU and blocks until the worker finishes.
//! That request/ack round trip is the user-space shape of a synchronous
//! remote-processor call: the caller resumes only after the remote side
//! has burned the requested wall-clock time.

use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use thiserror::Error;

use super::delay::{busy_wait, stall_duration};

/// Dispatch failures. Transient by contract: the sampling loop backs off
/// and retries rather than treating them as fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The target worker is gone or never started.
    #[error("delay target on cpu {cpu} unreachable")]
    Unreachable {
        /// The CPU the stall was meant for.
        cpu: u32,
    },
}

/// Restrict the calling thread to a single CPU.
pub fn pin_current_thread(cpu: u32) -> io::Result<()> {
    // SAFETY: cpu_set_t is plain data; zeroed is its empty state, and the
    // CPU_* macros only touch the set they are given.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu as usize, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// CPU the calling thread is currently running on.
pub fn current_cpu() -> Option<u32> {
    // SAFETY: sched_getcpu takes no arguments and only returns a value.
    let cpu = unsafe { libc::sched_getcpu() };
    u32::try_from(cpu).ok()
}

/// Something that can execute a stall of the given magnitude on behalf of
/// the sampling loop, synchronously.
pub trait DelayTarget: Send {
    /// CPU the stall lands on.
    fn cpu(&self) -> u32;

    /// Run the stall; returns only once it has completed.
    fn inject(&self, magnitude: u64) -> Result<(), DispatchError>;
}

struct Request {
    magnitude: u64,
    done: mpsc::Sender<()>,
}

/// A delay worker pinned to one CPU.
///
/// Requests are served strictly one at a time; `inject` blocks the caller
/// for the full stall duration. Dropping the injector closes the request
/// channel, which ends the worker, and joins it.
pub struct PinnedInjector {
    cpu: u32,
    requests: Option<mpsc::Sender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl PinnedInjector {
    /// Spawn the worker and pin it to `cpu`.
    ///
    /// A failed pin is logged and tolerated: the stall still happens,
    /// just without the affinity guarantee.
    pub fn spawn(cpu: u32) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Request>();
        let worker = thread::Builder::new()
            .name(format!("delay-cpu{cpu}"))
            .spawn(move || {
                if let Err(e) = pin_current_thread(cpu) {
                    log::warn!("could not pin delay worker to cpu {cpu}: {e}");
                }
                while let Ok(req) = rx.recv() {
                    log::info!(
                        "stall on cpu {:?}, access count {}",
                        current_cpu(),
                        req.magnitude
                    );
                    busy_wait(stall_duration(req.magnitude));
                    // Receiver may have given up; the stall already happened.
                    let _ = req.done.send(());
                }
            })?;
        Ok(Self {
            cpu,
            requests: Some(tx),
            worker: Some(worker),
        })
    }
}

impl DelayTarget for PinnedInjector {
    fn cpu(&self) -> u32 {
        self.cpu
    }

    fn inject(&self, magnitude: u64) -> Result<(), DispatchError> {
        let unreachable = DispatchError::Unreachable { cpu: self.cpu };
        let requests = self.requests.as_ref().ok_or(unreachable.clone())?;
        let (done_tx, done_rx) = mpsc::channel();
        requests
            .send(Request {
                magnitude,
                done: done_tx,
            })
            .map_err(|_| unreachable.clone())?;
        done_rx.recv().map_err(|_| unreachable)
    }
}

impl Drop for PinnedInjector {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_blocks_for_the_stall() {
        let injector = PinnedInjector::spawn(0).unwrap();
        let start = std::time::Instant::now();
        // Magnitude 20 -> 10ms stall.
        injector.inject(20).unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_inject_serializes_requests() {
        let injector = PinnedInjector::spawn(0).unwrap();
        let start = std::time::Instant::now();
        injector.inject(10).unwrap();
        injector.inject(10).unwrap();
        // Two 5ms stalls back to back, not overlapped.
        assert!(start.elapsed() >= std::time::Duration::from_millis(10));
    }

    #[test]
    fn test_drop_joins_worker() {
        let injector = PinnedInjector::spawn(0).unwrap();
        injector.inject(0).unwrap();
        drop(injector);
    }
}
