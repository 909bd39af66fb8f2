//! Delay policy and the stall primitive.

use std::time::{Duration, Instant};

/// Convert a measured access count into a stall duration.
///
/// Pure policy: half a millisecond of stall per counted access. Heavier
/// remote traffic in the sampling interval produces a proportionally
/// longer stall.
pub fn stall_duration(magnitude: u64) -> Duration {
    Duration::from_millis(magnitude / 2)
}

/// Occupy the current CPU for `duration` of wall-clock time.
///
/// Spins on the monotonic clock without yielding or sleeping; the whole
/// point is that the target CPU is genuinely unavailable for the duration,
/// the way a stalled memory access would hold it.
pub fn busy_wait(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
