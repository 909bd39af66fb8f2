//! Test infrastructure shared across the crate's unit tests.
//!
//! [`StubBus`] is an in-memory config-space register bank implementing
//! [`ConfigBus`]; [`RecordingTarget`] captures delay injections instead of
//! stalling anything. Both are ordinary safe types so tests exercise the
//! real register stack end to end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::emu::smp::{DelayTarget, DispatchError};
use crate::pci::{ConfigBus, PciError};

/// Size of the stubbed config space, enough for the standard header plus
/// the HA PMON register block.
const SPACE_BYTES: usize = 0x100;

struct StubState {
    space: [u8; SPACE_BYTES],
    buses: HashSet<(u16, u8)>,
    fail_reads_at: Option<u16>,
    fail_writes_at: Option<u16>,
    find_calls: usize,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            space: [0u8; SPACE_BYTES],
            buses: HashSet::new(),
            fail_reads_at: None,
            fail_writes_at: None,
            find_calls: 0,
        }
    }
}

/// In-memory register bank behind the [`ConfigBus`] trait.
///
/// One flat space is shared by every devfn; the tests in this crate only
/// ever talk to one function at a time, so the simplification never shows.
/// Registers hold whatever was last written and never count on their own.
pub struct StubBus {
    state: Mutex<StubState>,
}

impl StubBus {
    /// An empty bank that knows no buses.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
        }
    }

    /// Make a (domain, bus) pair discoverable.
    pub fn add_bus(&self, domain: u16, bus: u8) {
        self.state.lock().unwrap().buses.insert((domain, bus));
    }

    /// Seed a 32-bit register without going through the bus trait.
    pub fn seed32(&self, offset: u16, value: u32) {
        let mut state = self.state.lock().unwrap();
        state.space[usize::from(offset)..usize::from(offset) + 4]
            .copy_from_slice(&value.to_le_bytes());
    }

    /// Inspect a 32-bit register without going through the bus trait.
    pub fn peek32(&self, offset: u16) -> u32 {
        let state = self.state.lock().unwrap();
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&state.space[usize::from(offset)..usize::from(offset) + 4]);
        u32::from_le_bytes(buf)
    }

    /// Fail every read that touches `offset` from now on.
    pub fn fail_reads_at(&self, offset: u16) {
        self.state.lock().unwrap().fail_reads_at = Some(offset);
    }

    /// Fail every write that touches `offset` from now on.
    pub fn fail_writes_at(&self, offset: u16) {
        self.state.lock().unwrap().fail_writes_at = Some(offset);
    }

    /// How many times discovery was attempted.
    pub fn find_calls(&self) -> usize {
        self.state.lock().unwrap().find_calls
    }

    fn read(&self, offset: u16, len: usize) -> Result<[u8; 8], PciError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads_at == Some(offset) {
            return Err(PciError::ReadFailed { offset });
        }
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(&state.space[usize::from(offset)..usize::from(offset) + len]);
        Ok(buf)
    }

    fn write(&self, offset: u16, bytes: &[u8]) -> Result<(), PciError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes_at == Some(offset) {
            return Err(PciError::WriteFailed { offset });
        }
        state.space[usize::from(offset)..usize::from(offset) + bytes.len()]
            .copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for StubBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBus for StubBus {
    fn find_bus(&self, domain: u16, bus: u8) -> bool {
        let mut state = self.state.lock().unwrap();
        state.find_calls += 1;
        state.buses.contains(&(domain, bus))
    }

    fn read8(&self, _domain: u16, _bus: u8, _devfn: u8, offset: u16) -> Result<u8, PciError> {
        Ok(self.read(offset, 1)?[0])
    }

    fn read16(&self, _domain: u16, _bus: u8, _devfn: u8, offset: u16) -> Result<u16, PciError> {
        let buf = self.read(offset, 2)?;
        Ok(u16::from_le_bytes([buf[0], buf[1]]))
    }

    fn read32(&self, _domain: u16, _bus: u8, _devfn: u8, offset: u16) -> Result<u32, PciError> {
        let buf = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    fn write8(
        &self,
        _domain: u16,
        _bus: u8,
        _devfn: u8,
        offset: u16,
        value: u8,
    ) -> Result<(), PciError> {
        self.write(offset, &[value])
    }

    fn write16(
        &self,
        _domain: u16,
        _bus: u8,
        _devfn: u8,
        offset: u16,
        value: u16,
    ) -> Result<(), PciError> {
        self.write(offset, &value.to_le_bytes())
    }

    fn write32(
        &self,
        _domain: u16,
        _bus: u8,
        _devfn: u8,
        offset: u16,
        value: u32,
    ) -> Result<(), PciError> {
        self.write(offset, &value.to_le_bytes())
    }
}

/// A [`DelayTarget`] that records magnitudes instead of stalling.
pub struct RecordingTarget {
    cpu: u32,
    magnitudes: Arc<Mutex<Vec<u64>>>,
    fail_next: AtomicBool,
}

impl RecordingTarget {
    /// A target claiming to sit on `cpu`.
    pub fn new(cpu: u32) -> Self {
        Self {
            cpu,
            magnitudes: Arc::new(Mutex::new(Vec::new())),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `inject` fail with `Unreachable`.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Magnitudes injected so far.
    pub fn magnitudes(&self) -> Vec<u64> {
        self.magnitudes.lock().unwrap().clone()
    }

    /// Shared handle to the magnitude log, for tests that move the target
    /// into a controller.
    pub fn shared_magnitudes(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.magnitudes)
    }
}

impl DelayTarget for RecordingTarget {
    fn cpu(&self) -> u32 {
        self.cpu
    }

    fn inject(&self, magnitude: u64) -> Result<(), DispatchError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DispatchError::Unreachable { cpu: self.cpu });
        }
        self.magnitudes.lock().unwrap().push(magnitude);
        Ok(())
    }
}
