//! Box-level control of one HA PMON unit.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::ha_spec::{self, box_ctl, box_status, BOX_CTL, BOX_STATUS};
use crate::pci::{ConfigBus, ConfigSpace, PciError};

/// Errors from the monitoring layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// No home agent exists at the requested socket/instance.
    #[error("no home agent at socket {socket} instance {instance}")]
    UnknownBox {
        /// Requested socket number.
        socket: u8,
        /// Requested HA instance on that socket.
        instance: u8,
    },

    /// The box could not be brought up.
    #[error("monitoring box not ready: {source}")]
    NotReady {
        /// The resolution or seeding failure.
        #[source]
        source: PciError,
    },

    /// A register read or write failed after construction.
    #[error("register i/o failed: {source}")]
    RegisterIo {
        /// The underlying config-space failure.
        #[source]
        source: PciError,
    },

    /// Counter pair index outside the fixed table.
    #[error("invalid counter pair {pair}")]
    InvalidPair {
        /// The rejected index.
        pair: usize,
    },
}

fn reg_io(source: PciError) -> MonitorError {
    MonitorError::RegisterIo { source }
}

/// One HA PMON box: the config-space endpoint plus its box-level control
/// and status registers.
///
/// Constructing a `PmonBox` resolves the endpoint and seeds the cached
/// control/status values with one read each; a box that exists is ready.
/// The cached values track the last word this process wrote (or read at
/// open), so box state is always the union of bits last written. Dropping
/// the box releases the endpoint.
pub struct PmonBox {
    space: ConfigSpace,
    control_addr: u16,
    status_addr: u16,
    control: u32,
    status: u32,
}

impl fmt::Debug for PmonBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PmonBox")
            .field("control_addr", &self.control_addr)
            .field("status_addr", &self.status_addr)
            .field("control", &self.control)
            .field("status", &self.status)
            .finish()
    }
}

impl PmonBox {
    /// Open the HA box for a socket/instance pair.
    ///
    /// Maps the pair through the fixed locator table, then defers to
    /// [`PmonBox::open_at`].
    pub fn open(
        bus: Arc<dyn ConfigBus>,
        socket: u8,
        instance: u8,
    ) -> Result<Self, MonitorError> {
        let bus_nr = ha_spec::socket_bus(socket)
            .ok_or(MonitorError::UnknownBox { socket, instance })?;
        let function = ha_spec::ha_function(instance)
            .ok_or(MonitorError::UnknownBox { socket, instance })?;
        let unit = Self::open_at(
            bus,
            ha_spec::XEON_DOMAIN,
            bus_nr,
            ha_spec::HA_DEVICE,
            function,
            BOX_CTL,
            BOX_STATUS,
        )?;
        log::info!(
            "opened HA box socket {socket} instance {instance} at {}",
            unit.space
        );
        Ok(unit)
    }

    /// Open a box at an explicit locator and register pair.
    ///
    /// Resolution or either seeding read failing releases everything
    /// allocated so far and reports the box as not ready.
    pub fn open_at(
        bus: Arc<dyn ConfigBus>,
        domain: u16,
        bus_nr: u8,
        device: u8,
        function: u8,
        control_addr: u16,
        status_addr: u16,
    ) -> Result<Self, MonitorError> {
        let space = ConfigSpace::resolve(bus, domain, bus_nr, device, function)
            .map_err(|source| MonitorError::NotReady { source })?;
        let control = space
            .read32(control_addr)
            .map_err(|source| MonitorError::NotReady { source })?;
        let status = space
            .read32(status_addr)
            .map_err(|source| MonitorError::NotReady { source })?;
        Ok(Self {
            space,
            control_addr,
            status_addr,
            control,
            status,
        })
    }

    /// Last control word this box read or wrote.
    pub fn control(&self) -> u32 {
        self.control
    }

    /// Last status word this box read or wrote.
    pub fn status(&self) -> u32 {
        self.status
    }

    /// Read-modify-write the box control register.
    ///
    /// The cached value is only updated once the write has succeeded; a
    /// failure in either half leaves it untouched.
    fn update_control(&mut self, f: impl FnOnce(u32) -> u32) -> Result<(), MonitorError> {
        let word = f(self.space.read32(self.control_addr).map_err(reg_io)?);
        self.space.write32(self.control_addr, word).map_err(reg_io)?;
        self.control = word;
        Ok(())
    }

    /// Suspend counting on every pair in the box.
    pub fn freeze(&mut self) -> Result<(), MonitorError> {
        self.update_control(|w| w | box_ctl::FREEZE)
    }

    /// Resume counting.
    pub fn unfreeze(&mut self) -> Result<(), MonitorError> {
        self.update_control(|w| w & !box_ctl::FREEZE)
    }

    /// Reset all counter control registers in the box.
    pub fn reset_controls(&mut self) -> Result<(), MonitorError> {
        self.update_control(|w| w | box_ctl::RESET_CONTROLS)
    }

    /// Reset all counter data registers in the box.
    pub fn reset_counters(&mut self) -> Result<(), MonitorError> {
        self.update_control(|w| w | box_ctl::RESET_COUNTERS)
    }

    /// Clear the sticky per-pair overflow bits.
    ///
    /// The status register is write-to-clear: the pending signal goes away
    /// by writing the overflow bits back, and stays pending otherwise even
    /// with overflow interrupts disabled.
    pub fn clear_overflow(&mut self) -> Result<(), MonitorError> {
        let word = self.space.read32(self.status_addr).map_err(reg_io)? | box_status::OVERFLOW;
        self.space.write32(self.status_addr, word).map_err(reg_io)?;
        self.status = word;
        Ok(())
    }

    /// Read a 32-bit register of this box.
    pub fn read32(&self, offset: u16) -> Result<u32, MonitorError> {
        self.space.read32(offset).map_err(reg_io)
    }

    /// Read a split 64-bit register of this box.
    pub fn read64(&self, offset: u16) -> Result<u64, MonitorError> {
        self.space.read64(offset).map_err(reg_io)
    }

    /// Write a 32-bit register of this box.
    pub fn write32(&mut self, offset: u16, value: u32) -> Result<(), MonitorError> {
        self.space.write32(offset, value).map_err(reg_io)
    }
}

impl fmt::Display for PmonBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBus;

    fn open_stub_box() -> (Arc<StubBus>, PmonBox) {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(ha_spec::XEON_DOMAIN, ha_spec::SOCKET0_HA_BUS);
        let unit = PmonBox::open(bus.clone(), 0, 0).unwrap();
        (bus, unit)
    }

    #[test]
    fn test_open_rejects_unknown_socket() {
        let bus = Arc::new(StubBus::new());
        let err = PmonBox::open(bus, 2, 0).unwrap_err();
        assert_eq!(
            err,
            MonitorError::UnknownBox {
                socket: 2,
                instance: 0
            }
        );
    }

    #[test]
    fn test_open_rejects_unknown_instance() {
        let bus = Arc::new(StubBus::new());
        let err = PmonBox::open(bus, 0, 3).unwrap_err();
        assert!(matches!(err, MonitorError::UnknownBox { .. }));
    }

    #[test]
    fn test_open_seeds_cached_values() {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(0, ha_spec::SOCKET0_HA_BUS);
        bus.seed32(BOX_CTL, 0x0000_0100);
        bus.seed32(BOX_STATUS, 0x0000_0003);
        let unit = PmonBox::open(bus, 0, 0).unwrap();
        assert_eq!(unit.control(), 0x0000_0100);
        assert_eq!(unit.status(), 0x0000_0003);
    }

    #[test]
    fn test_open_fails_not_ready_when_seed_read_fails() {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(0, ha_spec::SOCKET0_HA_BUS);
        bus.fail_reads_at(BOX_STATUS);
        let err = PmonBox::open(bus, 0, 0).unwrap_err();
        assert!(matches!(err, MonitorError::NotReady { .. }));
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let (bus, mut unit) = open_stub_box();
        bus.seed32(BOX_CTL, 0x0000_0040);

        unit.freeze().unwrap();
        unit.freeze().unwrap();

        // Freeze bit set, unrelated bit untouched, nothing toggled back.
        assert_eq!(bus.peek32(BOX_CTL), 0x0000_0040 | box_ctl::FREEZE);
        unit.unfreeze().unwrap();
        assert_eq!(bus.peek32(BOX_CTL), 0x0000_0040);
    }

    #[test]
    fn test_box_state_is_union_of_bits_written() {
        let (bus, mut unit) = open_stub_box();
        unit.reset_controls().unwrap();
        unit.freeze().unwrap();
        assert_eq!(
            bus.peek32(BOX_CTL),
            box_ctl::RESET_CONTROLS | box_ctl::FREEZE
        );
    }

    #[test]
    fn test_clear_overflow_writes_bits_back() {
        let (bus, mut unit) = open_stub_box();
        bus.seed32(BOX_STATUS, 0x0000_0005);
        unit.clear_overflow().unwrap();
        assert_eq!(bus.peek32(BOX_STATUS), 0x0000_0005 | box_status::OVERFLOW);
    }

    #[test]
    fn test_failed_rmw_leaves_cache_unchanged() {
        let (bus, mut unit) = open_stub_box();
        let before = unit.control();
        bus.fail_writes_at(BOX_CTL);
        let err = unit.freeze().unwrap_err();
        assert!(matches!(err, MonitorError::RegisterIo { .. }));
        assert_eq!(unit.control(), before);
    }
}
