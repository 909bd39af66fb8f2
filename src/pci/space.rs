//! A resolved config-space endpoint with typed register access.

use std::fmt;
use std::sync::Arc;

use super::bus::{devfn, ConfigBus, PciError, MAX_DEVICE, MAX_FUNCTION};

/// One addressable PCI function, resolved and ready for register I/O.
///
/// A `ConfigSpace` can only be obtained through [`ConfigSpace::resolve`],
/// so holding one is proof that the locator was in range and the bus was
/// discoverable. There is no half-initialized state to guard against.
pub struct ConfigSpace {
    bus: Arc<dyn ConfigBus>,
    domain: u16,
    bus_nr: u8,
    device: u8,
    function: u8,
}

impl ConfigSpace {
    /// Resolve a (domain, bus, device, function) locator.
    ///
    /// Device and function ranges are checked first; bus discovery is only
    /// attempted once both are in range, so an out-of-range locator never
    /// touches the host's enumeration machinery.
    pub fn resolve(
        bus: Arc<dyn ConfigBus>,
        domain: u16,
        bus_nr: u8,
        device: u8,
        function: u8,
    ) -> Result<Self, PciError> {
        if device > MAX_DEVICE || function > MAX_FUNCTION {
            return Err(PciError::InvalidLocator { device, function });
        }
        if !bus.find_bus(domain, bus_nr) {
            return Err(PciError::BusNotFound { domain, bus: bus_nr });
        }
        Ok(Self {
            bus,
            domain,
            bus_nr,
            device,
            function,
        })
    }

    /// The combined devfn byte for this function.
    #[inline]
    pub fn devfn(&self) -> u8 {
        devfn(self.device, self.function)
    }

    /// Read an 8-bit register.
    pub fn read8(&self, offset: u16) -> Result<u8, PciError> {
        self.bus.read8(self.domain, self.bus_nr, self.devfn(), offset)
    }

    /// Read a 16-bit register.
    pub fn read16(&self, offset: u16) -> Result<u16, PciError> {
        self.bus.read16(self.domain, self.bus_nr, self.devfn(), offset)
    }

    /// Read a 32-bit register.
    pub fn read32(&self, offset: u16) -> Result<u32, PciError> {
        self.bus.read32(self.domain, self.bus_nr, self.devfn(), offset)
    }

    /// Read a 64-bit register split across two adjacent dwords.
    ///
    /// The low 32 bits live at `offset`, the high 32 bits at `offset + 4`.
    /// The high half is read first; if either sub-read fails the whole
    /// operation fails and no partial value is produced.
    pub fn read64(&self, offset: u16) -> Result<u64, PciError> {
        let high = self.read32(offset + 4).map_err(|e| {
            log::warn!("{self}: high half of 64-bit read at 0x{offset:X} failed: {e}");
            e
        })?;
        let low = self.read32(offset).map_err(|e| {
            log::warn!("{self}: low half of 64-bit read at 0x{offset:X} failed: {e}");
            e
        })?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    /// Write an 8-bit register.
    pub fn write8(&self, offset: u16, value: u8) -> Result<(), PciError> {
        self.bus
            .write8(self.domain, self.bus_nr, self.devfn(), offset, value)
    }

    /// Write a 16-bit register.
    pub fn write16(&self, offset: u16, value: u16) -> Result<(), PciError> {
        self.bus
            .write16(self.domain, self.bus_nr, self.devfn(), offset, value)
    }

    /// Write a 32-bit register.
    pub fn write32(&self, offset: u16, value: u32) -> Result<(), PciError> {
        self.bus
            .write32(self.domain, self.bus_nr, self.devfn(), offset, value)
    }

    /// Write a 64-bit register split across two adjacent dwords.
    ///
    /// The low half goes to `offset` first, then the high half to
    /// `offset + 4`. If the second sub-write fails the low half has already
    /// reached the device; the error is reported, not masked.
    pub fn write64(&self, offset: u16, value: u64) -> Result<(), PciError> {
        self.write32(offset, value as u32).map_err(|e| {
            log::warn!("{self}: low half of 64-bit write at 0x{offset:X} failed: {e}");
            e
        })?;
        self.write32(offset + 4, (value >> 32) as u32).map_err(|e| {
            log::warn!("{self}: high half of 64-bit write at 0x{offset:X} failed: {e}");
            e
        })
    }
}

impl fmt::Display for ConfigSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus_nr, self.device, self.function
        )
    }
}

impl fmt::Debug for ConfigSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSpace")
            .field("domain", &self.domain)
            .field("bus", &self.bus_nr)
            .field("device", &self.device)
            .field("function", &self.function)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBus;

    fn stub_space() -> (Arc<StubBus>, ConfigSpace) {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(0, 0x7F);
        let space = ConfigSpace::resolve(bus.clone(), 0, 0x7F, 0x12, 0x01).unwrap();
        (bus, space)
    }

    #[test]
    fn test_resolve_rejects_out_of_range_device() {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(0, 0x7F);
        let err = ConfigSpace::resolve(bus.clone(), 0, 0x7F, 32, 0).unwrap_err();
        assert_eq!(
            err,
            PciError::InvalidLocator {
                device: 32,
                function: 0
            }
        );
        // Range checks short-circuit: discovery is never attempted.
        assert_eq!(bus.find_calls(), 0);
    }

    #[test]
    fn test_resolve_rejects_out_of_range_function() {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(0, 0x7F);
        let err = ConfigSpace::resolve(bus.clone(), 0, 0x7F, 0x12, 8).unwrap_err();
        assert!(matches!(err, PciError::InvalidLocator { .. }));
        assert_eq!(bus.find_calls(), 0);
    }

    #[test]
    fn test_resolve_requires_discoverable_bus() {
        let bus = Arc::new(StubBus::new());
        let err = ConfigSpace::resolve(bus.clone(), 0, 0x3A, 0x12, 0x01).unwrap_err();
        assert_eq!(err, PciError::BusNotFound { domain: 0, bus: 0x3A });
        assert_eq!(bus.find_calls(), 1);
    }

    #[test]
    fn test_typed_reads_see_typed_writes() {
        let (_bus, space) = stub_space();
        space.write32(0xD8, 0xDEAD_BEEF).unwrap();
        assert_eq!(space.read32(0xD8).unwrap(), 0xDEAD_BEEF);
        space.write16(0x40, 0xCAFE).unwrap();
        assert_eq!(space.read16(0x40).unwrap(), 0xCAFE);
        space.write8(0x42, 0x5A).unwrap();
        assert_eq!(space.read8(0x42).unwrap(), 0x5A);
        // The narrow writes landed inside the wider word little-endian.
        assert_eq!(space.read32(0x40).unwrap(), 0x005A_CAFE);
    }

    #[test]
    fn test_write64_read64_roundtrip() {
        let (_bus, space) = stub_space();
        space.write64(0xA0, 0x0123_4567_89AB_CDEF).unwrap();
        assert_eq!(space.read64(0xA0).unwrap(), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_64_bit_halves_land_at_documented_offsets() {
        let (_bus, space) = stub_space();
        space.write64(0xA0, 0x1111_2222_3333_4444).unwrap();
        // Low half at the base offset, high half four bytes up.
        assert_eq!(space.read32(0xA0).unwrap(), 0x3333_4444);
        assert_eq!(space.read32(0xA4).unwrap(), 0x1111_2222);
    }

    #[test]
    fn test_read64_fails_whole_on_partial_failure() {
        let (bus, space) = stub_space();
        space.write64(0xA0, 0x5555_6666_7777_8888).unwrap();
        bus.fail_reads_at(0xA4);
        let err = space.read64(0xA0).unwrap_err();
        assert_eq!(err, PciError::ReadFailed { offset: 0xA4 });
    }
}
