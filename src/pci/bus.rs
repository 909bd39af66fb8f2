//! Host-side PCI configuration-space primitives.
//!
//! The `ConfigBus` trait is the boundary between this crate and whatever
//! actually performs bus enumeration and raw config-space I/O. Keeping it a
//! trait means the whole register stack above it can run against an
//! in-memory register bank in tests, and against sysfs on a real machine.

use thiserror::Error;

/// Highest valid PCI device number (5-bit field).
pub const MAX_DEVICE: u8 = 31;

/// Highest valid PCI function number (3-bit field).
pub const MAX_FUNCTION: u8 = 7;

/// Errors from the PCI config-space layer.
///
/// `InvalidLocator` and `BusNotFound` only occur while resolving an
/// endpoint and are unrecoverable for that endpoint. `ReadFailed` and
/// `WriteFailed` abandon the current operation only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PciError {
    /// Device or function number outside its architectural range.
    #[error("invalid locator: device 0x{device:02X} function {function}")]
    InvalidLocator {
        /// Requested device number.
        device: u8,
        /// Requested function number.
        function: u8,
    },

    /// The (domain, bus) pair did not resolve to a known bus.
    #[error("bus {domain:04x}:{bus:02x} not found")]
    BusNotFound {
        /// PCI domain (segment).
        domain: u16,
        /// Bus number.
        bus: u8,
    },

    /// A config-space read failed.
    #[error("config read failed at offset 0x{offset:X}")]
    ReadFailed {
        /// Register offset of the failed access.
        offset: u16,
    },

    /// A config-space write failed.
    #[error("config write failed at offset 0x{offset:X}")]
    WriteFailed {
        /// Register offset of the failed access.
        offset: u16,
    },
}

/// Combine device and function into the devfn byte used on the wire.
///
/// Device occupies bits [7:3], function bits [2:0].
#[inline]
pub fn devfn(device: u8, function: u8) -> u8 {
    (device << 3) | (function & MAX_FUNCTION)
}

/// Raw configuration-space access for one PCI domain hierarchy.
///
/// Implementations must be usable from the sampling worker thread, hence
/// `Send + Sync`. All offsets are byte offsets into the function's config
/// space; multi-byte accesses are little-endian as PCI defines them.
pub trait ConfigBus: Send + Sync {
    /// Whether the given (domain, bus) pair exists on this host.
    fn find_bus(&self, domain: u16, bus: u8) -> bool;

    /// Read one byte of config space.
    fn read8(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u8, PciError>;

    /// Read one 16-bit word of config space.
    fn read16(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u16, PciError>;

    /// Read one 32-bit dword of config space.
    fn read32(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u32, PciError>;

    /// Write one byte of config space.
    fn write8(&self, domain: u16, bus: u8, devfn: u8, offset: u16, value: u8)
        -> Result<(), PciError>;

    /// Write one 16-bit word of config space.
    fn write16(
        &self,
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        value: u16,
    ) -> Result<(), PciError>;

    /// Write one 32-bit dword of config space.
    fn write32(
        &self,
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        value: u32,
    ) -> Result<(), PciError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devfn_encoding() {
        assert_eq!(devfn(0x12, 0x01), 0x91);
        assert_eq!(devfn(0x12, 0x05), 0x95);
        assert_eq!(devfn(0, 0), 0);
        assert_eq!(devfn(31, 7), 0xFF);
    }

    #[test]
    fn test_error_display() {
        let e = PciError::BusNotFound { domain: 0, bus: 0x7F };
        assert_eq!(e.to_string(), "bus 0000:7f not found");
    }
}
