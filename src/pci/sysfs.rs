//! Linux sysfs implementation of [`ConfigBus`].
//!
//! Bus discovery goes through `/sys/class/pci_bus/<domain>:<bus>`; register
//! I/O goes through the per-function `config` file under
//! `/sys/bus/pci/devices/`. Writes, and reads past the standard header,
//! require root.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use super::bus::{ConfigBus, PciError, MAX_FUNCTION};

/// Config-space access backed by the Linux sysfs PCI hierarchy.
#[derive(Debug, Default)]
pub struct SysfsBus;

impl SysfsBus {
    /// Create a sysfs-backed bus.
    pub fn new() -> Self {
        Self
    }

    fn config_path(domain: u16, bus: u8, devfn: u8) -> PathBuf {
        PathBuf::from(format!(
            "/sys/bus/pci/devices/{:04x}:{:02x}:{:02x}.{}/config",
            domain,
            bus,
            devfn >> 3,
            devfn & MAX_FUNCTION
        ))
    }

    fn open_read(domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<File, PciError> {
        File::open(Self::config_path(domain, bus, devfn)).map_err(|e| {
            log::warn!(
                "open {} for read failed: {e}",
                Self::config_path(domain, bus, devfn).display()
            );
            PciError::ReadFailed { offset }
        })
    }

    fn open_write(domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<File, PciError> {
        OpenOptions::new()
            .write(true)
            .open(Self::config_path(domain, bus, devfn))
            .map_err(|e| {
                log::warn!(
                    "open {} for write failed: {e}",
                    Self::config_path(domain, bus, devfn).display()
                );
                PciError::WriteFailed { offset }
            })
    }

    fn read_exact_at(
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), PciError> {
        let file = Self::open_read(domain, bus, devfn, offset)?;
        file.read_exact_at(buf, u64::from(offset)).map_err(|e| {
            log::warn!("config read at 0x{offset:X} failed: {e}");
            PciError::ReadFailed { offset }
        })
    }

    fn write_all_at(
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        buf: &[u8],
    ) -> Result<(), PciError> {
        let file = Self::open_write(domain, bus, devfn, offset)?;
        file.write_all_at(buf, u64::from(offset)).map_err(|e| {
            log::warn!("config write at 0x{offset:X} failed: {e}");
            PciError::WriteFailed { offset }
        })
    }
}

impl ConfigBus for SysfsBus {
    fn find_bus(&self, domain: u16, bus: u8) -> bool {
        Path::new(&format!("/sys/class/pci_bus/{domain:04x}:{bus:02x}")).exists()
    }

    fn read8(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u8, PciError> {
        let mut buf = [0u8; 1];
        Self::read_exact_at(domain, bus, devfn, offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read16(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u16, PciError> {
        let mut buf = [0u8; 2];
        Self::read_exact_at(domain, bus, devfn, offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read32(&self, domain: u16, bus: u8, devfn: u8, offset: u16) -> Result<u32, PciError> {
        let mut buf = [0u8; 4];
        Self::read_exact_at(domain, bus, devfn, offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write8(
        &self,
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        value: u8,
    ) -> Result<(), PciError> {
        Self::write_all_at(domain, bus, devfn, offset, &[value])
    }

    fn write16(
        &self,
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        value: u16,
    ) -> Result<(), PciError> {
        Self::write_all_at(domain, bus, devfn, offset, &value.to_le_bytes())
    }

    fn write32(
        &self,
        domain: u16,
        bus: u8,
        devfn: u8,
        offset: u16,
        value: u32,
    ) -> Result<(), PciError> {
        Self::write_all_at(domain, bus, devfn, offset, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = SysfsBus::config_path(0, 0x7F, (0x12 << 3) | 0x01);
        assert_eq!(
            path,
            PathBuf::from("/sys/bus/pci/devices/0000:7f:12.1/config")
        );
    }

    #[test]
    fn test_unknown_bus_is_not_found() {
        // Domain 0xFFFF does not exist on any plausible test host.
        assert!(!SysfsBus::new().find_bus(0xFFFF, 0xEE));
    }
}
