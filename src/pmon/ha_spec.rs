//! Home Agent (HA) PMON Register Specification
//!
//! Register addresses and bit-field layouts for the uncore Home Agent
//! performance monitoring unit on two-socket Intel Xeon E5 parts, per the
//! Intel Uncore Performance Monitoring Reference Manual. This module
//! centralizes the addresses so no magic numbers appear elsewhere.
//!
//! Each HA exposes one box-level control/status register pair plus four
//! (counter, control) register pairs in PCI configuration space.

// ============================================================================
// Locator map
// ============================================================================

/// PCI domain (segment) that carries the uncore devices.
pub const XEON_DOMAIN: u16 = 0x0000;

/// Uncore bus of socket 0.
pub const SOCKET0_HA_BUS: u8 = 0x7F;

/// Uncore bus of socket 1.
pub const SOCKET1_HA_BUS: u8 = 0xFF;

/// PCI device number of the Home Agent.
pub const HA_DEVICE: u8 = 0x12;

/// PCI function of HA instance 0.
pub const HA0_FUNCTION: u8 = 0x01;

/// PCI function of HA instance 1.
pub const HA1_FUNCTION: u8 = 0x05;

/// Uncore bus for a socket number, if the socket exists.
pub fn socket_bus(socket: u8) -> Option<u8> {
    match socket {
        0 => Some(SOCKET0_HA_BUS),
        1 => Some(SOCKET1_HA_BUS),
        _ => None,
    }
}

/// PCI function for an HA instance number, if the instance exists.
pub fn ha_function(instance: u8) -> Option<u8> {
    match instance {
        0 => Some(HA0_FUNCTION),
        1 => Some(HA1_FUNCTION),
        _ => None,
    }
}

// ============================================================================
// Box-level registers
// ============================================================================

/// Box control register offset.
pub const BOX_CTL: u16 = 0xF4;

/// Box status register offset.
pub const BOX_STATUS: u16 = 0xF8;

/// Box control register bits.
pub mod box_ctl {
    /// Freeze all counters in the box.
    pub const FREEZE: u32 = 1 << 8;

    /// Reset all counter registers.
    pub const RESET_COUNTERS: u32 = 1 << 1;

    /// Reset all counter control registers.
    pub const RESET_CONTROLS: u32 = 1 << 0;
}

/// Box status register bits.
pub mod box_status {
    /// Per-pair overflow bits, one per counter pair. Write-to-clear:
    /// writing the bits back clears the pending overflow signal.
    pub const OVERFLOW: u32 = 0xF;
}

// ============================================================================
// Counter pairs
// ============================================================================

/// One (counter, control) register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPair {
    /// 64-bit counter data register (split across two dwords).
    pub counter: u16,
    /// 32-bit counter control register.
    pub control: u16,
}

/// Number of counter pairs per HA box.
pub const COUNTER_PAIR_COUNT: usize = 4;

/// The fixed table of counter pairs, shared by every HA box.
pub const COUNTER_PAIRS: [CounterPair; COUNTER_PAIR_COUNT] = [
    CounterPair {
        counter: 0xA0,
        control: 0xD8,
    },
    CounterPair {
        counter: 0xA8,
        control: 0xDC,
    },
    CounterPair {
        counter: 0xB0,
        control: 0xE0,
    },
    CounterPair {
        counter: 0xB8,
        control: 0xE4,
    },
];

/// Counter control register bits.
pub mod ctl {
    /// Comparison threshold field, bits [31:24].
    pub const THRESHOLD: u32 = 0xFF << 24;

    /// Invert the threshold comparison.
    pub const INVERT: u32 = 1 << 23;

    /// Enable counting on this pair.
    pub const ENABLE: u32 = 1 << 22;

    /// Generate an interrupt when the counter overflows.
    pub const OVERFLOW_ENABLE: u32 = 1 << 20;

    /// Reset this pair's counter.
    pub const RESET: u32 = 1 << 17;

    /// Event sub-mask field, bits [15:8].
    pub const UMASK: u32 = 0xFF << 8;

    /// Shift of the sub-mask field.
    pub const UMASK_SHIFT: u32 = 8;

    /// Event select field, bits [7:0].
    pub const EVENT_SELECT: u32 = 0xFF;

    /// Both event fields together; the upper half of the register holds
    /// threshold/invert/enable/overflow bits that must survive event
    /// reselection.
    pub const EVENT_FIELDS: u32 = UMASK | EVENT_SELECT;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_table_is_fixed_and_disjoint() {
        assert_eq!(COUNTER_PAIRS.len(), 4);
        for (i, a) in COUNTER_PAIRS.iter().enumerate() {
            // 64-bit counters occupy 8 bytes each; controls 4 bytes.
            for b in COUNTER_PAIRS.iter().skip(i + 1) {
                assert!(a.counter.abs_diff(b.counter) >= 8);
                assert!(a.control.abs_diff(b.control) >= 4);
            }
        }
    }

    #[test]
    fn test_locator_map() {
        assert_eq!(socket_bus(0), Some(0x7F));
        assert_eq!(socket_bus(1), Some(0xFF));
        assert_eq!(socket_bus(2), None);
        assert_eq!(ha_function(0), Some(0x01));
        assert_eq!(ha_function(1), Some(0x05));
        assert_eq!(ha_function(2), None);
    }

    #[test]
    fn test_event_fields_cover_low_half_only() {
        assert_eq!(ctl::EVENT_FIELDS, 0x0000_FFFF);
        assert_eq!(ctl::EVENT_FIELDS & ctl::ENABLE, 0);
        assert_eq!(ctl::EVENT_FIELDS & ctl::THRESHOLD, 0);
    }
}
