//! Hardware event catalog for the HA counter pairs.
//!
//! Every countable traffic class maps to one `(event code, sub-mask)` pair.
//! All memory-traffic classes share event 0x01 (home agent requests) and
//! differ only in the sub-mask; read and write classes combine by OR-ing
//! their sub-masks.

/// Identifies which hardware event a counter pair accumulates.
///
/// Descriptors are immutable catalog values. A monitor stores its current
/// descriptor by value, so nothing observed through a monitor can change
/// after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    /// Event select code.
    pub code: u8,
    /// Event sub-mask.
    pub umask: u8,
    /// Human-readable name, used in logs.
    pub name: &'static str,
}

/// Uncore clock ticks.
pub const CLOCK_TICKS: EventDescriptor = EventDescriptor {
    code: 0x00,
    umask: 0x00,
    name: "clock ticks",
};

/// Reads served from the local socket.
pub const LOCAL_READS: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x01,
    name: "local reads",
};

/// Reads arriving from the remote socket.
pub const REMOTE_READS: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x02,
    name: "remote reads",
};

/// All reads, local and remote.
pub const READS: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x03,
    name: "reads",
};

/// Writes served from the local socket.
pub const LOCAL_WRITES: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x04,
    name: "local writes",
};

/// Writes arriving from the remote socket.
pub const REMOTE_WRITES: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x08,
    name: "remote writes",
};

/// All writes, local and remote.
pub const WRITES: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x0C,
    name: "writes",
};

/// Remote reads and writes combined.
pub const REMOTE_ACCESS: EventDescriptor = EventDescriptor {
    code: 0x01,
    umask: 0x0A,
    name: "remote access",
};

/// Traffic class selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficClass {
    /// Uncore clock ticks (calibration, not memory traffic).
    ClockTicks,
    /// Local reads only.
    LocalReads,
    /// Remote reads only.
    RemoteReads,
    /// All reads.
    Reads,
    /// Local writes only.
    LocalWrites,
    /// Remote writes only.
    RemoteWrites,
    /// All writes.
    Writes,
    /// Remote reads and writes.
    #[default]
    RemoteAccess,
}

impl TrafficClass {
    /// The catalog descriptor for this class.
    pub fn descriptor(self) -> EventDescriptor {
        match self {
            TrafficClass::ClockTicks => CLOCK_TICKS,
            TrafficClass::LocalReads => LOCAL_READS,
            TrafficClass::RemoteReads => REMOTE_READS,
            TrafficClass::Reads => READS,
            TrafficClass::LocalWrites => LOCAL_WRITES,
            TrafficClass::RemoteWrites => REMOTE_WRITES,
            TrafficClass::Writes => WRITES,
            TrafficClass::RemoteAccess => REMOTE_ACCESS,
        }
    }

    /// Parse a configuration string.
    ///
    /// Unrecognized values fall back to the combined remote-access default
    /// with a warning; a bad selector must not keep the emulator from
    /// starting.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "clock-ticks" => TrafficClass::ClockTicks,
            "local-reads" => TrafficClass::LocalReads,
            "remote-reads" => TrafficClass::RemoteReads,
            "reads" => TrafficClass::Reads,
            "local-writes" => TrafficClass::LocalWrites,
            "remote-writes" => TrafficClass::RemoteWrites,
            "writes" => TrafficClass::Writes,
            "remote-access" => TrafficClass::RemoteAccess,
            other => {
                log::warn!("unknown traffic class {other:?}, monitoring remote access instead");
                TrafficClass::RemoteAccess
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_classes_or_their_parts() {
        assert_eq!(READS.umask, LOCAL_READS.umask | REMOTE_READS.umask);
        assert_eq!(WRITES.umask, LOCAL_WRITES.umask | REMOTE_WRITES.umask);
        assert_eq!(
            REMOTE_ACCESS.umask,
            REMOTE_READS.umask | REMOTE_WRITES.umask
        );
    }

    #[test]
    fn test_parse_known_classes() {
        assert_eq!(
            TrafficClass::parse_or_default("remote-reads"),
            TrafficClass::RemoteReads
        );
        assert_eq!(
            TrafficClass::parse_or_default("REMOTE_WRITES"),
            TrafficClass::RemoteWrites
        );
        assert_eq!(TrafficClass::parse_or_default(" reads "), TrafficClass::Reads);
    }

    #[test]
    fn test_parse_falls_back_to_remote_access() {
        assert_eq!(
            TrafficClass::parse_or_default("bandwidth"),
            TrafficClass::RemoteAccess
        );
        assert_eq!(TrafficClass::parse_or_default(""), TrafficClass::RemoteAccess);
    }
}
