//! Uncore performance-monitoring layer.
//!
//! Builds the monitoring stack on top of [`crate::pci`]:
//!
//! - [`ha_spec`]: register addresses and bit fields of the Home Agent
//!   PMON unit, including the fixed four-entry counter pair table.
//! - [`events`]: the immutable event descriptor catalog and the
//!   configuration-facing traffic-class selector.
//! - [`pmon_box::PmonBox`]: one box: cached control/status state and the
//!   box-wide freeze/reset/overflow operations.
//! - [`monitor::Monitor`]: one counter pair bound to one event, with the
//!   select/enable/read/reset state machine.
//!
//! ```text
//!   Monitor ── pair index ──▶ COUNTER_PAIRS[i]
//!      │
//!      ▼
//!   PmonBox ── BOX_CTL / BOX_STATUS
//!      │
//!      ▼
//!   ConfigSpace (one HA function in PCI config space)
//! ```

pub mod events;
pub mod ha_spec;
pub mod monitor;
pub mod pmon_box;

pub use events::{EventDescriptor, TrafficClass};
pub use monitor::Monitor;
pub use pmon_box::{MonitorError, PmonBox};
