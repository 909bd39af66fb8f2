//! PCI configuration-space access layer.
//!
//! Three pieces, bottom up:
//!
//! - [`bus::ConfigBus`]: the host's raw enumeration and register I/O
//!   primitives, as a swappable trait.
//! - [`space::ConfigSpace`]: one resolved endpoint with typed 8/16/32/64-bit
//!   operations, including the split-dword convention for 64-bit counters.
//! - [`sysfs::SysfsBus`]: the Linux implementation of the trait.

pub mod bus;
pub mod space;
pub mod sysfs;

pub use bus::{devfn, ConfigBus, PciError};
pub use space::ConfigSpace;
pub use sysfs::SysfsBus;
