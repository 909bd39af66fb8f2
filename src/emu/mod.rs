//! Emulation layer: delay policy, cross-processor dispatch, and the
//! sampling/actuation controller.

pub mod controller;
pub mod delay;
pub mod smp;

pub use controller::{Controller, Tuning};
pub use smp::{DelayTarget, DispatchError, PinnedInjector};
