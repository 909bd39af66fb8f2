//! One counter pair bound to one event.

use super::events::EventDescriptor;
use super::ha_spec::{ctl, CounterPair, COUNTER_PAIRS, COUNTER_PAIR_COUNT};
use super::pmon_box::{MonitorError, PmonBox};

/// A monitoring box with one of its counter pairs selected and bound to an
/// event descriptor.
///
/// All register operations route through the owned box and the fixed table
/// entry for the bound pair. The descriptor is stored by value; reselecting
/// is the only way it changes.
#[derive(Debug)]
pub struct Monitor {
    unit: PmonBox,
    pair: usize,
    event: EventDescriptor,
}

impl Monitor {
    /// Bind a counter pair of the box.
    ///
    /// The pair index must be inside the fixed four-entry table. The
    /// monitor starts out on the clock-ticks descriptor until an event is
    /// selected, mirroring the hardware reset state.
    pub fn new(unit: PmonBox, pair: usize) -> Result<Self, MonitorError> {
        if pair >= COUNTER_PAIR_COUNT {
            return Err(MonitorError::InvalidPair { pair });
        }
        Ok(Self {
            unit,
            pair,
            event: super::events::CLOCK_TICKS,
        })
    }

    /// The bound pair index.
    pub fn pair(&self) -> usize {
        self.pair
    }

    /// The currently selected event.
    pub fn event(&self) -> EventDescriptor {
        self.event
    }

    fn regs(&self) -> CounterPair {
        COUNTER_PAIRS[self.pair]
    }

    fn update_pair_control(&mut self, f: impl FnOnce(u32) -> u32) -> Result<(), MonitorError> {
        let addr = self.regs().control;
        let word = f(self.unit.read32(addr)?);
        self.unit.write32(addr, word)
    }

    /// Program the pair to count `event`.
    ///
    /// Only the low 16 bits of the control register (event select in
    /// [7:0], sub-mask in [15:8], the layout the bit-field masks define)
    /// are replaced; threshold, invert, enable and overflow-enable in the
    /// upper half survive reselection. On success the descriptor is stored
    /// as the monitor's current event.
    pub fn select_event(&mut self, event: EventDescriptor) -> Result<(), MonitorError> {
        self.update_pair_control(|w| {
            (w & !ctl::EVENT_FIELDS)
                | u32::from(event.code)
                | (u32::from(event.umask) << ctl::UMASK_SHIFT)
        })?;
        log::debug!("pair {} now counting {}", self.pair, event.name);
        self.event = event;
        Ok(())
    }

    /// Start counting on the pair.
    pub fn enable(&mut self) -> Result<(), MonitorError> {
        self.update_pair_control(|w| w | ctl::ENABLE)
    }

    /// Stop counting on the pair.
    pub fn disable(&mut self) -> Result<(), MonitorError> {
        self.update_pair_control(|w| w & !ctl::ENABLE)
    }

    /// Let a counter overflow raise an interrupt.
    pub fn enable_overflow(&mut self) -> Result<(), MonitorError> {
        self.update_pair_control(|w| w | ctl::OVERFLOW_ENABLE)
    }

    /// Keep counter overflow from raising an interrupt.
    ///
    /// The sticky overflow bit in the box status register still latches;
    /// see [`PmonBox::clear_overflow`].
    pub fn disable_overflow(&mut self) -> Result<(), MonitorError> {
        self.update_pair_control(|w| w & !ctl::OVERFLOW_ENABLE)
    }

    /// Reset this pair's counter to zero.
    ///
    /// Distinct from [`PmonBox::reset_counters`], which resets all four
    /// pairs at once.
    pub fn reset_counter(&mut self) -> Result<(), MonitorError> {
        self.update_pair_control(|w| w | ctl::RESET)
    }

    /// Read the pair's accumulated 64-bit count.
    ///
    /// Does not freeze the box; bracket with [`Monitor::freeze`] /
    /// [`Monitor::unfreeze`] to get a consistent snapshot.
    pub fn read_counter(&self) -> Result<u64, MonitorError> {
        self.unit.read64(self.regs().counter)
    }

    // Box-level operations, forwarded so the sampling loop reads as one
    // sequence against one object.

    /// Suspend counting on the whole box.
    pub fn freeze(&mut self) -> Result<(), MonitorError> {
        self.unit.freeze()
    }

    /// Resume counting on the whole box.
    pub fn unfreeze(&mut self) -> Result<(), MonitorError> {
        self.unit.unfreeze()
    }

    /// Reset all counter control registers.
    pub fn reset_controls(&mut self) -> Result<(), MonitorError> {
        self.unit.reset_controls()
    }

    /// Reset all counter data registers.
    pub fn reset_counters(&mut self) -> Result<(), MonitorError> {
        self.unit.reset_counters()
    }

    /// Clear the box's sticky overflow bits.
    pub fn clear_overflow(&mut self) -> Result<(), MonitorError> {
        self.unit.clear_overflow()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::pmon::events;
    use crate::pmon::ha_spec;
    use crate::testing::StubBus;

    fn stub_monitor(pair: usize) -> (Arc<StubBus>, Monitor) {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(ha_spec::XEON_DOMAIN, ha_spec::SOCKET0_HA_BUS);
        let unit = PmonBox::open(bus.clone(), 0, 0).unwrap();
        (bus.clone(), Monitor::new(unit, pair).unwrap())
    }

    #[test]
    fn test_pair_index_validated() {
        let bus = Arc::new(StubBus::new());
        bus.add_bus(ha_spec::XEON_DOMAIN, ha_spec::SOCKET0_HA_BUS);
        let unit = PmonBox::open(bus, 0, 0).unwrap();
        let err = Monitor::new(unit, 4).unwrap_err();
        assert_eq!(err, MonitorError::InvalidPair { pair: 4 });
    }

    #[test]
    fn test_select_event_packs_low_half() {
        let (bus, mut monitor) = stub_monitor(0);
        monitor.select_event(events::REMOTE_READS).unwrap();
        let word = bus.peek32(ha_spec::COUNTER_PAIRS[0].control);
        assert_eq!(word & ctl::EVENT_SELECT, 0x01);
        assert_eq!((word & ctl::UMASK) >> ctl::UMASK_SHIFT, 0x02);
        assert_eq!(monitor.event(), events::REMOTE_READS);
    }

    #[test]
    fn test_select_event_preserves_upper_half() {
        let (bus, mut monitor) = stub_monitor(1);
        let control = ha_spec::COUNTER_PAIRS[1].control;
        bus.seed32(control, 0xABCD_0000);

        monitor.select_event(events::READS).unwrap();
        monitor.select_event(events::REMOTE_WRITES).unwrap();
        monitor.select_event(events::CLOCK_TICKS).unwrap();

        let word = bus.peek32(control);
        assert_eq!(word & 0xFFFF_0000, 0xABCD_0000);
        assert_eq!(word & ctl::EVENT_FIELDS, 0);
    }

    #[test]
    fn test_enable_disable_touch_only_enable_bit() {
        let (bus, mut monitor) = stub_monitor(2);
        let control = ha_spec::COUNTER_PAIRS[2].control;
        bus.seed32(control, 0x0010_0201);

        monitor.enable().unwrap();
        assert_eq!(bus.peek32(control), 0x0010_0201 | ctl::ENABLE);
        monitor.disable().unwrap();
        assert_eq!(bus.peek32(control), 0x0010_0201);
    }

    #[test]
    fn test_reset_counter_targets_bound_pair_only() {
        let (bus, mut monitor) = stub_monitor(3);
        monitor.reset_counter().unwrap();
        assert_eq!(
            bus.peek32(ha_spec::COUNTER_PAIRS[3].control) & ctl::RESET,
            ctl::RESET
        );
        assert_eq!(bus.peek32(ha_spec::COUNTER_PAIRS[0].control), 0);
    }

    #[test]
    fn test_counter_reads_full_64_bits() {
        let (bus, monitor) = stub_monitor(0);
        let counter = ha_spec::COUNTER_PAIRS[0].counter;
        bus.seed32(counter, 0x9ABC_DEF0);
        bus.seed32(counter + 4, 0x1234_5678);
        assert_eq!(monitor.read_counter().unwrap(), 0x1234_5678_9ABC_DEF0);
    }

    #[test]
    fn test_unenabled_counter_stays_flat_across_reads() {
        let (bus, monitor) = stub_monitor(0);
        let counter = ha_spec::COUNTER_PAIRS[0].counter;
        bus.seed32(counter, 42);
        let first = monitor.read_counter().unwrap();
        let second = monitor.read_counter().unwrap();
        let third = monitor.read_counter().unwrap();
        assert_eq!(first, 42);
        assert_eq!(second, first);
        assert_eq!(third, first);
    }
}
