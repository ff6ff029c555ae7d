//! Chip and core coordinates.
//!
//! Every chip in the machine is addressed by its `(x, y)` position in the
//! toroidal chip mesh. A core is a chip coordinate plus a processor index
//! `p`. Routing tables, scratch pools and compression jobs are all keyed by
//! [`ChipCoordinate`].

use std::fmt;

/// Processors on a single chip (one monitor plus application cores).
pub const PROCESSORS_PER_CHIP: u8 = 18;

/// Processor reserved for the chip monitor; never runs application code.
pub const MONITOR_PROCESSOR: u8 = 0;

/// Position of one chip in the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChipCoordinate {
    /// Column in the chip mesh.
    pub x: u8,
    /// Row in the chip mesh.
    pub y: u8,
}

impl ChipCoordinate {
    /// Create a chip coordinate.
    #[must_use]
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// The core `p` on this chip.
    #[must_use]
    pub const fn core(self, p: u8) -> CoreLocation {
        CoreLocation { x: self.x, y: self.y, p }
    }
}

impl fmt::Display for ChipCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A single processor on a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreLocation {
    /// Chip column.
    pub x: u8,
    /// Chip row.
    pub y: u8,
    /// Processor index on the chip.
    pub p: u8,
}

impl CoreLocation {
    /// Create a core location.
    #[must_use]
    pub const fn new(x: u8, y: u8, p: u8) -> Self {
        Self { x, y, p }
    }

    /// The chip this core lives on.
    #[must_use]
    pub const fn chip(&self) -> ChipCoordinate {
        ChipCoordinate { x: self.x, y: self.y }
    }

    /// True for the monitor processor.
    #[must_use]
    pub const fn is_monitor(&self) -> bool {
        self.p == MONITOR_PROCESSOR
    }
}

impl fmt::Display for CoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_round_trips_through_chip() {
        let chip = ChipCoordinate::new(3, 7);
        let core = chip.core(5);
        assert_eq!(core.chip(), chip);
        assert_eq!(core.to_string(), "(3, 7, 5)");
        assert!(!core.is_monitor());
        assert!(chip.core(MONITOR_PROCESSOR).is_monitor());
    }

    #[test]
    fn chips_order_by_x_then_y() {
        let mut chips = vec![
            ChipCoordinate::new(1, 0),
            ChipCoordinate::new(0, 1),
            ChipCoordinate::new(0, 0),
        ];
        chips.sort();
        assert_eq!(chips[0], ChipCoordinate::new(0, 0));
        assert_eq!(chips[2], ChipCoordinate::new(1, 0));
    }
}
