//! Multicast routing model.
//!
//! A chip's router matches each incoming packet key against its entries in
//! order; the first entry whose `(key, mask)` matches decides the route.
//!
//! ```text
//! route word:  bits 0..6   links (E, NE, N, W, SW, S)
//!              bits 6..24  processors 0..18
//! ```

use crate::coords::{ChipCoordinate, PROCESSORS_PER_CHIP};
use std::fmt;

/// Entries a router can hold (one of the 1024 slots is reserved).
pub const MAX_ROUTER_ENTRIES: usize = 1023;

/// Number of inter-chip links.
pub const N_LINKS: u8 = 6;

/// Bitmask of outgoing links and local processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Route(u32);

impl Route {
    /// A route that delivers nowhere (packet dropped).
    pub const EMPTY: Self = Self(0);

    /// Route from a raw route word.
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self(word)
    }

    /// Raw route word.
    #[must_use]
    pub const fn word(self) -> u32 {
        self.0
    }

    /// Route with the given links and processors.
    #[must_use]
    pub fn new(links: &[u8], processors: &[u8]) -> Self {
        let mut route = Self::EMPTY;
        for &link in links {
            route = route.with_link(link);
        }
        for &p in processors {
            route = route.with_processor(p);
        }
        route
    }

    /// Add an outgoing link.
    #[must_use]
    pub const fn with_link(self, link: u8) -> Self {
        Self(self.0 | (1 << link))
    }

    /// Add a local processor.
    #[must_use]
    pub const fn with_processor(self, p: u8) -> Self {
        Self(self.0 | (1 << (N_LINKS + p)))
    }

    /// Remove a local processor.
    #[must_use]
    pub const fn without_processor(self, p: u8) -> Self {
        Self(self.0 & !(1 << (N_LINKS + p)))
    }

    /// True if packets are delivered to processor `p`.
    #[must_use]
    pub const fn has_processor(self, p: u8) -> bool {
        self.0 & (1 << (N_LINKS + p)) != 0
    }

    /// True if packets leave on `link`.
    #[must_use]
    pub const fn has_link(self, link: u8) -> bool {
        self.0 & (1 << link) != 0
    }

    /// Processors this route delivers to.
    pub fn processors(self) -> impl Iterator<Item = u8> {
        (0..PROCESSORS_PER_CHIP).filter(move |&p| self.has_processor(p))
    }

    /// True if the route delivers nowhere.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}", self.0)
    }
}

/// One `(key, mask) -> route` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingEntry {
    /// Key to match; bits outside `mask` are zero.
    pub key: u32,
    /// Bits of the packet key that must equal `key`.
    pub mask: u32,
    /// Where matching packets go.
    pub route: Route,
    /// True if default routing would deliver the packet identically.
    pub defaultable: bool,
}

impl RoutingEntry {
    /// Create an entry, clearing key bits outside the mask.
    #[must_use]
    pub const fn new(key: u32, mask: u32, route: Route) -> Self {
        Self {
            key: key & mask,
            mask,
            route,
            defaultable: false,
        }
    }

    /// True if `packet_key` matches this entry.
    #[must_use]
    pub const fn matches(&self, packet_key: u32) -> bool {
        packet_key & self.mask == self.key
    }

    /// True if some packet key matches both entries.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        (self.key ^ other.key) & self.mask & other.mask == 0
    }

    /// Number of packet keys this entry covers.
    #[must_use]
    pub const fn coverage(&self) -> u64 {
        1u64 << (!self.mask).count_ones()
    }
}

impl fmt::Display for RoutingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08x}/0x{:08x} -> {}",
            self.key, self.mask, self.route
        )
    }
}

/// The routing table of one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastRoutingTable {
    /// Chip this table belongs to.
    pub chip: ChipCoordinate,
    /// Entries in priority order.
    pub entries: Vec<RoutingEntry>,
}

impl MulticastRoutingTable {
    /// Create a table.
    #[must_use]
    pub fn new(chip: ChipCoordinate, entries: Vec<RoutingEntry>) -> Self {
        Self { chip, entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the table fits in a router.
    #[must_use]
    pub fn fits_router(&self) -> bool {
        self.entries.len() <= MAX_ROUTER_ENTRIES
    }

    /// Route of the first entry matching `packet_key`.
    #[must_use]
    pub fn route_for(&self, packet_key: u32) -> Option<Route> {
        self.entries
            .iter()
            .find(|e| e.matches(packet_key))
            .map(|e| e.route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_bits() {
        let route = Route::new(&[0, 3], &[1, 17]);
        assert!(route.has_link(0));
        assert!(route.has_link(3));
        assert!(!route.has_link(1));
        assert!(route.has_processor(1));
        assert!(route.has_processor(17));
        assert_eq!(route.processors().collect::<Vec<_>>(), vec![1, 17]);
        assert!(!route.without_processor(1).has_processor(1));
        assert!(route.without_processor(1).has_processor(17));
    }

    #[test]
    fn entry_clears_bits_outside_mask() {
        let entry = RoutingEntry::new(0x0000_01ff, 0xffff_ff00, Route::EMPTY);
        assert_eq!(entry.key, 0x0000_0100);
        assert!(entry.matches(0x0000_0142));
        assert!(!entry.matches(0x0000_0242));
        assert_eq!(entry.coverage(), 256);
    }

    #[test]
    fn intersection_is_symmetric() {
        let wide = RoutingEntry::new(0x1000, 0xf000, Route::EMPTY);
        let narrow = RoutingEntry::new(0x1234, 0xffff, Route::EMPTY);
        let other = RoutingEntry::new(0x2234, 0xffff, Route::EMPTY);
        assert!(wide.intersects(&narrow));
        assert!(narrow.intersects(&wide));
        assert!(!wide.intersects(&other));
    }

    #[test]
    fn first_match_wins() {
        let chip = ChipCoordinate::new(0, 0);
        let table = MulticastRoutingTable::new(
            chip,
            vec![
                RoutingEntry::new(0x10, 0xff, Route::new(&[1], &[])),
                RoutingEntry::new(0x00, 0xf0, Route::new(&[2], &[])),
            ],
        );
        assert_eq!(table.route_for(0x10), Some(Route::new(&[1], &[])));
        assert_eq!(table.route_for(0x11), Some(Route::new(&[2], &[])));
        assert_eq!(table.route_for(0x100), None);
    }
}
