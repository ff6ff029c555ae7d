// SPDX-License-Identifier: AGPL-3.0-only

//! Routing table compression with bitfield merging
//!
//! Shared by the host fallback and the virtual machine's compressor.
//!
//! # Algorithm
//!
//! 1. Bitfields whose redundant packet count reaches the threshold become
//!    candidates, most redundant first.
//! 2. Merging a bitfield expands each covering entry into per-atom entries
//!    and drops the core from atoms it does not need.
//! 3. The merged table is compressed by pairwise merging of entries with
//!    equal routes, keeping first-match semantics.
//! 4. A binary search finds the largest number of candidates that still
//!    compresses to the target length.

use crate::bitfield::BitFieldFilter;
use crate::error::{CompressionError, Result};
use spinn_chip::{ChipCoordinate, RoutingEntry, MAX_ROUTER_ENTRIES};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Knobs for one table compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionSettings {
    /// Aim for at most this many entries
    pub target_length: usize,
    /// Return a table that already fits unchanged if there is nothing to merge
    pub compress_only_when_needed: bool,
    /// Keep compressing a table that already fits
    pub compress_as_much_as_possible: bool,
    /// Abandon attempts that take longer than `time_per_iteration`
    pub use_timer_cut_off: bool,
    /// Time budget per attempt
    pub time_per_iteration: Duration,
    /// Minimum redundant packets for a bitfield to be worth merging
    pub threshold_packets: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            target_length: MAX_ROUTER_ENTRIES,
            compress_only_when_needed: true,
            compress_as_much_as_possible: false,
            use_timer_cut_off: false,
            time_per_iteration: Duration::from_millis(100),
            threshold_packets: 1,
        }
    }
}

/// Result of compressing one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedTable {
    /// Entries to install
    pub entries: Vec<RoutingEntry>,
    /// Bitfields merged into the entries
    pub bit_fields_merged: usize,
}

/// Merge two entries with the same route into one covering both
fn merge_pair(a: &RoutingEntry, b: &RoutingEntry) -> RoutingEntry {
    let mask = a.mask & b.mask & !(a.key ^ b.key);
    RoutingEntry {
        key: a.key & mask,
        mask,
        route: a.route,
        defaultable: a.defaultable && b.defaultable,
    }
}

/// Compress `entries` by merging pairs with equal routes
///
/// A merge is kept only if the merged entry overlaps no entry with a
/// different route. The merged entry takes the position of the earlier
/// entry, so every key matched before is routed the same afterwards.
pub fn compress_table(entries: &[RoutingEntry]) -> Vec<RoutingEntry> {
    let mut table = entries.to_vec();
    let mut changed = true;
    while changed {
        changed = false;
        let mut i = 0;
        while i < table.len() {
            let mut j = i + 1;
            while j < table.len() {
                if table[i].route == table[j].route {
                    let merged = merge_pair(&table[i], &table[j]);
                    let clash = table
                        .iter()
                        .any(|other| other.route != merged.route && other.intersects(&merged));
                    if !clash {
                        table[i] = merged;
                        table.remove(j);
                        changed = true;
                        j = i + 1;
                        continue;
                    }
                }
                j += 1;
            }
            i += 1;
        }
    }
    table
}

/// Expand entries covered by `filters` into per-atom entries
///
/// Each atom key keeps the entry's route minus the processors whose
/// bitfield marks that atom as not needed. The entry itself stays behind
/// the atom entries if it also covers keys outside the filters.
pub fn merge_bit_fields(entries: &[RoutingEntry], filters: &[&BitFieldFilter]) -> Vec<RoutingEntry> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let hits: Vec<&BitFieldFilter> = filters
            .iter()
            .copied()
            .filter(|f| f.applies_to(entry))
            .collect();
        if hits.is_empty() {
            out.push(*entry);
            continue;
        }

        let keys: BTreeSet<u32> = hits
            .iter()
            .flat_map(|f| (0..f.n_atoms).map(move |a| f.key().wrapping_add(a)))
            .collect();
        for &key in &keys {
            let route = hits.iter().fold(entry.route, |route, f| match f.atom_of(key) {
                Some(atom) if !f.bits.is_set(atom) => route.without_processor(f.processor),
                _ => route,
            });
            out.push(RoutingEntry::new(key, u32::MAX, route));
        }
        if entry.coverage() > keys.len() as u64 {
            out.push(*entry);
        }
    }
    out
}

/// Compress the table of `chip`, merging as many bitfields as still fit
///
/// # Errors
///
/// [`CompressionError::HostCompressionFailed`] if the table cannot be
/// brought under [`MAX_ROUTER_ENTRIES`] even without bitfields.
pub fn compress_with_bit_fields(
    chip: ChipCoordinate,
    entries: &[RoutingEntry],
    filters: &[BitFieldFilter],
    settings: &CompressionSettings,
) -> Result<CompressedTable> {
    let mut candidates: Vec<&BitFieldFilter> = filters
        .iter()
        .filter(|f| f.redundant_packets() >= settings.threshold_packets)
        .collect();
    candidates.sort_by_key(|f| std::cmp::Reverse(f.redundant_packets()));

    if settings.compress_only_when_needed && candidates.is_empty() && entries.len() <= settings.target_length {
        debug!("Chip {}: {} entries already fit", chip, entries.len());
        return Ok(CompressedTable {
            entries: entries.to_vec(),
            bit_fields_merged: 0,
        });
    }

    let shrink = |table: Vec<RoutingEntry>| {
        if !settings.compress_as_much_as_possible && table.len() <= settings.target_length {
            table
        } else {
            compress_table(&table)
        }
    };

    let base = shrink(entries.to_vec());
    if base.len() > MAX_ROUTER_ENTRIES {
        return Err(CompressionError::host_failed(
            chip,
            format!(
                "{} entries compress to {}, router holds {}",
                entries.len(),
                base.len(),
                MAX_ROUTER_ENTRIES
            ),
        ));
    }

    let attempt = |k: usize| -> Option<Vec<RoutingEntry>> {
        let started = Instant::now();
        let table = shrink(merge_bit_fields(entries, &candidates[..k]));
        if settings.use_timer_cut_off && started.elapsed() > settings.time_per_iteration {
            debug!("Chip {}: merging {} bitfields ran out of time", chip, k);
            return None;
        }
        (table.len() <= settings.target_length).then_some(table)
    };

    let mut best = CompressedTable {
        entries: base,
        bit_fields_merged: 0,
    };
    let (mut lo, mut hi) = (1, candidates.len());
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if let Some(table) = attempt(mid) {
            best = CompressedTable {
                entries: table,
                bit_fields_merged: mid,
            };
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    debug!(
        "Chip {}: {} entries -> {} with {} of {} bitfields merged",
        chip,
        entries.len(),
        best.entries.len(),
        best.bit_fields_merged,
        candidates.len()
    );
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::BitField;
    use spinn_chip::Route;

    const FULL: u32 = u32::MAX;

    fn p(processors: &[u8]) -> Route {
        Route::new(&[], processors)
    }

    fn same_routing(before: &[RoutingEntry], after: &[RoutingEntry], keys: impl Iterator<Item = u32>) {
        let before = spinn_chip::MulticastRoutingTable::new(ChipCoordinate::new(0, 0), before.to_vec());
        let after = spinn_chip::MulticastRoutingTable::new(ChipCoordinate::new(0, 0), after.to_vec());
        for key in keys {
            if let Some(route) = before.route_for(key) {
                assert_eq!(after.route_for(key), Some(route), "key 0x{key:x}");
            }
        }
    }

    #[test]
    fn adjacent_keys_merge() {
        let table = vec![RoutingEntry::new(0, FULL, p(&[1])), RoutingEntry::new(1, FULL, p(&[1]))];
        let out = compress_table(&table);
        assert_eq!(out, vec![RoutingEntry::new(0, 0xFFFF_FFFE, p(&[1]))]);
    }

    #[test]
    fn merge_rejected_when_it_would_capture_other_route() {
        let table = vec![
            RoutingEntry::new(0, FULL, p(&[1])),
            RoutingEntry::new(3, FULL, p(&[1])),
            RoutingEntry::new(1, FULL, p(&[2])),
        ];
        assert_eq!(compress_table(&table), table);
    }

    #[test]
    fn compression_preserves_routes() {
        let table: Vec<_> = (0..64u32)
            .map(|k| RoutingEntry::new(k, FULL, p(&[((k / 4) % 3) as u8 + 1])))
            .collect();
        let out = compress_table(&table);
        assert!(out.len() < table.len());
        same_routing(&table, &out, 0..64);
    }

    #[test]
    fn bitfield_drops_core_from_unneeded_atoms() {
        let entry = RoutingEntry::new(0x100, 0xFFFF_FFF0, p(&[1, 2]));
        let filter = BitFieldFilter {
            processor: 1,
            n_atoms: 16,
            bits: BitField::from_fn(0x100, 16, |a| a == 0),
        };
        let merged = merge_bit_fields(&[entry], &[&filter]);
        assert_eq!(merged.len(), 16);
        assert_eq!(merged[0].route, p(&[1, 2]));
        assert!(merged[1..].iter().all(|e| e.route == p(&[2])));

        let compressed = compress_table(&merged);
        assert!(compressed.len() < 16);
        let table = spinn_chip::MulticastRoutingTable::new(ChipCoordinate::new(0, 0), compressed);
        assert_eq!(table.route_for(0x100), Some(p(&[1, 2])));
        for key in 0x101..0x110 {
            assert_eq!(table.route_for(key), Some(p(&[2])));
        }
    }

    #[test]
    fn wider_entry_kept_behind_atom_entries() {
        let entry = RoutingEntry::new(0x100, 0xFFFF_FF00, p(&[1]));
        let filter = BitFieldFilter {
            processor: 1,
            n_atoms: 4,
            bits: BitField::empty(0x100, 4),
        };
        let merged = merge_bit_fields(&[entry], &[&filter]);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[4], entry);
        assert!(merged[..4].iter().all(|e| e.route.is_empty()));
    }

    #[test]
    fn fitting_table_without_candidates_is_unchanged() {
        let table: Vec<_> = (0..8).map(|k| RoutingEntry::new(k, FULL, p(&[1]))).collect();
        let out = compress_with_bit_fields(ChipCoordinate::new(0, 0), &table, &[], &CompressionSettings::default())
            .unwrap();
        assert_eq!(out.entries, table);
        assert_eq!(out.bit_fields_merged, 0);
    }

    #[test]
    fn merges_most_redundant_bitfields_that_fit() {
        // two sources routed to cores 1 and 2; core 1 needs nothing from either
        let table = vec![
            RoutingEntry::new(0x000, 0xFFFF_FFF0, p(&[1, 2])),
            RoutingEntry::new(0x100, 0xFFFF_FFF0, p(&[1, 2])),
        ];
        let filters = vec![
            BitFieldFilter {
                processor: 1,
                n_atoms: 16,
                bits: BitField::empty(0x000, 16),
            },
            BitFieldFilter {
                processor: 1,
                n_atoms: 16,
                bits: BitField::from_fn(0x100, 16, |a| a < 8),
            },
        ];
        let settings = CompressionSettings {
            target_length: 4,
            ..CompressionSettings::default()
        };
        let out = compress_with_bit_fields(ChipCoordinate::new(0, 0), &table, &filters, &settings).unwrap();
        assert_eq!(out.bit_fields_merged, 2);
        assert!(out.entries.len() <= 4);

        let compressed = spinn_chip::MulticastRoutingTable::new(ChipCoordinate::new(0, 0), out.entries);
        for key in 0x000..0x010 {
            assert_eq!(compressed.route_for(key), Some(p(&[2])));
        }
        assert_eq!(compressed.route_for(0x100), Some(p(&[1, 2])));
        assert_eq!(compressed.route_for(0x10F), Some(p(&[2])));
    }

    #[test]
    fn threshold_excludes_low_redundancy() {
        let table = vec![RoutingEntry::new(0x000, 0xFFFF_FFF0, p(&[1]))];
        let filters = vec![BitFieldFilter {
            processor: 1,
            n_atoms: 16,
            bits: BitField::from_fn(0, 16, |a| a != 0),
        }];
        let settings = CompressionSettings {
            threshold_packets: 2,
            ..CompressionSettings::default()
        };
        let out = compress_with_bit_fields(ChipCoordinate::new(0, 0), &table, &filters, &settings).unwrap();
        assert_eq!(out.bit_fields_merged, 0);
        assert_eq!(out.entries, table);
    }

    #[test]
    fn attempts_over_time_budget_keep_base_table() {
        let table = vec![
            RoutingEntry::new(0x000, 0xFFFF_FFF0, p(&[1, 2])),
            RoutingEntry::new(0x100, 0xFFFF_FFF0, p(&[1, 2])),
        ];
        let filters = vec![
            BitFieldFilter {
                processor: 1,
                n_atoms: 16,
                bits: BitField::empty(0x000, 16),
            },
            BitFieldFilter {
                processor: 1,
                n_atoms: 16,
                bits: BitField::empty(0x100, 16),
            },
        ];
        let settings = CompressionSettings {
            target_length: 4,
            use_timer_cut_off: true,
            time_per_iteration: Duration::ZERO,
            ..CompressionSettings::default()
        };
        let out = compress_with_bit_fields(ChipCoordinate::new(0, 0), &table, &filters, &settings).unwrap();
        assert_eq!(out.bit_fields_merged, 0);
        assert_eq!(out.entries, table);
    }

    #[test]
    fn fitting_table_shrinks_only_when_asked() {
        let table: Vec<_> = (0..8).map(|k| RoutingEntry::new(k, FULL, p(&[1]))).collect();
        let chip = ChipCoordinate::new(0, 0);
        let lazy = CompressionSettings {
            compress_only_when_needed: false,
            ..CompressionSettings::default()
        };
        let out = compress_with_bit_fields(chip, &table, &[], &lazy).unwrap();
        assert_eq!(out.entries, table);

        let eager = CompressionSettings {
            compress_as_much_as_possible: true,
            ..lazy
        };
        let out = compress_with_bit_fields(chip, &table, &[], &eager).unwrap();
        assert_eq!(out.entries, vec![RoutingEntry::new(0, 0xFFFF_FFF8, p(&[1]))]);
        same_routing(&table, &out.entries, 0..8);
    }

    #[test]
    fn incompressible_table_fails() {
        let table: Vec<_> = (0..1100u32)
            .map(|k| RoutingEntry::new(k, FULL, Route::from_word(k + 1)))
            .collect();
        let err = compress_with_bit_fields(ChipCoordinate::new(2, 3), &table, &[], &CompressionSettings::default())
            .unwrap_err();
        assert!(matches!(err, CompressionError::HostCompressionFailed { .. }));
    }
}
