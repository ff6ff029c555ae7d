//! Bitfield filters
//!
//! A population core keeps one bitfield per incoming source. Bit `a` is set
//! if a packet from atom `a` of that source reaches at least one synapse on
//! the core. Packets for clear bits are redundant: the router need not
//! deliver them to that core.

use crate::error::{CompressionError, Result};
use crate::payload::{BitFieldAddress, KeyAtomMap};
use crate::transport::Transceiver;
use spinn_chip::sdram::WORD_BYTES;
use spinn_chip::{ChipCoordinate, RoutingEntry};

const BITS_PER_WORD: u32 = 32;

/// Raw bitfield as stored on a core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    /// Base routing key of the source
    pub key: u32,
    /// Bits, atom 0 in bit 0 of word 0
    pub words: Vec<u32>,
}

impl BitField {
    /// Bitfield of `n_atoms` with every bit clear
    pub fn empty(key: u32, n_atoms: u32) -> Self {
        Self {
            key,
            words: vec![0; n_atoms.div_ceil(BITS_PER_WORD) as usize],
        }
    }

    /// Bitfield of `n_atoms` with bits set where `needed` is true
    pub fn from_fn(key: u32, n_atoms: u32, mut needed: impl FnMut(u32) -> bool) -> Self {
        let mut field = Self::empty(key, n_atoms);
        for atom in (0..n_atoms).filter(|&a| needed(a)) {
            field.set(atom);
        }
        field
    }

    /// Set the bit of `atom`
    pub fn set(&mut self, atom: u32) {
        if let Some(word) = self.words.get_mut((atom / BITS_PER_WORD) as usize) {
            *word |= 1 << (atom % BITS_PER_WORD);
        }
    }

    /// True if the bit of `atom` is set
    pub fn is_set(&self, atom: u32) -> bool {
        self.words
            .get((atom / BITS_PER_WORD) as usize)
            .is_some_and(|word| word & (1 << (atom % BITS_PER_WORD)) != 0)
    }
}

/// A bitfield tied to the core that owns it and the atoms it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldFilter {
    /// Processor that owns the filter
    pub processor: u8,
    /// Atoms of the source
    pub n_atoms: u32,
    /// The bits
    pub bits: BitField,
}

impl BitFieldFilter {
    /// Base routing key of the source
    pub fn key(&self) -> u32 {
        self.bits.key
    }

    /// Atoms whose packets the core does not need
    pub fn redundant_packets(&self) -> u32 {
        (0..self.n_atoms).filter(|&a| !self.bits.is_set(a)).count() as u32
    }

    /// Atom that sends `key`, if it belongs to this source
    pub fn atom_of(&self, key: u32) -> Option<u32> {
        key.checked_sub(self.key()).filter(|&a| a < self.n_atoms)
    }

    /// True if every atom key of the source matches `entry` and the entry
    /// delivers to this filter's processor
    pub fn applies_to(&self, entry: &RoutingEntry) -> bool {
        self.n_atoms > 0
            && entry.route.has_processor(self.processor)
            && (0..self.n_atoms).all(|a| entry.matches(self.key().wrapping_add(a)))
    }
}

/// Read the bitfields of every core in `addresses` from `chip`
///
/// # Errors
///
/// - [`CompressionError::Transport`] if a read fails
/// - [`CompressionError::InvalidPayload`] if a filter key has no entry in the
///   core's key map, a filter holds more words than its atoms need, or a
///   count runs past the end of the address space
pub fn read_bit_fields<T: Transceiver + ?Sized>(
    transceiver: &T,
    chip: ChipCoordinate,
    addresses: &[BitFieldAddress],
) -> Result<Vec<BitFieldFilter>> {
    let mut filters = Vec::new();
    for address in addresses {
        let key_map = read_key_map(transceiver, chip, address.key_map)?;

        let mut cursor = address.bit_field;
        let n_filters = transceiver.read_word(chip, cursor)?;
        cursor = advance(cursor, WORD_BYTES)?;
        for _ in 0..n_filters {
            let key = transceiver.read_word(chip, cursor)?;
            let n_words = transceiver.read_word(chip, advance(cursor, WORD_BYTES)?)?;
            cursor = advance(cursor, 2 * WORD_BYTES)?;

            let n_atoms = key_map.n_atoms(key).ok_or_else(|| {
                CompressionError::invalid_payload(format!(
                    "bitfield key 0x{key:08x} on processor {} missing from key map",
                    address.processor
                ))
            })?;
            if n_words > n_atoms.div_ceil(BITS_PER_WORD) {
                return Err(CompressionError::invalid_payload(format!(
                    "bitfield key 0x{key:08x} on processor {} has {n_words} words for {n_atoms} atoms",
                    address.processor
                )));
            }

            let length = byte_len(n_words, 1)?;
            let data = transceiver.read_memory(chip, cursor, length as usize)?;
            cursor = advance(cursor, length)?;

            let words = data
                .chunks_exact(WORD_BYTES as usize)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            filters.push(BitFieldFilter {
                processor: address.processor,
                n_atoms,
                bits: BitField { key, words },
            });
        }
    }
    Ok(filters)
}

fn read_key_map<T: Transceiver + ?Sized>(
    transceiver: &T,
    chip: ChipCoordinate,
    address: u32,
) -> Result<KeyAtomMap> {
    let n_pairs = transceiver.read_word(chip, address)?;
    let length = byte_len(n_pairs, 2)?;
    let data = transceiver.read_memory(chip, advance(address, WORD_BYTES)?, length as usize)?;
    let pairs = data
        .chunks_exact(2 * WORD_BYTES as usize)
        .map(|c| {
            (
                u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect();
    Ok(KeyAtomMap { pairs })
}

/// Bytes taken by `count` records of `words_each` words
fn byte_len(count: u32, words_each: u32) -> Result<u32> {
    count
        .checked_mul(words_each)
        .and_then(|words| words.checked_mul(WORD_BYTES))
        .ok_or_else(|| CompressionError::invalid_payload(format!("count {count} overflows the address space")))
}

fn advance(cursor: u32, by: u32) -> Result<u32> {
    cursor
        .checked_add(by)
        .ok_or_else(|| CompressionError::invalid_payload(format!("region at 0x{cursor:08x} runs past the address space")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::VirtualMachine;
    use spinn_chip::Route;

    const BIT_FIELD_AT: u32 = 0x6000_0000;
    const KEY_MAP_AT: u32 = 0x6000_1000;

    fn address() -> BitFieldAddress {
        BitFieldAddress {
            bit_field: BIT_FIELD_AT,
            key_map: KEY_MAP_AT,
            processor: 1,
        }
    }

    fn write_key_map(vm: &VirtualMachine, chip: ChipCoordinate, pairs: Vec<(u32, u32)>) {
        let map = KeyAtomMap { pairs };
        vm.write_memory(chip, KEY_MAP_AT, &map.encode()).unwrap();
    }

    #[test]
    fn bits_past_the_end_are_clear() {
        let mut field = BitField::empty(0, 40);
        assert_eq!(field.words.len(), 2);
        field.set(39);
        field.set(100);
        assert!(field.is_set(39));
        assert!(!field.is_set(100));
    }

    #[test]
    fn oversized_word_count_is_invalid_payload() {
        let vm = VirtualMachine::new();
        let chip = ChipCoordinate::new(0, 0);
        write_key_map(&vm, chip, vec![(0x1000, 64)]);
        for (i, word) in [1, 0x1000, 0x4000_0001].into_iter().enumerate() {
            vm.write_word(chip, BIT_FIELD_AT + 4 * i as u32, word).unwrap();
        }

        let err = read_bit_fields(&vm, chip, &[address()]).unwrap_err();
        assert!(matches!(err, CompressionError::InvalidPayload { .. }), "{err}");
    }

    #[test]
    fn huge_key_map_is_invalid_payload() {
        let vm = VirtualMachine::new();
        let chip = ChipCoordinate::new(0, 0);
        vm.write_word(chip, KEY_MAP_AT, 0x8000_0000).unwrap();

        let err = read_bit_fields(&vm, chip, &[address()]).unwrap_err();
        assert!(matches!(err, CompressionError::InvalidPayload { .. }), "{err}");
    }

    #[test]
    fn filters_are_read_with_their_atom_counts() {
        let vm = VirtualMachine::new();
        let chip = ChipCoordinate::new(0, 0);
        write_key_map(&vm, chip, vec![(0x1000, 40)]);
        let field = BitField::from_fn(0x1000, 40, |a| a % 3 == 0);
        let region = crate::payload::BitFieldRegion {
            filters: vec![field.clone()],
        };
        vm.write_memory(chip, BIT_FIELD_AT, &region.encode()).unwrap();

        let filters = read_bit_fields(&vm, chip, &[address()]).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].n_atoms, 40);
        assert_eq!(filters[0].bits, field);
        assert_eq!(filters[0].processor, 1);
    }

    #[test]
    fn redundancy_counts_clear_bits() {
        let filter = BitFieldFilter {
            processor: 2,
            n_atoms: 10,
            bits: BitField::from_fn(0x400, 10, |a| a % 2 == 0),
        };
        assert_eq!(filter.redundant_packets(), 5);
        assert_eq!(filter.atom_of(0x403), Some(3));
        assert_eq!(filter.atom_of(0x40A), None);
        assert_eq!(filter.atom_of(0x3FF), None);
    }

    #[test]
    fn applies_only_to_covering_entries_routed_to_core() {
        let filter = BitFieldFilter {
            processor: 2,
            n_atoms: 16,
            bits: BitField::empty(0x400, 16),
        };
        let covering = RoutingEntry::new(0x400, 0xFFFF_FFF0, Route::new(&[], &[2]));
        let other_core = RoutingEntry::new(0x400, 0xFFFF_FFF0, Route::new(&[], &[3]));
        let partial = RoutingEntry::new(0x400, 0xFFFF_FFF8, Route::new(&[], &[2]));
        assert!(filter.applies_to(&covering));
        assert!(!filter.applies_to(&other_core));
        assert!(!filter.applies_to(&partial));
    }
}
