//! Wire formats exchanged with the compressor executable
//!
//! All words are little-endian `u32`.
//!
//! ```text
//! Routing table (USER1)   app_id | only_when_needed | as_much_as_possible | n
//!                         n × (key, mask, route, defaultable)
//! Address list (USER2)    n | n × (bitfield addr, key map addr, processor) | time_per_iteration
//! Spare list (USER3)      n | n × (address, size)
//! Bitfield region         n | per filter: key, n_words, n_words × bits
//! Key map region          n | n × (key, n_atoms)
//! ```

use crate::bitfield::BitField;
use crate::error::{CompressionError, Result};
use crate::scratch::SpareMemoryPool;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use spinn_chip::sdram::WORD_BYTES;
use spinn_chip::{Route, RoutingEntry};

const WORD: usize = WORD_BYTES as usize;

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < WORD {
        return Err(CompressionError::invalid_payload(format!("truncated {what}")));
    }
    Ok(buf.get_u32_le())
}

/// Read a count and check that `words_each` words per item are present
fn take_count(buf: &mut &[u8], what: &str, words_each: usize) -> Result<usize> {
    let n = take_u32(buf, what)? as usize;
    if buf.remaining() / WORD / words_each.max(1) < n {
        return Err(CompressionError::invalid_payload(format!(
            "{what}: {n} items declared but only {} bytes follow",
            buf.remaining()
        )));
    }
    Ok(n)
}

fn byte_len(words: usize) -> u32 {
    u32::try_from(words * WORD).unwrap_or(u32::MAX)
}

// ── Routing table ────────────────────────────────────────────────────────────

/// Routing table plus compressor flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionInput {
    /// Application whose routes are being compressed
    pub app_id: u32,
    /// Leave a table that already fits alone
    pub compress_only_when_needed: bool,
    /// Keep compressing after the table fits
    pub compress_as_much_as_possible: bool,
    /// Uncompressed entries
    pub entries: Vec<RoutingEntry>,
}

impl CompressionInput {
    const HEADER_WORDS: usize = 4;
    const ENTRY_WORDS: usize = 4;

    /// Encoded size for `n_entries` entries
    pub fn encoded_len(n_entries: usize) -> u32 {
        byte_len(Self::HEADER_WORDS + n_entries * Self::ENTRY_WORDS)
    }

    /// Serialise
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.entries.len()) as usize);
        buf.put_u32_le(self.app_id);
        buf.put_u32_le(u32::from(self.compress_only_when_needed));
        buf.put_u32_le(u32::from(self.compress_as_much_as_possible));
        buf.put_u32_le(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        for entry in &self.entries {
            buf.put_u32_le(entry.key);
            buf.put_u32_le(entry.mask);
            buf.put_u32_le(entry.route.word());
            buf.put_u32_le(u32::from(entry.defaultable));
        }
        buf.freeze()
    }

    /// Parse
    ///
    /// # Errors
    ///
    /// [`CompressionError::InvalidPayload`] if the data is truncated.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let app_id = take_u32(&mut buf, "app id")?;
        let compress_only_when_needed = take_u32(&mut buf, "flags")? != 0;
        let compress_as_much_as_possible = take_u32(&mut buf, "flags")? != 0;
        let n = take_count(&mut buf, "routing entries", Self::ENTRY_WORDS)?;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let key = take_u32(&mut buf, "entry key")?;
            let mask = take_u32(&mut buf, "entry mask")?;
            let route = Route::from_word(take_u32(&mut buf, "entry route")?);
            let defaultable = take_u32(&mut buf, "entry flag")? != 0;
            entries.push(RoutingEntry {
                key,
                mask,
                route,
                defaultable,
            });
        }
        Ok(Self {
            app_id,
            compress_only_when_needed,
            compress_as_much_as_possible,
            entries,
        })
    }
}

// ── Address list ─────────────────────────────────────────────────────────────

/// Where one core keeps its bitfields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitFieldAddress {
    /// Bitfield filter region
    pub bit_field: u32,
    /// Key to atom-count map region
    pub key_map: u32,
    /// Processor on the chip
    pub processor: u8,
}

/// Bitfield locations of every participating core on a chip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList {
    /// One record per participating core
    pub entries: Vec<BitFieldAddress>,
    /// Time budget per compression attempt (microseconds)
    pub time_per_iteration_us: u32,
}

impl AddressList {
    const ENTRY_WORDS: usize = 3;

    /// Encoded size for `n_entries` records
    pub fn encoded_len(n_entries: usize) -> u32 {
        byte_len(1 + n_entries * Self::ENTRY_WORDS + 1)
    }

    /// Serialise
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.entries.len()) as usize);
        buf.put_u32_le(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        for entry in &self.entries {
            buf.put_u32_le(entry.bit_field);
            buf.put_u32_le(entry.key_map);
            buf.put_u32_le(u32::from(entry.processor));
        }
        buf.put_u32_le(self.time_per_iteration_us);
        buf.freeze()
    }

    /// Parse
    ///
    /// # Errors
    ///
    /// [`CompressionError::InvalidPayload`] if the data is truncated or a
    /// processor id does not fit a byte.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let n = take_count(&mut buf, "address list", Self::ENTRY_WORDS)?;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let bit_field = take_u32(&mut buf, "bitfield address")?;
            let key_map = take_u32(&mut buf, "key map address")?;
            let processor = u8::try_from(take_u32(&mut buf, "processor")?)
                .map_err(|_| CompressionError::invalid_payload("processor id out of range"))?;
            entries.push(BitFieldAddress {
                bit_field,
                key_map,
                processor,
            });
        }
        let time_per_iteration_us = take_u32(&mut buf, "time per iteration")?;
        Ok(Self {
            entries,
            time_per_iteration_us,
        })
    }
}

// ── Spare list ───────────────────────────────────────────────────────────────

/// Free spans the compressor may use as working memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpareList {
    /// `(address, size)` of each span
    pub blocks: Vec<(u32, u32)>,
}

impl SpareList {
    /// The still-free part of every block in `pool`
    pub fn from_pool(pool: &SpareMemoryPool) -> Self {
        Self {
            blocks: pool
                .blocks()
                .iter()
                .map(|b| (b.free_address(), b.size))
                .collect(),
        }
    }

    /// Encoded size for `n_blocks` blocks
    pub fn encoded_len(n_blocks: usize) -> u32 {
        byte_len(1 + 2 * n_blocks)
    }

    /// Serialise
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.blocks.len()) as usize);
        buf.put_u32_le(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        for &(address, size) in &self.blocks {
            buf.put_u32_le(address);
            buf.put_u32_le(size);
        }
        buf.freeze()
    }

    /// Parse
    ///
    /// # Errors
    ///
    /// [`CompressionError::InvalidPayload`] if the data is truncated.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let n = take_count(&mut buf, "spare list", 2)?;
        let blocks = (0..n)
            .map(|_| -> Result<(u32, u32)> {
                Ok((take_u32(&mut buf, "spare address")?, take_u32(&mut buf, "spare size")?))
            })
            .collect::<Result<_>>()?;
        Ok(Self { blocks })
    }
}

// ── Population core regions ──────────────────────────────────────────────────

/// Bitfield filter region of a population core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitFieldRegion {
    /// One filter per source key
    pub filters: Vec<BitField>,
}

impl BitFieldRegion {
    /// Encoded size
    pub fn encoded_len(&self) -> u32 {
        byte_len(1 + self.filters.iter().map(|f| 2 + f.words.len()).sum::<usize>())
    }

    /// Serialise
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
        buf.put_u32_le(u32::try_from(self.filters.len()).unwrap_or(u32::MAX));
        for filter in &self.filters {
            buf.put_u32_le(filter.key);
            buf.put_u32_le(u32::try_from(filter.words.len()).unwrap_or(u32::MAX));
            for &word in &filter.words {
                buf.put_u32_le(word);
            }
        }
        buf.freeze()
    }

    /// Parse
    ///
    /// # Errors
    ///
    /// [`CompressionError::InvalidPayload`] if the data is truncated.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let n = take_count(&mut buf, "bitfield filters", 2)?;
        let mut filters = Vec::with_capacity(n);
        for _ in 0..n {
            let key = take_u32(&mut buf, "filter key")?;
            let n_words = take_count(&mut buf, "filter words", 1)?;
            let words = (0..n_words)
                .map(|_| take_u32(&mut buf, "filter word"))
                .collect::<Result<_>>()?;
            filters.push(BitField { key, words });
        }
        Ok(Self { filters })
    }
}

/// Key to atom-count map of a population core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyAtomMap {
    /// `(base key, n_atoms)` of each source
    pub pairs: Vec<(u32, u32)>,
}

impl KeyAtomMap {
    /// Encoded size
    pub fn encoded_len(&self) -> u32 {
        byte_len(1 + 2 * self.pairs.len())
    }

    /// Atoms behind `key`
    pub fn n_atoms(&self, key: u32) -> Option<u32> {
        self.pairs.iter().find(|&&(k, _)| k == key).map(|&(_, n)| n)
    }

    /// Serialise
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len() as usize);
        buf.put_u32_le(u32::try_from(self.pairs.len()).unwrap_or(u32::MAX));
        for &(key, n_atoms) in &self.pairs {
            buf.put_u32_le(key);
            buf.put_u32_le(n_atoms);
        }
        buf.freeze()
    }

    /// Parse
    ///
    /// # Errors
    ///
    /// [`CompressionError::InvalidPayload`] if the data is truncated.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let n = take_count(&mut buf, "key map", 2)?;
        let pairs = (0..n)
            .map(|_| -> Result<(u32, u32)> {
                Ok((take_u32(&mut buf, "key")?, take_u32(&mut buf, "atom count")?))
            })
            .collect::<Result<_>>()?;
        Ok(Self { pairs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_list_layout() {
        let list = AddressList {
            entries: vec![BitFieldAddress {
                bit_field: 0x6000_0100,
                key_map: 0x6000_0200,
                processor: 3,
            }],
            time_per_iteration_us: 500,
        };
        let bytes = list.encode();
        assert_eq!(bytes.len() as u32, AddressList::encoded_len(1));
        let words: Vec<u32> = bytes
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words, vec![1, 0x6000_0100, 0x6000_0200, 3, 500]);
        assert_eq!(AddressList::decode(&bytes).unwrap(), list);
    }

    #[test]
    fn spare_list_uses_free_span() {
        let mut pool = SpareMemoryPool::from_blocks([(0x1000, 100), (0x2000, 50)]);
        pool.steal(60);
        let list = SpareList::from_pool(&pool);
        assert_eq!(list.blocks, vec![(0x1000 + 60, 40), (0x2000, 50)]);
        let bytes = list.encode();
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        assert_eq!(bytes.len() as u32, SpareList::encoded_len(2));
    }

    #[test]
    fn routing_table_header_then_entries() {
        let input = CompressionInput {
            app_id: 30,
            compress_only_when_needed: true,
            compress_as_much_as_possible: false,
            entries: vec![RoutingEntry::new(0x10, 0xFFFF_FFF0, Route::new(&[0], &[2]))],
        };
        let bytes = input.encode();
        assert_eq!(bytes.len() as u32, CompressionInput::encoded_len(1));
        assert_eq!(&bytes[..16], &[30, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(CompressionInput::decode(&bytes).unwrap(), input);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let bytes = KeyAtomMap {
            pairs: vec![(1, 2), (3, 4)],
        }
        .encode();
        assert!(KeyAtomMap::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(SpareList::decode(&[5, 0, 0, 0]).is_err());
        assert!(CompressionInput::decode(&[]).is_err());
        let region = BitFieldRegion {
            filters: vec![BitField { key: 7, words: vec![1, 2] }],
        };
        let encoded = region.encode();
        assert_eq!(BitFieldRegion::decode(&encoded).unwrap(), region);
        assert!(BitFieldRegion::decode(&encoded[..12]).is_err());
    }
}
