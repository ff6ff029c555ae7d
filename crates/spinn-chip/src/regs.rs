//! Per-core register map.
//!
//! Each chip keeps a block of per-processor "virtual CPU" information in
//! system RAM. Four of its words are user registers that the host may write
//! before launching an executable and read back after it has finished.
//!
//! ```text
//! 0xE5007000 + p * 128            start of core p's CPU info block
//!            + 112 + 4 * n        USERn (n = 0..=3)
//! ```
//!
//! ## Register usage
//!
//! | Register | Written by | Meaning |
//! |----------|------------|---------|
//! | USER0 | loader | Base of the core's region table |
//! | USER1 | host, then compressor | Routing-table region address, then outcome word |
//! | USER2 | host | Bitfield address-list region |
//! | USER3 | host | Spare-block (reclaimable SDRAM) region |

// ── CPU info block ───────────────────────────────────────────────────────────

/// Base address of the per-core CPU info blocks.
pub const CPU_INFO_BASE: u32 = 0xE500_7000;

/// Size of one core's CPU info block.
pub const CPU_INFO_BYTES: u32 = 128;

/// Offset of USER0 within a CPU info block.
pub const USER0_OFFSET: u32 = 112;

/// Number of user registers per core.
pub const N_USER_REGISTERS: u8 = 4;

/// Width of one register in bytes.
pub const REGISTER_BYTES: u32 = 4;

// ── Named user registers ─────────────────────────────────────────────────────

/// A per-core user register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UserRegister {
    /// Region table base.
    User0 = 0,
    /// Routing table region / outcome.
    User1 = 1,
    /// Bitfield address list region.
    User2 = 2,
    /// Spare-block list region.
    User3 = 3,
}

impl UserRegister {
    /// Register index (0..=3).
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// Register the routing-table region address is recorded in.
pub const ROUTING_TABLE_REGISTER: UserRegister = UserRegister::User1;
/// Register the bitfield address-list region address is recorded in.
pub const ADDRESS_LIST_REGISTER: UserRegister = UserRegister::User2;
/// Register the spare-block list region address is recorded in.
pub const SPARE_LIST_REGISTER: UserRegister = UserRegister::User3;
/// Register the compressor writes its outcome to once finished.
pub const OUTCOME_REGISTER: UserRegister = UserRegister::User1;
/// Register holding the base of a core's region table.
pub const REGION_TABLE_REGISTER: UserRegister = UserRegister::User0;

/// Outcome word meaning "compressed and installed".
pub const OUTCOME_SUCCESS: u32 = 0;

/// Address of user register `reg` of processor `p`.
#[must_use]
pub const fn user_register_address(p: u8, reg: UserRegister) -> u32 {
    CPU_INFO_BASE + (p as u32) * CPU_INFO_BYTES + USER0_OFFSET + (reg as u32) * REGISTER_BYTES
}

// ── Region table ─────────────────────────────────────────────────────────────

/// Header words (magic, version) preceding the region pointers.
pub const REGION_TABLE_HEADER_WORDS: u32 = 2;

/// Address of the pointer word for `region` in a region table at `table_base`.
#[must_use]
pub const fn region_pointer_address(table_base: u32, region: u32) -> u32 {
    table_base + (REGION_TABLE_HEADER_WORDS + region) * REGISTER_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_registers_of_core_zero() {
        assert_eq!(user_register_address(0, UserRegister::User0), 0xE500_7070);
        assert_eq!(user_register_address(0, UserRegister::User1), 0xE500_7074);
        assert_eq!(user_register_address(0, UserRegister::User3), 0xE500_707C);
    }

    #[test]
    fn user_registers_stride_by_info_block() {
        let a = user_register_address(1, UserRegister::User2);
        let b = user_register_address(2, UserRegister::User2);
        assert_eq!(b - a, CPU_INFO_BYTES);
    }

    #[test]
    fn payload_registers_are_distinct() {
        assert_ne!(ROUTING_TABLE_REGISTER, ADDRESS_LIST_REGISTER);
        assert_ne!(ADDRESS_LIST_REGISTER, SPARE_LIST_REGISTER);
        assert_ne!(ROUTING_TABLE_REGISTER, SPARE_LIST_REGISTER);
    }

    #[test]
    fn region_pointer_skips_header() {
        assert_eq!(region_pointer_address(0x6000_0000, 0), 0x6000_0008);
        assert_eq!(region_pointer_address(0x6000_0000, 3), 0x6000_0014);
    }
}
