//! Extended Flow Guard hash slots.
//!
//! When a function can be the target of an indirect call, the compiler stores an 8 byte
//! XFG hash directly before the function's first instruction. The stored value always
//! has its low bit set, so comparisons must OR the bit into the candidate first.

use crate::{module::MemoryReader, Result};

/// The number of bytes an XFG hash occupies.
pub const XFG_HASH_SIZE: u64 = 8;

/// The 8-byte guard hash slot preceding a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfgRange {
    start_address: u64,
    value: u64,
    owner: u64,
}

impl XfgRange {
    pub(crate) fn new(start_address: u64, value: u64, owner: u64) -> XfgRange {
        XfgRange {
            start_address,
            value,
            owner,
        }
    }

    /// The address of the first byte of the hash slot.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// The address of the last byte of the hash slot.
    pub fn end_address(&self) -> u64 {
        self.start_address + XFG_HASH_SIZE - 1
    }

    /// The hash value stored in the slot, read little-endian.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The address of the function this hash guards.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Whether `candidate` is the hash this slot encodes.
    ///
    /// The guard encoding always sets the low bit of the stored value, so the
    /// candidate gets the bit ORed in before comparing.
    pub fn is_equivalent(&self, candidate: u64) -> bool {
        self.value == candidate | 1
    }
}

/// Reads and validates the guard hash adjacent to a function.
#[derive(Debug, Default, Clone, Copy)]
pub struct XfgValidator;

impl XfgValidator {
    /// Read the hash slot directly preceding `function_address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the function sits too close to the
    /// start of the address space, or an error from the reader if the slot bytes are
    /// not mapped.
    pub fn read_guard<M: MemoryReader + ?Sized>(
        memory: &M,
        function_address: u64,
    ) -> Result<XfgRange> {
        let Some(start) = function_address.checked_sub(XFG_HASH_SIZE) else {
            return Err(crate::Error::OutOfBounds);
        };

        let bytes = memory.read_bytes(start, XFG_HASH_SIZE as usize)?;
        let value = u64::from_le_bytes(
            bytes[..8]
                .try_into()
                .map_err(|_| crate::Error::OutOfBounds)?,
        );

        Ok(XfgRange::new(start, value, function_address))
    }

    /// Check a candidate hash against the guard slot preceding `function_address`.
    ///
    /// # Errors
    ///
    /// Propagates read failures from the guard slot.
    pub fn validate<M: MemoryReader + ?Sized>(
        memory: &M,
        function_address: u64,
        candidate: u64,
    ) -> Result<bool> {
        let range = XfgValidator::read_guard(memory, function_address)?;
        Ok(range.is_equivalent(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SliceMemory {
        base: u64,
        data: Vec<u8>,
    }

    impl MemoryReader for SliceMemory {
        fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
            let offset = address
                .checked_sub(self.base)
                .ok_or(crate::Error::OutOfBounds)? as usize;
            self.data
                .get(offset..offset + len)
                .map(<[u8]>::to_vec)
                .ok_or(crate::Error::OutOfBounds)
        }
    }

    #[test]
    fn equivalence_ors_in_the_low_bit() {
        let range = XfgRange::new(0xff8, 0x1001, 0x1000);

        assert!(range.is_equivalent(0x1000));
        assert!(range.is_equivalent(0x1001));
        assert!(!range.is_equivalent(0x1002));
    }

    #[test]
    fn span_is_eight_bytes() {
        let range = XfgRange::new(0x1ff8, 0xdead_beef_0000_0001, 0x2000);

        assert_eq!(range.start_address(), 0x1ff8);
        assert_eq!(range.end_address(), 0x1fff);
        assert_eq!(range.owner(), 0x2000);
    }

    #[test]
    fn read_guard_little_endian() {
        let memory = SliceMemory {
            base: 0x1000,
            data: vec![0x01, 0x00, 0x00, 0x00, 0xef, 0xbe, 0xad, 0xde, 0xcc],
        };

        let range = XfgValidator::read_guard(&memory, 0x1008).unwrap();

        assert_eq!(range.start_address(), 0x1000);
        assert_eq!(range.value(), 0xdead_beef_0000_0001);
    }

    #[test]
    fn validate_against_slot() {
        let memory = SliceMemory {
            base: 0x1000,
            data: vec![0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        };

        assert!(XfgValidator::validate(&memory, 0x1008, 0x1000).unwrap());
        assert!(XfgValidator::validate(&memory, 0x1008, 0x1001).unwrap());
        assert!(!XfgValidator::validate(&memory, 0x1008, 0x1002).unwrap());
    }

    #[test]
    fn read_guard_near_address_zero() {
        let memory = SliceMemory {
            base: 0,
            data: vec![0; 16],
        };

        assert!(XfgValidator::read_guard(&memory, 4).is_err());
    }
}
