//! Result types produced by a discovery pass.
//!
//! A [`NativeCodeRegion`] is one maximal contiguous run of discovered instructions; a
//! [`NativeCodeRegionCollection`] is the complete, immutable outcome of walking one
//! candidate address - its regions, sorted and non-overlapping, plus the
//! [`DiscoveryError`] status describing how the walk ended.

use strum::{Display, IntoStaticStr};

use crate::discovery::Instruction;

/// The reason a discovery terminated.
///
/// Every variant other than [`DiscoveryError::None`] is terminal for the attempt: the
/// same bytes will produce the same outcome, so there is nothing to retry. Regions
/// accumulated before the failure are always retained in the collection so that
/// callers may choose best-effort use or discard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, IntoStaticStr)]
pub enum DiscoveryError {
    /// The discovery completed successfully.
    #[default]
    None,
    /// Bytes reached by the walk did not decode to a valid instruction.
    InvalidInstruction,
    /// The walk reached a software interrupt it does not recognize.
    UnknownInterrupt,
    /// The cumulative claimed bytes or walked region count exceeded the configured ceiling.
    FunctionSizeThresholdReached,
    /// The walk ended without ever claiming a byte.
    EmptyChunk,
}

/// A maximal contiguous run of instructions attributed to one discovery pass.
///
/// The start address is fixed at creation; the end address is always derived from the
/// last instruction rather than stored, so the two can never disagree.
#[derive(Debug, Clone)]
pub struct NativeCodeRegion {
    start_address: u64,
    instructions: Vec<Instruction>,
}

impl NativeCodeRegion {
    pub(crate) fn new(start_address: u64, instructions: Vec<Instruction>) -> NativeCodeRegion {
        NativeCodeRegion {
            start_address,
            instructions,
        }
    }

    /// The address of the first byte of this region.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// The address of the last byte occupied by this region.
    ///
    /// If bytes 0x1000 and 0x1001 are occupied, the end address is 0x1001, not the
    /// first address after the region.
    pub fn end_address(&self) -> u64 {
        match self.instructions.last() {
            Some(last) => last.address + last.len() - 1,
            None => self.start_address,
        }
    }

    /// The number of bytes this region spans. Clamped to a minimum of 1.
    pub fn len(&self) -> u64 {
        (self.end_address() - self.start_address + 1).max(1)
    }

    /// Whether this region holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instructions of this region, in address order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Whether `address` falls inside this region (bounds inclusive).
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address <= self.end_address()
    }
}

/// The regions discovered for one candidate address.
///
/// Immutable once the discovery terminates. Regions are sorted ascending by start
/// address and never overlap - neither each other nor regions of any other collection
/// produced against the same ownership set.
#[derive(Debug, Clone)]
pub struct NativeCodeRegionCollection {
    address: u64,
    regions: Vec<NativeCodeRegion>,
    error: DiscoveryError,
}

impl NativeCodeRegionCollection {
    pub(crate) fn new(
        address: u64,
        mut regions: Vec<NativeCodeRegion>,
        error: DiscoveryError,
    ) -> NativeCodeRegionCollection {
        regions.sort_by_key(NativeCodeRegion::start_address);

        NativeCodeRegionCollection {
            address,
            regions,
            error,
        }
    }

    /// The candidate address this discovery was seeded with.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The discovered regions, sorted ascending by start address.
    pub fn regions(&self) -> &[NativeCodeRegion] {
        &self.regions
    }

    /// The reason the discovery failed, or [`DiscoveryError::None`] on success.
    pub fn error(&self) -> DiscoveryError {
        self.error
    }

    /// Whether the discovery completed without error.
    pub fn is_success(&self) -> bool {
        self.error == DiscoveryError::None
    }

    /// All instructions of all regions, flattened and sorted by address.
    pub fn instructions(&self) -> Vec<&Instruction> {
        let mut instructions: Vec<&Instruction> = self
            .regions
            .iter()
            .flat_map(|region| region.instructions())
            .collect();

        instructions.sort_by_key(|instruction| instruction.address);
        instructions
    }

    /// Whether `address` falls inside exactly one of the contained regions.
    pub fn contains(&self, address: u64) -> bool {
        self.regions.iter().any(|region| region.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FlowKind;

    fn sequential(address: u64, len: usize) -> Instruction {
        Instruction::new(address, vec![0x90; len], FlowKind::Sequential, None)
    }

    #[test]
    fn region_end_address_is_inclusive() {
        let region = NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 2), sequential(0x1002, 3)]);

        assert_eq!(region.start_address(), 0x1000);
        assert_eq!(region.end_address(), 0x1004);
        assert_eq!(region.len(), 5);
    }

    #[test]
    fn region_without_instructions_spans_one_byte() {
        let region = NativeCodeRegion::new(0x1000, Vec::new());

        assert_eq!(region.end_address(), 0x1000);
        assert_eq!(region.len(), 1);
    }

    #[test]
    fn region_contains_bounds() {
        let region = NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 4)]);

        assert!(region.contains(0x1000));
        assert!(region.contains(0x1003));
        assert!(!region.contains(0xfff));
        assert!(!region.contains(0x1004));
    }

    #[test]
    fn collection_sorts_regions() {
        let collection = NativeCodeRegionCollection::new(
            0x1000,
            vec![
                NativeCodeRegion::new(0x2000, vec![sequential(0x2000, 1)]),
                NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 1)]),
            ],
            DiscoveryError::None,
        );

        assert_eq!(collection.regions()[0].start_address(), 0x1000);
        assert_eq!(collection.regions()[1].start_address(), 0x2000);
    }

    #[test]
    fn collection_contains_exactly_one_region() {
        let collection = NativeCodeRegionCollection::new(
            0x1000,
            vec![
                NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 2)]),
                NativeCodeRegion::new(0x1010, vec![sequential(0x1010, 2)]),
            ],
            DiscoveryError::None,
        );

        assert!(collection.contains(0x1001));
        assert!(collection.contains(0x1010));
        assert!(!collection.contains(0x1002));
        assert!(!collection.contains(0x100f));
    }

    #[test]
    fn collection_flattens_sorted_instructions() {
        let collection = NativeCodeRegionCollection::new(
            0x1000,
            vec![
                NativeCodeRegion::new(0x2000, vec![sequential(0x2000, 1)]),
                NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 1), sequential(0x1001, 1)]),
            ],
            DiscoveryError::None,
        );

        let addresses: Vec<u64> = collection
            .instructions()
            .iter()
            .map(|instruction| instruction.address)
            .collect();

        assert_eq!(addresses, vec![0x1000, 0x1001, 0x2000]);
    }

    #[test]
    fn error_status() {
        let failed = NativeCodeRegionCollection::new(
            0x1000,
            vec![NativeCodeRegion::new(0x1000, vec![sequential(0x1000, 1)])],
            DiscoveryError::InvalidInstruction,
        );

        assert!(!failed.is_success());
        assert_eq!(failed.error(), DiscoveryError::InvalidInstruction);
        assert_eq!(failed.regions().len(), 1);
    }
}
