//! Typed non-code ranges and their classifier.
//!
//! Discovery attributes every byte of a module either to code (a
//! [`crate::discovery::NativeCodeRegion`]) or to one of the metadata shapes modeled
//! here: referenced data, dispatch tables, inter-function padding, image headers and
//! guard hash slots. [`MetadataRange`] is the closed sum over those shapes; consumers
//! match on the discriminant rather than downcasting.
//!
//! [`MetadataRangeClassifier`] builds the ranges. Data ranges are sized through an
//! explicit decision table keyed by how the address was found ([`DiscoveryReason`]):
//! an address reached through an external jump thunk holds a pointer, an address with
//! a covering symbol is as big as the symbol says, and anything else gets the minimal
//! one byte span until something proves it larger.
//!
//! # Examples
//!
//! ```rust,no_run
//! use codescope::{DiscoveryReason, DiscoverySource, MetadataRangeClassifier};
//!
//! let classifier = MetadataRangeClassifier::new(false);
//! let source = DiscoverySource::new(0x1400, DiscoveryReason::EXTERNAL_JMP, None);
//! let range = classifier.data_range(&source);
//! assert_eq!(range.len(), 8);
//! ```

mod jumptable;
mod xfg;

pub use jumptable::{JumpTableDetector, JumpTableRange, JumpTableStrategy, RvaDispatchStrategy};
pub use xfg::{XfgRange, XfgValidator, XFG_HASH_SIZE};

use bitflags::bitflags;

use crate::{
    module::ModuleBounds,
    pattern::{ByteSequence, ByteSequenceMatcher},
};

bitflags! {
    /// How an address came to the analyzer's attention.
    ///
    /// Multiple sources may report the same address, so reasons combine as flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiscoveryReason: u32 {
        /// Referenced by a jump thunk leaving the module (import stubs).
        const EXTERNAL_JMP = 1 << 0;
        /// Covered by a symbol from debug information.
        const SYMBOL = 1 << 1;
        /// Target of a direct call.
        const CALL = 1 << 2;
        /// Matched a byte signature.
        const PATTERN = 1 << 3;
        /// Listed in the export directory.
        const EXPORT = 1 << 4;
        /// Named by the load config directory.
        const CONFIG = 1 << 5;
        /// Listed in the import directory.
        const IMPORT = 1 << 6;
        /// Referenced from unwind information.
        const UNWIND_INFO = 1 << 7;
        /// Listed in the exception directory's runtime function table.
        const RUNTIME_FUNCTION = 1 << 8;
    }
}

/// An address together with how it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySource {
    address: u64,
    reason: DiscoveryReason,
    symbol_size: Option<u64>,
}

impl DiscoverySource {
    /// Create a source record. `symbol_size` carries the covering symbol's reported
    /// size when the reason includes [`DiscoveryReason::SYMBOL`].
    pub fn new(address: u64, reason: DiscoveryReason, symbol_size: Option<u64>) -> DiscoverySource {
        DiscoverySource {
            address,
            reason,
            symbol_size,
        }
    }

    /// The address this source reported.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The combined reasons this address was reported.
    pub fn reason(&self) -> DiscoveryReason {
        self.reason
    }

    /// The covering symbol's reported size, if a symbol contributed.
    pub fn symbol_size(&self) -> Option<u64> {
        self.symbol_size
    }
}

/// A span of referenced non-code bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRange {
    start_address: u64,
    len: u64,
    reason: DiscoveryReason,
    children: Vec<DataRange>,
}

impl DataRange {
    pub(crate) fn new(start_address: u64, len: u64, reason: DiscoveryReason) -> DataRange {
        DataRange {
            start_address,
            len: len.max(1),
            reason,
            children: Vec::new(),
        }
    }

    /// The address of the first byte of this range.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// The address of the last byte of this range.
    pub fn end_address(&self) -> u64 {
        self.start_address + self.len - 1
    }

    /// The number of bytes this range spans. Always at least 1.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Data ranges always span at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The combined reasons this range was discovered.
    pub fn reason(&self) -> DiscoveryReason {
        self.reason
    }

    /// Structured sub-items of this range. Children never have children of their own.
    pub fn children(&self) -> &[DataRange] {
        &self.children
    }

    /// Attach a structured sub-item.
    ///
    /// # Panics
    ///
    /// Panics if `child` itself has children; nesting is one level deep.
    pub fn add_child(&mut self, child: DataRange) {
        assert!(
            child.children.is_empty(),
            "data ranges nest one level deep"
        );

        self.children.push(child);
    }
}

/// Padding bytes between functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunkRange {
    start_address: u64,
    bytes: Vec<u8>,
}

impl JunkRange {
    pub(crate) fn new(start_address: u64, bytes: Vec<u8>) -> JunkRange {
        JunkRange {
            start_address,
            bytes,
        }
    }

    /// The address of the first padding byte.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// The address of the last padding byte.
    pub fn end_address(&self) -> u64 {
        self.start_address + (self.bytes.len() as u64).max(1) - 1
    }

    /// The raw padding bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The image-header span at the start of a module, permanently non-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeHeaderRange {
    start_address: u64,
    end_address: u64,
}

impl PeHeaderRange {
    pub(crate) fn new(start_address: u64, end_address: u64) -> PeHeaderRange {
        PeHeaderRange {
            start_address,
            end_address,
        }
    }

    /// The address of the first header byte (the module base).
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// The address of the last header byte.
    pub fn end_address(&self) -> u64 {
        self.end_address
    }
}

/// One classified non-code range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRange {
    /// Referenced data bytes.
    Data(DataRange),
    /// A recognized dispatch table.
    JumpTable(JumpTableRange),
    /// Inter-function padding.
    Junk(JunkRange),
    /// The image header span.
    PeHeader(PeHeaderRange),
    /// A guard hash slot preceding a function.
    Xfg(XfgRange),
}

impl MetadataRange {
    /// The address of the first byte of the range.
    pub fn start_address(&self) -> u64 {
        match self {
            MetadataRange::Data(range) => range.start_address(),
            MetadataRange::JumpTable(range) => range.start_address(),
            MetadataRange::Junk(range) => range.start_address(),
            MetadataRange::PeHeader(range) => range.start_address(),
            MetadataRange::Xfg(range) => range.start_address(),
        }
    }

    /// The address of the last byte of the range.
    pub fn end_address(&self) -> u64 {
        match self {
            MetadataRange::Data(range) => range.end_address(),
            MetadataRange::JumpTable(range) => range.end_address(),
            MetadataRange::Junk(range) => range.end_address(),
            MetadataRange::PeHeader(range) => range.end_address(),
            MetadataRange::Xfg(range) => range.end_address(),
        }
    }

    /// Whether `address` falls inside the range (bounds inclusive).
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address() && address <= self.end_address()
    }
}

/// How a data range's length is derived from its discovery reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeRule {
    /// 4 bytes on a 32-bit target, 8 on a 64-bit target.
    PointerSized,
    /// The covering symbol's reported size, clamped to a minimum of 1.
    SymbolSize,
    /// The minimal one byte span.
    One,
}

/// Sizing rules in precedence order. The final catch-all row keeps the table total
/// over every known reason.
const SIZE_RULES: &[(DiscoveryReason, SizeRule)] = &[
    (DiscoveryReason::EXTERNAL_JMP, SizeRule::PointerSized),
    (DiscoveryReason::SYMBOL, SizeRule::SymbolSize),
    (DiscoveryReason::all(), SizeRule::One),
];

/// Builds typed [`MetadataRange`]s for the non-code bytes a discovery encounters.
pub struct MetadataRangeClassifier {
    is_32bit: bool,
    junk_patterns: ByteSequenceMatcher,
}

impl MetadataRangeClassifier {
    /// Create a classifier for a target of the given bitness.
    pub fn new(is_32bit: bool) -> MetadataRangeClassifier {
        let mut junk_patterns = ByteSequenceMatcher::new();

        // int3 and zero padding, the two fills linkers emit between functions
        junk_patterns.add(ByteSequence::exact(vec![0xcc], "int3-padding").expect("static signature"));
        junk_patterns.add(ByteSequence::exact(vec![0x00], "zero-padding").expect("static signature"));

        MetadataRangeClassifier {
            is_32bit,
            junk_patterns,
        }
    }

    /// Build a data range for a discovered address, sized by the decision table.
    ///
    /// # Panics
    ///
    /// Panics if the source carries no reason at all. A reasonless source is a
    /// programmer error upstream; sizing it silently would hide the bug.
    pub fn data_range(&self, source: &DiscoverySource) -> DataRange {
        let rule = SIZE_RULES
            .iter()
            .find(|(reason, _)| source.reason().intersects(*reason))
            .map(|(_, rule)| *rule)
            .unwrap_or_else(|| {
                panic!(
                    "no sizing rule for discovery source at {:#x} with empty reason",
                    source.address()
                )
            });

        let len = match rule {
            SizeRule::PointerSized => {
                if self.is_32bit {
                    4
                } else {
                    8
                }
            }
            SizeRule::SymbolSize => source.symbol_size().unwrap_or(1).max(1),
            SizeRule::One => 1,
        };

        DataRange::new(source.address(), len, source.reason())
    }

    /// Build the header range covering a module's image headers.
    pub fn pe_header(&self, bounds: &ModuleBounds) -> PeHeaderRange {
        PeHeaderRange::new(bounds.base(), bounds.header_end())
    }

    /// Build a padding range from raw bytes.
    pub fn junk(&self, start_address: u64, bytes: Vec<u8>) -> JunkRange {
        JunkRange::new(start_address, bytes)
    }

    /// Whether `bytes` look like inter-function padding (int3 or zero fill).
    pub fn is_junk(&self, bytes: &[u8]) -> bool {
        !bytes.is_empty()
            && bytes
                .iter()
                .all(|byte| self.junk_patterns.find(&[*byte], 0).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_jmp_is_pointer_sized() {
        let source = DiscoverySource::new(0x1000, DiscoveryReason::EXTERNAL_JMP, None);

        let on64 = MetadataRangeClassifier::new(false).data_range(&source);
        assert_eq!(on64.len(), 8);
        assert_eq!(on64.end_address(), 0x1007);

        let on32 = MetadataRangeClassifier::new(true).data_range(&source);
        assert_eq!(on32.len(), 4);
        assert_eq!(on32.end_address(), 0x1003);
    }

    #[test]
    fn symbol_size_is_clamped() {
        let classifier = MetadataRangeClassifier::new(false);

        let sized = DiscoverySource::new(0x1000, DiscoveryReason::SYMBOL, Some(0x20));
        assert_eq!(classifier.data_range(&sized).len(), 0x20);

        // Zero-sized guard symbols still occupy one byte
        let zero = DiscoverySource::new(0x1000, DiscoveryReason::SYMBOL, Some(0));
        assert_eq!(classifier.data_range(&zero).len(), 1);

        let no_size = DiscoverySource::new(0x1000, DiscoveryReason::SYMBOL, None);
        assert_eq!(classifier.data_range(&no_size).len(), 1);
    }

    #[test]
    fn other_reasons_default_to_one_byte() {
        let classifier = MetadataRangeClassifier::new(false);

        for reason in [
            DiscoveryReason::CALL,
            DiscoveryReason::PATTERN,
            DiscoveryReason::EXPORT,
            DiscoveryReason::RUNTIME_FUNCTION,
        ] {
            let range = classifier.data_range(&DiscoverySource::new(0x1000, reason, None));
            assert_eq!(range.len(), 1, "reason {reason:?}");
        }
    }

    #[test]
    fn external_jmp_takes_precedence_over_symbol() {
        let classifier = MetadataRangeClassifier::new(false);
        let source = DiscoverySource::new(
            0x1000,
            DiscoveryReason::EXTERNAL_JMP | DiscoveryReason::SYMBOL,
            Some(0x40),
        );

        assert_eq!(classifier.data_range(&source).len(), 8);
    }

    #[test]
    #[should_panic(expected = "no sizing rule")]
    fn empty_reason_panics() {
        let classifier = MetadataRangeClassifier::new(false);
        classifier.data_range(&DiscoverySource::new(0x1000, DiscoveryReason::empty(), None));
    }

    #[test]
    fn children_nest_one_level() {
        let mut parent = DataRange::new(0x1000, 0x10, DiscoveryReason::SYMBOL);
        parent.add_child(DataRange::new(0x1000, 4, DiscoveryReason::SYMBOL));
        parent.add_child(DataRange::new(0x1004, 4, DiscoveryReason::SYMBOL));

        assert_eq!(parent.children().len(), 2);
    }

    #[test]
    #[should_panic(expected = "one level deep")]
    fn grandchildren_are_rejected() {
        let mut child = DataRange::new(0x1000, 4, DiscoveryReason::SYMBOL);
        child.add_child(DataRange::new(0x1000, 1, DiscoveryReason::SYMBOL));

        let mut parent = DataRange::new(0x1000, 0x10, DiscoveryReason::SYMBOL);
        parent.add_child(child);
    }

    #[test]
    fn junk_recognition() {
        let classifier = MetadataRangeClassifier::new(false);

        assert!(classifier.is_junk(&[0xcc, 0xcc, 0xcc]));
        assert!(classifier.is_junk(&[0x00, 0x00]));
        assert!(classifier.is_junk(&[0xcc, 0x00, 0xcc]));
        assert!(!classifier.is_junk(&[0xcc, 0x90]));
        assert!(!classifier.is_junk(&[]));
    }

    #[test]
    fn metadata_range_delegates_bounds() {
        let range = MetadataRange::Junk(JunkRange::new(0x1000, vec![0xcc; 4]));

        assert_eq!(range.start_address(), 0x1000);
        assert_eq!(range.end_address(), 0x1003);
        assert!(range.contains(0x1003));
        assert!(!range.contains(0x1004));
    }
}
