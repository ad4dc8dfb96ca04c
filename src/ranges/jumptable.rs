//! Indirect-jump dispatch table recognition.
//!
//! A jump table is a compiler-generated array of addresses or relative offsets that
//! implements a multi-way branch through a single indirect jump:
//!
//! ```text
//!   lea     eax, [rcx-4]
//!   cmp     eax, 17
//!   ja      default_case
//!   lea     r8, [module_base]
//!   mov     ecx, [r8+rax*4+tableRva]
//!   add     rcx, r8
//!   jmp     rcx
//! ```
//!
//! The `mov` names everything that matters: the base register, the index register, the
//! slot size (the scale) and the RVA at which the slots live. The slots typically hold
//! RVAs that get added to the module base to form the final targets.
//!
//! Recognition heuristics vary between compilers, so they are expressed as a
//! [`JumpTableStrategy`]; the [`RvaDispatchStrategy`] shipped here recognizes the shape
//! above through masked byte patterns. Strategies that cannot identify a table return
//! `Ok(None)` - callers must never guess targets.

use crate::{
    discovery::Instruction,
    module::{MemoryReader, ModuleBounds},
    pattern::ByteSequence,
    Result,
};

/// The most slots a single table is allowed to resolve before the read is abandoned
/// as a runaway.
const MAX_SLOTS: usize = 4096;

/// A recognized dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpTableRange {
    function_address: u64,
    table_address: u64,
    slot_size: u8,
    slots: Vec<u64>,
    targets: Vec<u64>,
}

impl JumpTableRange {
    pub(crate) fn new(
        function_address: u64,
        table_address: u64,
        slot_size: u8,
        slots: Vec<u64>,
        targets: Vec<u64>,
    ) -> JumpTableRange {
        JumpTableRange {
            function_address,
            table_address,
            slot_size,
            slots,
            targets,
        }
    }

    /// The address of the function that owns the dispatch.
    pub fn function_address(&self) -> u64 {
        self.function_address
    }

    /// The address of the first slot.
    pub fn start_address(&self) -> u64 {
        self.table_address
    }

    /// The address of the last byte occupied by the table.
    pub fn end_address(&self) -> u64 {
        let length = (self.slots.len() as u64 * u64::from(self.slot_size)).max(1);
        self.table_address + length - 1
    }

    /// The width of one slot in bytes: 4 for relative offsets, 8 for pointers.
    pub fn slot_size(&self) -> u8 {
        self.slot_size
    }

    /// The raw values stored in the slots, before base resolution.
    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    /// The resolved absolute jump targets, one per slot.
    pub fn targets(&self) -> &[u64] {
        &self.targets
    }
}

/// A pluggable recognizer for one family of dispatch patterns.
///
/// ## Contract
///
/// `detect` receives the indirect jump instruction, the instructions walked before it
/// (in discovery order, the jump itself not included), raw memory access and
/// the module layout. It returns `Ok(Some(...))` only when it has positively identified
/// a table whose every resolved target lies in the module's executable ranges;
/// `Ok(None)` when the bytes do not match its pattern. Read failures may be surfaced
/// as errors, the caller treats them the same as `Ok(None)`.
pub trait JumpTableStrategy: Send + Sync {
    /// Attempt to recognize a dispatch table feeding `jump`.
    fn detect(
        &self,
        function_address: u64,
        jump: &Instruction,
        path: &[Instruction],
        memory: &dyn MemoryReader,
        bounds: &ModuleBounds,
    ) -> Result<Option<JumpTableRange>>;
}

/// Recognizes indirect-jump dispatch tables by trying each configured strategy in order.
pub struct JumpTableDetector {
    strategies: Vec<Box<dyn JumpTableStrategy>>,
}

impl Default for JumpTableDetector {
    fn default() -> JumpTableDetector {
        JumpTableDetector {
            strategies: vec![Box::new(RvaDispatchStrategy::new())],
        }
    }
}

impl JumpTableDetector {
    /// Create a detector with the default strategy set.
    pub fn new() -> JumpTableDetector {
        JumpTableDetector::default()
    }

    /// Create a detector from explicit strategies, tried in order.
    pub fn with_strategies(strategies: Vec<Box<dyn JumpTableStrategy>>) -> JumpTableDetector {
        JumpTableDetector { strategies }
    }

    /// Attempt to recognize the table feeding an indirect jump.
    ///
    /// Returns the first positive identification, or `None` when no strategy matches.
    /// Strategy errors (unreadable slots and the like) are swallowed as non-matches:
    /// an unresolved indirect jump is an expected outcome, not a failure.
    pub fn try_detect(
        &self,
        function_address: u64,
        jump: &Instruction,
        path: &[Instruction],
        memory: &dyn MemoryReader,
        bounds: &ModuleBounds,
    ) -> Option<JumpTableRange> {
        for strategy in &self.strategies {
            if let Ok(Some(table)) =
                strategy.detect(function_address, jump, path, memory, bounds)
            {
                return Some(table);
            }
        }

        None
    }
}

/// The stock strategy: an RVA-slot dispatch as emitted by MSVC for dense switches.
///
/// The essential instruction is the slot load `mov r32, [base+index*4+tableRva]`; its
/// encoding is matched with bit-level masks (opcode `8B`, mod=10/rm=100, scale=4) so
/// register choices don't matter. The disp32 of the match is the table RVA. The slot
/// count comes from the `cmp index, imm8` guarding the dispatch when one is found on
/// the path; otherwise slots are read until one fails to resolve into the module's
/// executable ranges.
pub struct RvaDispatchStrategy {
    // (sequence, offset of disp32 relative to match start)
    slot_loads: Vec<(ByteSequence, usize)>,
    bound_checks: Vec<(ByteSequence, usize)>,
}

impl Default for RvaDispatchStrategy {
    fn default() -> RvaDispatchStrategy {
        RvaDispatchStrategy::new()
    }
}

impl RvaDispatchStrategy {
    /// Create the strategy with its built-in signature set.
    pub fn new() -> RvaDispatchStrategy {
        // mov r32, [base+index*4+disp32]: opcode 8B, modrm mod=10 rm=100 (reg free),
        // sib scale=4 (base/index free), then the disp32 we want. One signature with a
        // REX prefix, one without.
        let rex_slot_load = ByteSequence::new(
            vec![0x40, 0x8b, 0x84, 0x80, 0, 0, 0, 0],
            vec![0xf0, 0xff, 0xc7, 0xc0, 0, 0, 0, 0],
            "slot-load-rex",
        );
        let slot_load = ByteSequence::new(
            vec![0x8b, 0x84, 0x80, 0, 0, 0, 0],
            vec![0xff, 0xc7, 0xc0, 0, 0, 0, 0],
            "slot-load",
        );

        // cmp r32, imm8 with mod=11: opcode 83, modrm 11 111 rrr, then the imm8 that
        // is the table's highest index. REX and non-REX forms.
        let rex_bound_check = ByteSequence::new(
            vec![0x40, 0x83, 0xf8, 0],
            vec![0xf0, 0xff, 0xf8, 0],
            "bound-check-rex",
        );
        let bound_check = ByteSequence::new(vec![0x83, 0xf8, 0], vec![0xff, 0xf8, 0], "bound-check");

        RvaDispatchStrategy {
            slot_loads: vec![
                (rex_slot_load.expect("static signature"), 4),
                (slot_load.expect("static signature"), 3),
            ],
            bound_checks: vec![
                (rex_bound_check.expect("static signature"), 3),
                (bound_check.expect("static signature"), 2),
            ],
        }
    }

    /// Find the slot-load instruction on the path, returning the table RVA.
    fn find_table_rva(&self, path: &[Instruction]) -> Option<u64> {
        // The slot load sits shortly before the jump, so scan backwards
        for instruction in path.iter().rev() {
            for (sequence, disp_offset) in &self.slot_loads {
                if sequence.matches_at(&instruction.bytes, 0)
                    && instruction.bytes.len() >= disp_offset + 4
                {
                    let disp: [u8; 4] = instruction.bytes[*disp_offset..disp_offset + 4]
                        .try_into()
                        .ok()?;
                    return Some(u64::from(u32::from_le_bytes(disp)));
                }
            }
        }

        None
    }

    /// Find the `cmp index, imm8` bound check, returning the slot count.
    fn find_slot_count(&self, path: &[Instruction]) -> Option<usize> {
        for instruction in path.iter().rev() {
            for (sequence, imm_offset) in &self.bound_checks {
                if sequence.matches_at(&instruction.bytes, 0)
                    && instruction.bytes.len() > *imm_offset
                {
                    // The cmp compares against the highest valid index
                    return Some(usize::from(instruction.bytes[*imm_offset]) + 1);
                }
            }
        }

        None
    }
}

impl JumpTableStrategy for RvaDispatchStrategy {
    fn detect(
        &self,
        function_address: u64,
        _jump: &Instruction,
        path: &[Instruction],
        memory: &dyn MemoryReader,
        bounds: &ModuleBounds,
    ) -> Result<Option<JumpTableRange>> {
        let Some(table_rva) = self.find_table_rva(path) else {
            return Ok(None);
        };

        let table_address = bounds.base() + table_rva;
        if !bounds.contains(table_address) {
            return Ok(None);
        }

        let slot_count = self.find_slot_count(path);
        let limit = slot_count.unwrap_or(MAX_SLOTS).min(MAX_SLOTS);

        let mut slots = Vec::new();
        let mut targets = Vec::new();

        for index in 0..limit {
            let slot_address = table_address + index as u64 * 4;
            let bytes = memory.read_bytes(slot_address, 4)?;
            let raw = u64::from(u32::from_le_bytes(
                bytes[..4].try_into().map_err(|_| crate::Error::OutOfBounds)?,
            ));

            let target = bounds.base() + raw;

            if !bounds.is_executable(target) {
                // With a known count a bad slot disqualifies the whole table;
                // without one it terminates the read
                if slot_count.is_some() {
                    return Ok(None);
                }

                break;
            }

            slots.push(raw);
            targets.push(target);
        }

        if slots.is_empty() {
            return Ok(None);
        }

        Ok(Some(JumpTableRange::new(
            function_address,
            table_address,
            4,
            slots,
            targets,
        )))
    }
}
