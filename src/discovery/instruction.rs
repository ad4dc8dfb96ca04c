//! Decoded instruction facts consumed by the discovery walk.
//!
//! Actual opcode decoding lives outside this crate; an [`InstructionProvider`] turns an
//! address into an [`Instruction`] carrying only the facts the walk needs - the byte
//! span and how the instruction affects control flow.

/// The well-known software interrupts that can legitimately appear inside a function.
///
/// Anything that decodes to [`InterruptKind::Unknown`] aborts the discovery, since it
/// almost always means the walk has wandered into non-code bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// `int 3` - breakpoint / inter-function padding.
    Breakpoint,
    /// `int 29h` - fast fail, immediately terminates the process.
    FailFast,
    /// `int 2Ch` - assertion failure.
    AssertionFailure,
    /// `int 2Dh` - debugger prompt, typically followed by an `int 3`.
    DebuggerPrompt,
    /// `int 2Eh` - legacy system call.
    Syscall,
    /// Any other interrupt number.
    Unknown,
}

impl InterruptKind {
    /// Classify an `int imm8` by its interrupt number.
    pub fn from_number(number: u8) -> InterruptKind {
        match number {
            0x03 => InterruptKind::Breakpoint,
            0x29 => InterruptKind::FailFast,
            0x2c => InterruptKind::AssertionFailure,
            0x2d => InterruptKind::DebuggerPrompt,
            0x2e => InterruptKind::Syscall,
            _ => InterruptKind::Unknown,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Execution falls through to the next instruction.
    Sequential,
    /// A branch taken only when a condition holds; both successors are live.
    ConditionalBranch,
    /// An unconditional branch to a statically-known target.
    UnconditionalBranch,
    /// An unconditional branch through a register or memory slot.
    IndirectBranch,
    /// A call to a statically-known target; execution resumes after it.
    Call,
    /// A call through a register or memory slot.
    IndirectCall,
    /// Returns to the caller.
    Return,
    /// A software interrupt.
    Interrupt(InterruptKind),
}

/// A single decoded instruction.
///
/// Immutable; produced by an [`InstructionProvider`] and never modified by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The virtual address of the first byte of this instruction.
    pub address: u64,
    /// The raw bytes of this instruction. Never empty.
    pub bytes: Vec<u8>,
    /// How this instruction affects control flow.
    pub flow: FlowKind,
    /// The statically-known branch or call target, if the operand encodes one.
    pub target: Option<u64>,
}

impl Instruction {
    /// Create an instruction from its decoded facts.
    pub fn new(address: u64, bytes: Vec<u8>, flow: FlowKind, target: Option<u64>) -> Instruction {
        debug_assert!(!bytes.is_empty(), "Instruction must occupy at least 1 byte");

        Instruction {
            address,
            bytes,
            flow,
            target,
        }
    }

    /// The number of bytes this instruction occupies. Clamped to a minimum of 1.
    pub fn len(&self) -> u64 {
        (self.bytes.len() as u64).max(1)
    }

    /// Instructions always occupy at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The address of the last byte occupied by this instruction.
    pub fn end_address(&self) -> u64 {
        self.address + self.len() - 1
    }

    /// The address of the byte directly after this instruction.
    pub fn next_address(&self) -> u64 {
        self.address + self.len()
    }
}

/// Decodes one instruction at an address.
///
/// This is the seam to the actual disassembler backend. `decode` returns `None` when
/// the bytes at `address` do not form a valid instruction; the discovery walk treats
/// that as a terminal condition, not as something to skip over.
pub trait InstructionProvider {
    /// Decode the instruction starting at `address`.
    fn decode(&self, address: u64) -> Option<Instruction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_classification() {
        assert_eq!(InterruptKind::from_number(0x03), InterruptKind::Breakpoint);
        assert_eq!(InterruptKind::from_number(0x29), InterruptKind::FailFast);
        assert_eq!(
            InterruptKind::from_number(0x2c),
            InterruptKind::AssertionFailure
        );
        assert_eq!(
            InterruptKind::from_number(0x2d),
            InterruptKind::DebuggerPrompt
        );
        assert_eq!(InterruptKind::from_number(0x2e), InterruptKind::Syscall);
        assert_eq!(InterruptKind::from_number(0x15), InterruptKind::Unknown);
    }

    #[test]
    fn addresses() {
        let instr = Instruction::new(0x1000, vec![0x48, 0x8b, 0x01], FlowKind::Sequential, None);

        assert_eq!(instr.len(), 3);
        assert_eq!(instr.end_address(), 0x1002);
        assert_eq!(instr.next_address(), 0x1003);
    }
}
