//! The control-flow walk that turns a candidate address into code regions.

use std::collections::HashSet;

use crate::{
    discovery::{
        AddressOwnership, DiscoveryError, FlowKind, Instruction, InstructionProvider,
        InterruptKind, NativeCodeRegion, NativeCodeRegionCollection,
    },
    module::{MemoryReader, ModuleBounds},
    ranges::{JumpTableDetector, MetadataRange},
};

/// Tunable ceilings for a single discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// The most bytes one discovery may claim before it is abandoned as a runaway.
    pub max_function_bytes: u64,
    /// The most contiguous regions one discovery may produce.
    pub max_regions: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> DiscoveryConfig {
        DiscoveryConfig {
            max_function_bytes: 0x40000,
            max_regions: 4000,
        }
    }
}

/// Walks the control-flow graph reachable from one candidate address.
///
/// The walk is an explicit worklist over addresses, never recursion: each popped
/// address is decoded, its bytes claimed in the shared [`AddressOwnership`] set, and
/// its control-flow successors pushed. Paths end at returns, at claimed or
/// out-of-range branch targets, and at indirect jumps no dispatch table explains.
/// The whole discovery halts on undecodable bytes, unrecognized interrupts, or the
/// configured size ceiling; whatever was claimed up to that point is still returned.
///
/// A discoverer is consumed by [`discover`](RegionDiscoverer::discover). Once a
/// terminal outcome exists the same bytes would reproduce it, so there is nothing a
/// second call could add.
///
/// # Examples
///
/// ```rust,ignore
/// let ownership = AddressOwnership::new();
/// let discoverer = RegionDiscoverer::new(0x1000, &provider, &image, image.bounds(), &ownership);
/// let (collection, metadata) = discoverer.discover();
/// assert!(collection.is_success());
/// ```
pub struct RegionDiscoverer<'a, P: InstructionProvider, M: MemoryReader> {
    candidate: u64,
    provider: &'a P,
    memory: &'a M,
    bounds: &'a ModuleBounds,
    ownership: &'a AddressOwnership,
    detector: JumpTableDetector,
    config: DiscoveryConfig,

    worklist: Vec<u64>,
    visited: HashSet<u64>,
    instructions: Vec<Instruction>,
    metadata: Vec<MetadataRange>,
    claimed_bytes: u64,
}

impl<'a, P: InstructionProvider, M: MemoryReader> RegionDiscoverer<'a, P, M> {
    /// Create a discoverer for one candidate address with default configuration.
    pub fn new(
        candidate: u64,
        provider: &'a P,
        memory: &'a M,
        bounds: &'a ModuleBounds,
        ownership: &'a AddressOwnership,
    ) -> RegionDiscoverer<'a, P, M> {
        RegionDiscoverer {
            candidate,
            provider,
            memory,
            bounds,
            ownership,
            detector: JumpTableDetector::new(),
            config: DiscoveryConfig::default(),
            worklist: Vec::new(),
            visited: HashSet::new(),
            instructions: Vec::new(),
            metadata: Vec::new(),
            claimed_bytes: 0,
        }
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: DiscoveryConfig) -> RegionDiscoverer<'a, P, M> {
        self.config = config;
        self
    }

    /// Replace the default jump-table detector.
    #[must_use]
    pub fn with_detector(mut self, detector: JumpTableDetector) -> RegionDiscoverer<'a, P, M> {
        self.detector = detector;
        self
    }

    /// Run the walk to completion.
    ///
    /// Returns the collection for the candidate plus any metadata ranges (dispatch
    /// tables) recognized along the way. The collection's
    /// [`error`](NativeCodeRegionCollection::error) describes how the walk ended;
    /// regions claimed before a failure are retained.
    pub fn discover(mut self) -> (NativeCodeRegionCollection, Vec<MetadataRange>) {
        self.worklist.push(self.candidate);

        let mut error = DiscoveryError::None;

        while let Some(address) = self.worklist.pop() {
            if self.visited.contains(&address) {
                continue;
            }

            // Addresses outside executable memory end their path; they are expected
            // exits, not failures
            if !self.bounds.is_executable(address) {
                continue;
            }

            // Any already-claimed byte ends the path. Foreign bytes belong to another
            // discovery; bytes this walk owns without having visited them are the
            // interior of an instruction it already kept, and decoding there would
            // produce overlapping regions
            if self.ownership.owner_of(address).is_some() {
                continue;
            }

            let Some(instruction) = self.provider.decode(address) else {
                error = if self.instructions.is_empty() {
                    DiscoveryError::EmptyChunk
                } else {
                    DiscoveryError::InvalidInstruction
                };
                break;
            };

            if !self
                .ownership
                .claim(self.candidate, instruction.address, instruction.len())
            {
                // Part of this span is already held, either by another discovery that
                // won the race or by an earlier instruction of this walk whose bytes
                // the new decode would straddle; keeping it would overlap regions
                continue;
            }

            self.claimed_bytes += instruction.len();
            if self.claimed_bytes > self.config.max_function_bytes {
                self.visited.insert(address);
                self.instructions.push(instruction);
                error = DiscoveryError::FunctionSizeThresholdReached;
                break;
            }

            self.visited.insert(address);

            match self.successors(&instruction) {
                Ok(successors) => self.worklist.extend(successors),
                Err(interrupt_error) => {
                    self.instructions.push(instruction);
                    error = interrupt_error;
                    break;
                }
            }

            self.instructions.push(instruction);
        }

        if error == DiscoveryError::None && self.instructions.is_empty() {
            error = DiscoveryError::EmptyChunk;
        }

        let regions = self.group_regions();
        if error == DiscoveryError::None && regions.len() > self.config.max_regions {
            error = DiscoveryError::FunctionSizeThresholdReached;
        }

        (
            NativeCodeRegionCollection::new(self.candidate, regions, error),
            self.metadata,
        )
    }

    /// The addresses the walk continues at after `instruction`, or the error that
    /// halts the whole discovery.
    fn successors(&mut self, instruction: &Instruction) -> Result<Vec<u64>, DiscoveryError> {
        let next = instruction.next_address();

        let successors = match instruction.flow {
            FlowKind::Sequential => vec![next],
            FlowKind::ConditionalBranch => {
                let mut successors = vec![next];
                if let Some(target) = instruction.target {
                    successors.push(target);
                }
                successors
            }
            FlowKind::UnconditionalBranch => match instruction.target {
                Some(target) if self.continues_same_function(target) => vec![target],
                // Tail calls and jumps into foreign bytes end the path
                _ => Vec::new(),
            },
            FlowKind::IndirectBranch => self.resolve_dispatch(instruction),
            // Callees are never walked; execution resumes after the call
            FlowKind::Call | FlowKind::IndirectCall => vec![next],
            FlowKind::Return => Vec::new(),
            FlowKind::Interrupt(kind) => match kind {
                // A breakpoint at the entry itself may be a patch slot; past the
                // entry it is inter-function padding
                InterruptKind::Breakpoint => {
                    if instruction.address == self.candidate {
                        vec![next]
                    } else {
                        Vec::new()
                    }
                }
                // The process does not survive a fast fail
                InterruptKind::FailFast => Vec::new(),
                InterruptKind::AssertionFailure
                | InterruptKind::DebuggerPrompt
                | InterruptKind::Syscall => vec![next],
                InterruptKind::Unknown => return Err(DiscoveryError::UnknownInterrupt),
            },
        };

        Ok(successors)
    }

    /// The tail-call rule: an unconditional jump stays within the function only when
    /// its target is executable, unclaimed by other discoveries, and not behind the
    /// entry point without having been walked already. Under-discovery beats merging
    /// two functions' bytes.
    fn continues_same_function(&self, target: u64) -> bool {
        if !self.bounds.is_executable(target) {
            return false;
        }

        if self.ownership.is_claimed_by_other(target, self.candidate) {
            return false;
        }

        target >= self.candidate || self.visited.contains(&target)
    }

    /// Attempt to explain an indirect jump through a dispatch table. On success the
    /// table is recorded and every resolved target continues the walk; otherwise the
    /// path ends without guessing.
    fn resolve_dispatch(&mut self, instruction: &Instruction) -> Vec<u64> {
        let Some(table) = self.detector.try_detect(
            self.candidate,
            instruction,
            &self.instructions,
            self.memory,
            self.bounds,
        ) else {
            return Vec::new();
        };

        let targets = table.targets().to_vec();
        self.metadata.push(MetadataRange::JumpTable(table));
        targets
    }

    /// Group the claimed instructions into maximal contiguous runs.
    fn group_regions(&mut self) -> Vec<NativeCodeRegion> {
        if self.instructions.is_empty() {
            return Vec::new();
        }

        self.instructions
            .sort_by_key(|instruction| instruction.address);

        let mut regions = Vec::new();
        let mut run: Vec<Instruction> = Vec::new();

        for instruction in self.instructions.drain(..) {
            if let Some(last) = run.last() {
                if instruction.address != last.next_address() {
                    let start = run[0].address;
                    regions.push(NativeCodeRegion::new(start, std::mem::take(&mut run)));
                }
            }

            run.push(instruction);
        }

        if let Some(first) = run.first() {
            let start = first.address;
            regions.push(NativeCodeRegion::new(start, run));
        }

        regions
    }
}
