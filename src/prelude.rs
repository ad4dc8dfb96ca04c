//! # codescope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits from the codescope library. Import this module to get quick access to the
//! essential types for native code-region discovery.
//!
//! # Usage
//!
//! ```rust
//! use codescope::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all codescope operations
pub use crate::Error;
/// Convenient Result type alias using the codescope Error
pub use crate::Result;

// ================================================================================================
// Module Access
// ================================================================================================

/// Raw byte access to an analyzed module
pub use crate::module::MemoryReader;
/// The address layout of a module
pub use crate::module::ModuleBounds;
/// A memory-mapped PE module
pub use crate::module::ModuleImage;

// ================================================================================================
// Discovery
// ================================================================================================

/// The shared byte-ownership claim set
pub use crate::discovery::AddressOwnership;
/// Tunable ceilings for a discovery
pub use crate::discovery::DiscoveryConfig;
/// How a discovery terminated
pub use crate::discovery::DiscoveryError;
/// Decoded control-flow facts of one instruction
pub use crate::discovery::{FlowKind, Instruction, InstructionProvider, InterruptKind};
/// The result aggregate of one discovery
pub use crate::discovery::{NativeCodeRegion, NativeCodeRegionCollection};
/// The control-flow walk
pub use crate::discovery::{discover_functions, RegionDiscoverer};

// ================================================================================================
// Metadata Ranges
// ================================================================================================

/// Typed non-code ranges and their classifier
pub use crate::ranges::{
    DataRange, DiscoveryReason, DiscoverySource, JunkRange, MetadataRange,
    MetadataRangeClassifier, PeHeaderRange,
};
/// Dispatch-table recognition
pub use crate::ranges::{JumpTableDetector, JumpTableRange, JumpTableStrategy};
/// Guard hash slots
pub use crate::ranges::{XfgRange, XfgValidator};

// ================================================================================================
// Pattern Matching
// ================================================================================================

/// Wildcard-masked byte signatures
pub use crate::pattern::{ByteSequence, ByteSequenceMatcher};
