// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'module.rs' uses mmap to map a file into memory

//! # codescope
//!
//! Control-flow driven recovery of native code regions from stripped PE modules.
//!
//! Stripped binaries carry no symbol that says where a function's bytes end and the
//! next dispatch table or padding run begins. `codescope` recovers that structure by
//! walking the control flow from candidate entry addresses: every instruction the walk
//! can prove reachable is claimed as code, and everything else it touches is classified
//! into typed metadata ranges (referenced data, jump tables, padding, image headers,
//! guard hash slots).
//!
//! ## Features
//!
//! - **📦 Efficient memory access** - Memory-mapped PE images with section-table address
//!   translation, no copies of the module bytes
//! - **🔍 Claim-based attribution** - A shared compare-and-swap ownership set guarantees
//!   every byte belongs to at most one discovered collection, even across threads
//! - **⚡ Parallel discovery** - Batch discovery over many candidate addresses with rayon
//! - **🧩 Pluggable seams** - Instruction decoding ([`InstructionProvider`]) and jump-table
//!   recognition ([`JumpTableStrategy`](ranges::JumpTableStrategy)) are traits, so any
//!   disassembler backend plugs in
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use codescope::{AddressOwnership, ModuleImage, RegionDiscoverer};
//! use std::path::Path;
//!
//! let image = ModuleImage::from_file(Path::new("target.dll"))?;
//! let ownership = AddressOwnership::new();
//!
//! // `decoder` is any InstructionProvider backed by a disassembler
//! let discoverer = RegionDiscoverer::new(entry, &decoder, &image, image.bounds(), &ownership);
//! let (collection, metadata) = discoverer.discover();
//!
//! for region in collection.regions() {
//!     println!("code {:#x}..={:#x}", region.start_address(), region.end_address());
//! }
//! # Ok::<(), codescope::Error>(())
//! ```
//!
//! ## Outcome Model
//!
//! A discovery never fails with `Err`. Its [`NativeCodeRegionCollection`] always comes
//! back, carrying a [`DiscoveryError`] status and whatever regions were claimed before
//! a failure. [`Error`] is reserved for infrastructure problems such as I/O, PE
//! parsing, and out-of-bounds reads.

#[macro_use]
pub(crate) mod error;
pub(crate) mod module;

pub mod discovery;
pub mod pattern;
pub mod prelude;
pub mod ranges;

/// Convenience alias for operations that can fail with a [`crate::Error`]
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;

pub use discovery::{
    discover_functions, AddressOwnership, DiscoveryConfig, DiscoveryError, FlowKind, Instruction,
    InstructionProvider, InterruptKind, NativeCodeRegion, NativeCodeRegionCollection,
    RegionDiscoverer,
};
pub use module::{MemoryReader, ModuleBounds, ModuleImage};
pub use pattern::{ByteSequence, ByteSequenceMatcher};
pub use ranges::{
    DataRange, DiscoveryReason, DiscoverySource, JumpTableDetector, JumpTableRange, JunkRange,
    MetadataRange, MetadataRangeClassifier, PeHeaderRange, XfgRange, XfgValidator,
};
