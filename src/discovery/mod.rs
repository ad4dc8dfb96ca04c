//! Control-flow driven discovery of native code regions.
//!
//! Given a candidate address inside a stripped module, discovery walks the reachable
//! control flow one instruction at a time and claims every byte it can prove is code.
//! Claims go through a shared [`AddressOwnership`] set, so discoveries over different
//! candidates can run concurrently without ever attributing a byte twice.
//!
//! The walk itself lives in [`RegionDiscoverer`]; its outcome is a
//! [`NativeCodeRegionCollection`] holding the contiguous [`NativeCodeRegion`]s plus a
//! [`DiscoveryError`] status. Failed walks are ordinary outcomes, not `Err`: the
//! collection keeps whatever was claimed before the failure.
//!
//! Of the non-code shapes, only dispatch tables are recognized inline (the walk needs
//! their targets to continue). Data, padding, header and guard-hash ranges are built
//! by the embedding analysis layer, which feeds the gaps between discovered regions
//! through [`crate::ranges::MetadataRangeClassifier`] and
//! [`crate::ranges::XfgValidator`] once the walks have settled.
//!
//! # Examples
//!
//! ```rust,ignore
//! use codescope::{AddressOwnership, RegionDiscoverer};
//!
//! let ownership = AddressOwnership::new();
//! let discoverer = RegionDiscoverer::new(entry, &decoder, &image, image.bounds(), &ownership);
//!
//! let (collection, metadata) = discoverer.discover();
//! for region in collection.regions() {
//!     println!("{:#x}..={:#x}", region.start_address(), region.end_address());
//! }
//! ```

mod discoverer;
mod instruction;
mod ownership;
mod region;

pub use discoverer::{DiscoveryConfig, RegionDiscoverer};
pub use instruction::{FlowKind, Instruction, InstructionProvider, InterruptKind};
pub use ownership::AddressOwnership;
pub use region::{DiscoveryError, NativeCodeRegion, NativeCodeRegionCollection};

use rayon::prelude::*;

use crate::{
    module::{MemoryReader, ModuleBounds},
    ranges::MetadataRange,
};

/// Discover every candidate address in parallel over one shared ownership set.
///
/// Each candidate gets its own [`RegionDiscoverer`]; the shared [`AddressOwnership`]
/// guarantees that overlapping control-flow graphs never claim the same byte into two
/// collections. Results come back in candidate order regardless of scheduling.
pub fn discover_functions<P, M>(
    candidates: &[u64],
    provider: &P,
    memory: &M,
    bounds: &ModuleBounds,
    ownership: &AddressOwnership,
    config: &DiscoveryConfig,
) -> Vec<(NativeCodeRegionCollection, Vec<MetadataRange>)>
where
    P: InstructionProvider + Sync,
    M: MemoryReader + Sync,
{
    candidates
        .par_iter()
        .map(|&candidate| {
            RegionDiscoverer::new(candidate, provider, memory, bounds, ownership)
                .with_config(config.clone())
                .discover()
        })
        .collect()
}
