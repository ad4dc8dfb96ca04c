//! System-wide byte ownership tracking across concurrent discoveries.
//!
//! Discoveries over different candidate addresses may run on different threads and
//! their control-flow graphs may overlap. To guarantee that no byte is ever attributed
//! to two collections, every instruction's bytes must be claimed here before the
//! instruction is kept.

use dashmap::{mapref::entry::Entry, DashMap};

/// A concurrent address -> owner map with compare-and-swap claiming.
///
/// The owner of a byte is the candidate address of the discovery that claimed it.
/// Claims are all-or-nothing at instruction granularity: if any byte of the requested
/// span is already owned, even by the same discovery, bytes won earlier in the same
/// call are rolled back and the claim fails. Strictness is what keeps regions
/// disjoint - a span overlapping bytes its own walk already holds would otherwise
/// attribute those bytes twice.
#[derive(Debug, Default)]
pub struct AddressOwnership {
    claims: DashMap<u64, u64>,
}

impl AddressOwnership {
    /// Create an empty ownership set.
    pub fn new() -> AddressOwnership {
        AddressOwnership::default()
    }

    /// Atomically claim `len` bytes starting at `start` for `owner`.
    ///
    /// Returns `true` if every byte of the span was unowned and now belongs to
    /// `owner`. Returns `false` without any net effect if any byte of the span is
    /// already held, no matter by whom.
    pub fn claim(&self, owner: u64, start: u64, len: u64) -> bool {
        let mut won = Vec::new();

        for address in start..start + len.max(1) {
            match self.claims.entry(address) {
                Entry::Vacant(entry) => {
                    entry.insert(owner);
                    won.push(address);
                }
                Entry::Occupied(entry) => {
                    drop(entry);

                    // Roll back only the bytes this call inserted
                    for address in won {
                        self.claims.remove(&address);
                    }

                    return false;
                }
            }
        }

        true
    }

    /// The owner of `address`, if any discovery has claimed it.
    pub fn owner_of(&self, address: u64) -> Option<u64> {
        self.claims.get(&address).map(|entry| *entry.value())
    }

    /// Whether `address` is claimed by a discovery other than `owner`.
    pub fn is_claimed_by_other(&self, address: u64, owner: u64) -> bool {
        matches!(self.owner_of(address), Some(existing) if existing != owner)
    }

    /// The total number of claimed bytes across all discoveries.
    pub fn claimed_bytes(&self) -> usize {
        self.claims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_query() {
        let ownership = AddressOwnership::new();

        assert!(ownership.claim(0x1000, 0x1000, 4));
        assert_eq!(ownership.owner_of(0x1003), Some(0x1000));
        assert_eq!(ownership.owner_of(0x1004), None);
    }

    #[test]
    fn overlapping_reclaim_by_same_owner_fails() {
        let ownership = AddressOwnership::new();

        assert!(ownership.claim(0x1000, 0x1000, 4));
        assert!(!ownership.claim(0x1000, 0x1002, 4));

        // The original claim survives, the overlapping attempt leaves nothing behind
        assert_eq!(ownership.owner_of(0x1003), Some(0x1000));
        assert_eq!(ownership.owner_of(0x1004), None);
        assert_eq!(ownership.claimed_bytes(), 4);
    }

    #[test]
    fn conflicting_claim_rolls_back() {
        let ownership = AddressOwnership::new();

        assert!(ownership.claim(0x1000, 0x1000, 4));
        // Overlaps the tail of the first claim
        assert!(!ownership.claim(0x2000, 0x1002, 4));

        // The loser's partial bytes must not linger
        assert_eq!(ownership.owner_of(0x1004), None);
        assert_eq!(ownership.owner_of(0x1005), None);
        assert_eq!(ownership.owner_of(0x1002), Some(0x1000));
    }

    #[test]
    fn rollback_preserves_prior_claims_of_same_owner() {
        let ownership = AddressOwnership::new();

        assert!(ownership.claim(0x1000, 0x1000, 2));
        assert!(ownership.claim(0x2000, 0x1004, 2));

        // 0x1002..=0x1003 are free, 0x1004 belongs to the other owner
        assert!(!ownership.claim(0x1000, 0x1002, 4));

        assert_eq!(ownership.owner_of(0x1000), Some(0x1000));
        assert_eq!(ownership.owner_of(0x1002), None);
        assert_eq!(ownership.owner_of(0x1004), Some(0x2000));
    }

    #[test]
    fn zero_length_claims_one_byte() {
        let ownership = AddressOwnership::new();

        assert!(ownership.claim(0x1000, 0x1000, 0));
        assert_eq!(ownership.owner_of(0x1000), Some(0x1000));
    }

    #[test]
    fn concurrent_claims_never_overlap() {
        use std::sync::Arc;

        let ownership = Arc::new(AddressOwnership::new());
        let mut handles = Vec::new();

        // Eight owners fight over interleaved 16-byte spans
        for owner in 0..8u64 {
            let ownership = Arc::clone(&ownership);
            handles.push(std::thread::spawn(move || {
                let mut won = 0;
                for span in 0..64u64 {
                    if ownership.claim(owner, 0x1000 + span * 16, 16) {
                        won += 1;
                    }
                }
                won
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Every span was won exactly once
        assert_eq!(total, 64);
        assert_eq!(ownership.claimed_bytes(), 64 * 16);
    }
}
