//! Benchmarks for the discovery walk and pattern matching.
//!
//! Measures the hot paths of region discovery:
//! - Straight-line walks of varying length
//! - Branch-heavy control flow
//! - Byte-signature matching
//! - Concurrent ownership claiming

extern crate codescope;

use std::collections::HashMap;

use codescope::{
    AddressOwnership, ByteSequence, ByteSequenceMatcher, FlowKind, Instruction,
    InstructionProvider, MemoryReader, ModuleBounds, RegionDiscoverer, Result,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

struct ScriptedProvider {
    instructions: HashMap<u64, Instruction>,
}

impl InstructionProvider for ScriptedProvider {
    fn decode(&self, address: u64) -> Option<Instruction> {
        self.instructions.get(&address).cloned()
    }
}

struct ZeroMemory;

impl MemoryReader for ZeroMemory {
    fn read_bytes(&self, _address: u64, len: usize) -> Result<Vec<u8>> {
        Ok(vec![0; len])
    }
}

fn bounds() -> ModuleBounds {
    ModuleBounds::new(0x1000, 0x100000, 0x400, false, vec![(0x1400, 0x100fff)])
}

/// A straight run of `count` 4-byte instructions ending in a return.
fn straight_line(count: u64) -> ScriptedProvider {
    let mut instructions = HashMap::new();

    for i in 0..count {
        let address = 0x1400 + i * 4;
        instructions.insert(
            address,
            Instruction::new(address, vec![0x90; 4], FlowKind::Sequential, None),
        );
    }

    let ret = 0x1400 + count * 4;
    instructions.insert(ret, Instruction::new(ret, vec![0xc3], FlowKind::Return, None));

    ScriptedProvider { instructions }
}

/// A binary tree of conditional branches `depth` levels deep, leaves returning.
fn branch_tree(depth: u64) -> ScriptedProvider {
    let mut instructions = HashMap::new();

    // Node k sits at 0x1400 + k*16; children of k are 2k+1 and 2k+2
    let nodes = (1u64 << depth) - 1;
    for k in 0..nodes {
        let address = 0x1400 + k * 16;
        let left = 0x1400 + (2 * k + 1) * 16;

        if 2 * k + 1 < nodes {
            instructions.insert(
                address,
                Instruction::new(address, vec![0x90; 16], FlowKind::ConditionalBranch, Some(left)),
            );
        } else {
            instructions.insert(
                address,
                Instruction::new(address, vec![0xc3; 16], FlowKind::Return, None),
            );
        }
    }

    ScriptedProvider { instructions }
}

fn bench_straight_line_walk(c: &mut Criterion) {
    let bounds = bounds();
    let memory = ZeroMemory;

    for count in [64u64, 1024] {
        let provider = straight_line(count);

        c.bench_function(&format!("discover_straight_{count}"), |b| {
            b.iter(|| {
                let ownership = AddressOwnership::new();
                let discoverer = RegionDiscoverer::new(
                    black_box(0x1400),
                    &provider,
                    &memory,
                    &bounds,
                    &ownership,
                );
                black_box(discoverer.discover())
            });
        });
    }
}

fn bench_branch_tree_walk(c: &mut Criterion) {
    let bounds = bounds();
    let memory = ZeroMemory;
    let provider = branch_tree(10);

    c.bench_function("discover_branch_tree_depth10", |b| {
        b.iter(|| {
            let ownership = AddressOwnership::new();
            let discoverer =
                RegionDiscoverer::new(black_box(0x1400), &provider, &memory, &bounds, &ownership);
            black_box(discoverer.discover())
        });
    });
}

fn bench_signature_matching(c: &mut Criterion) {
    let mut matcher = ByteSequenceMatcher::new();
    matcher.add(ByteSequence::parse("4? 8b ?? ?? 00 04 00 00", "slot-load").unwrap());
    matcher.add(ByteSequence::parse("83 f8 ??", "bound-check").unwrap());
    matcher.add(ByteSequence::parse("cc cc cc cc", "padding").unwrap());

    let buffer: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();

    c.bench_function("signature_scan_4k", |b| {
        b.iter(|| {
            let mut hits = 0;
            for offset in 0..buffer.len() {
                if matcher.find(black_box(&buffer), offset).is_some() {
                    hits += 1;
                }
            }
            black_box(hits)
        });
    });
}

fn bench_ownership_claims(c: &mut Criterion) {
    c.bench_function("ownership_claim_4k_spans", |b| {
        b.iter(|| {
            let ownership = AddressOwnership::new();
            for span in 0..4096u64 {
                ownership.claim(black_box(0x1400), 0x1400 + span * 4, 4);
            }
            black_box(ownership.claimed_bytes())
        });
    });
}

criterion_group!(
    benches,
    bench_straight_line_walk,
    bench_branch_tree_walk,
    bench_signature_matching,
    bench_ownership_claims
);
criterion_main!(benches);
