//! Block-level liveness of temporaries.
//!
//! A temporary is *live* at a point if some path from that point reads it before writing
//! it. This is the classic backward analysis:
//!
//! - `USE[B]` = temporaries read in B before any write in B
//! - `DEF[B]` = temporaries written in B
//! - `OUT[B]` = ∪{IN[S] | S is a successor of B}
//! - `IN[B]` = USE[B] ∪ (OUT[B] - DEF[B])
//!
//! Only temporaries are tracked; the expression rebuilder never moves anything else. Names
//! are stored lowercased, matching the case-insensitive identifiers of the language.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    decompiler::{
        lower::{FlowBlock, FlowBlocks},
        tree::{NodeId, Tree},
    },
    pex::is_temp,
};

/// Set of lowercased temporary names.
pub type TempSet = BTreeSet<String>;

/// Live-in and live-out sets of every block.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_in: BTreeMap<usize, TempSet>,
    live_out: BTreeMap<usize, TempSet>,
}

impl Liveness {
    /// Solves liveness for `blocks`.
    #[must_use]
    pub fn compute(tree: &Tree, blocks: &FlowBlocks) -> Self {
        let mut use_sets = BTreeMap::new();
        let mut def_sets = BTreeMap::new();
        for block in blocks.values() {
            let (uses, defs) = use_def(tree, block);
            use_sets.insert(block.start, uses);
            def_sets.insert(block.start, defs);
        }

        let mut liveness = Liveness::default();
        for &start in blocks.keys() {
            liveness.live_in.insert(start, TempSet::new());
            liveness.live_out.insert(start, TempSet::new());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for block in blocks.values().rev() {
                let mut out = TempSet::new();
                for successor in block.successors() {
                    if let Some(live) = liveness.live_in.get(&successor) {
                        out.extend(live.iter().cloned());
                    }
                }

                let mut live_in: TempSet = out
                    .iter()
                    .filter(|name| !def_sets[&block.start].contains(*name))
                    .cloned()
                    .collect();
                live_in.extend(use_sets[&block.start].iter().cloned());

                if liveness.live_in.get(&block.start) != Some(&live_in) {
                    liveness.live_in.insert(block.start, live_in);
                    changed = true;
                }
                if liveness.live_out.get(&block.start) != Some(&out) {
                    liveness.live_out.insert(block.start, out);
                    changed = true;
                }
            }
        }
        liveness
    }

    /// Temporaries live on entry to the block at `start`.
    #[must_use]
    pub fn live_in(&self, start: usize) -> Option<&TempSet> {
        self.live_in.get(&start)
    }

    /// Temporaries live on exit from the block at `start`.
    #[must_use]
    pub fn live_out(&self, start: usize) -> Option<&TempSet> {
        self.live_out.get(&start)
    }

    /// Whether `name` is live on exit from the block at `start`.
    #[must_use]
    pub fn is_live_out(&self, start: usize, name: &str) -> bool {
        self.live_out
            .get(&start)
            .is_some_and(|live| live.contains(&name.to_ascii_lowercase()))
    }
}

/// Statement and condition nodes of a block, in evaluation order.
fn evaluation_order(block: &FlowBlock) -> impl Iterator<Item = NodeId> + '_ {
    block.statements.iter().copied().chain(block.condition())
}

fn use_def(tree: &Tree, block: &FlowBlock) -> (TempSet, TempSet) {
    let mut uses = TempSet::new();
    let mut defs = TempSet::new();
    for node in evaluation_order(block) {
        let mut reads = Vec::new();
        tree.collect_reads(node, &mut reads);
        for name in reads.into_iter().filter(|name| is_temp(name)) {
            let name = name.to_ascii_lowercase();
            if !defs.contains(&name) {
                uses.insert(name);
            }
        }
        let mut writes = Vec::new();
        tree.collect_writes(node, &mut writes);
        defs.extend(
            writes
                .into_iter()
                .filter(|name| is_temp(name))
                .map(|name| name.to_ascii_lowercase()),
        );
    }
    (uses, defs)
}

/// Whether `name` may still be read after statement `index` of `block`.
///
/// `index == block.statements.len()` stands for the branch condition.
#[must_use]
pub fn live_after(tree: &Tree, block: &FlowBlock, index: usize, name: &str, live_out: bool) -> bool {
    let mut later = block.statements.iter().skip(index + 1).copied().collect::<Vec<_>>();
    if index < block.statements.len() {
        later.extend(block.condition());
    }
    for node in later {
        if tree.reads(node, name) > 0 {
            return true;
        }
        if tree.writes(node, name) {
            return false;
        }
    }
    live_out
}
