//! Tree pass infrastructure.
//!
//! Every rewrite that runs on the structured tree implements [`TreePass`]. The pipeline runs
//! them in a fixed order; passes that can enable further rewrites of their own kind are run
//! until they report no change, and passes that enable each other are run together with
//! [`run_together_until_stable`].

use crate::{
    decompiler::tree::{NodeId, Tree},
    Result,
};

/// Upper bound on the rounds of [`run_until_stable`].
pub const MAX_PASS_ROUNDS: usize = 64;

/// A rewrite over the structured tree of one function.
///
/// Passes are `Send + Sync` so a single configured instance could be shared between the
/// worker threads that decompile different functions.
pub trait TreePass: Send + Sync {
    /// Unique name for logging and trace headers.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Runs the pass once over the tree rooted at `root`.
    ///
    /// Returns `true` if any changes were made, `false` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree violates an assumption of the pass.
    fn run(&mut self, tree: &mut Tree, root: NodeId) -> Result<bool>;
}

/// Runs `pass` until it reports no change or [`MAX_PASS_ROUNDS`] is reached.
///
/// Returns the number of rounds that changed the tree.
///
/// # Errors
///
/// Propagates the first error of the pass.
pub fn run_until_stable(pass: &mut dyn TreePass, tree: &mut Tree, root: NodeId) -> Result<usize> {
    let mut changed_rounds = 0;
    for _ in 0..MAX_PASS_ROUNDS {
        if !pass.run(tree, root)? {
            break;
        }
        changed_rounds += 1;
    }
    if changed_rounds > 0 {
        log::trace!("{} changed the tree in {} rounds", pass.name(), changed_rounds);
    }
    Ok(changed_rounds)
}

/// Runs each of `passes` until stable, in order, and repeats while any of them changed the
/// tree.
///
/// Used for passes that feed each other, such as cleaning that leaves a temporary with a
/// single read for the expression rebuilder. Returns the number of rounds that changed the
/// tree, at most [`MAX_PASS_ROUNDS`].
///
/// # Errors
///
/// Propagates the first error of any pass.
pub fn run_together_until_stable(
    passes: &mut [&mut dyn TreePass],
    tree: &mut Tree,
    root: NodeId,
) -> Result<usize> {
    let mut changed_rounds = 0;
    for _ in 0..MAX_PASS_ROUNDS {
        let mut changed = false;
        for pass in passes.iter_mut() {
            changed |= run_until_stable(&mut **pass, tree, root)? > 0;
        }
        if !changed {
            break;
        }
        changed_rounds += 1;
    }
    Ok(changed_rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::tree::NodeKind;

    struct Countdown(usize);

    impl TreePass for Countdown {
        fn name(&self) -> &'static str {
            "countdown"
        }

        fn run(&mut self, _tree: &mut Tree, _root: NodeId) -> Result<bool> {
            if self.0 == 0 {
                return Ok(false);
            }
            self.0 -= 1;
            Ok(true)
        }
    }

    #[test]
    fn stops_when_stable() {
        let mut tree = Tree::new();
        let root = tree.add(NodeKind::Sequence(Vec::new()));
        let mut pass = Countdown(3);
        assert_eq!(run_until_stable(&mut pass, &mut tree, root).unwrap(), 3);
        assert_eq!(pass.description(), "No description available");

        let mut endless = Countdown(usize::MAX);
        assert_eq!(
            run_until_stable(&mut endless, &mut tree, root).unwrap(),
            MAX_PASS_ROUNDS
        );
    }

    #[test]
    fn passes_run_together_until_none_changes() {
        let mut tree = Tree::new();
        let root = tree.add(NodeKind::Sequence(Vec::new()));
        let mut first = Countdown(2);
        let mut second = Countdown(1);
        let passes: &mut [&mut dyn TreePass] = &mut [&mut first, &mut second];
        let rounds = run_together_until_stable(passes, &mut tree, root).unwrap();
        assert_eq!(rounds, 1);
        assert_eq!((first.0, second.0), (0, 0));

        let mut idle = Countdown(0);
        let passes: &mut [&mut dyn TreePass] = &mut [&mut idle];
        assert_eq!(run_together_until_stable(passes, &mut tree, root).unwrap(), 0);
    }
}
