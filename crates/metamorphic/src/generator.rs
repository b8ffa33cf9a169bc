//! Sequence generation and dependency resolution
//!
//! Draws operation kinds from a weighted [`Deck`] and resolves each into a
//! fully bound [`OpRun`]. Resolution is recursive:
//!
//! 1. Operands are filled left to right. An opener's last operand is minted
//!    fresh; any other operand whose domain is empty first pulls in that
//!    domain's opener.
//! 2. Dependencies (closing iterators, committing batches) are resolved the
//!    same way, with their operands fixed, and appended first.
//! 3. The operation is constructed and appended.
//!
//! Generation completes before anything runs, so the operand generators
//! only ever see the effects of constructors.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::catalog::{op_generator, OpGenerator, OpReference, OP_GENERATORS};
use crate::deck::Deck;
use crate::error::{MetaError, MetaResult};
use crate::operands::Generators;
use crate::operations::MvccOp;

/// A bound operation ready to run
#[derive(Debug)]
pub struct OpRun {
    /// Operation kind
    pub generator: &'static OpGenerator,
    /// Operand tokens, as written to the trace
    pub args: Vec<String>,
    /// Runnable operation
    pub op: Box<dyn MvccOp>,
    /// Line of the trace this came from, when replaying
    pub line: Option<usize>,
    /// Output recorded in the trace, when replaying
    pub expected: Option<String>,
}

impl OpRun {
    /// Operation name
    pub fn name(&self) -> &'static str {
        self.generator.name
    }

    /// `name arg1 arg2 ...`
    pub fn command(&self) -> String {
        let mut out = self.generator.name.to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Resolve `reference` and append it, preceded by its prerequisites
pub fn resolve_and_add_op(
    gens: &mut Generators,
    rng: &mut StdRng,
    reference: OpReference,
    ops: &mut Vec<OpRun>,
) -> MetaResult<()> {
    let generator = reference.generator;
    let mut args = reference.args;

    if args.is_empty() && !generator.operands.is_empty() {
        let last = generator.operands.len() - 1;
        for (i, &operand) in generator.operands.iter().enumerate() {
            if generator.is_opener && i == last {
                args.push(gens.operand(operand).get_new(rng));
                continue;
            }
            if gens.operand(operand).count() == 0 {
                if let Some(name) = gens.operand(operand).opener() {
                    let opener = op_generator(name)
                        .ok_or_else(|| MetaError::Config(format!("opener {:?} is not in the catalog", name)))?;
                    resolve_and_add_op(gens, rng, OpReference::unresolved(opener), ops)?;
                }
            }
            args.push(gens.operand(operand).get(rng)?);
        }
    }

    for dep in generator.dependencies(gens, &args)? {
        resolve_and_add_op(gens, rng, dep, ops)?;
    }

    let op = generator.construct(gens, &args)?;
    ops.push(OpRun {
        generator,
        args,
        op,
        line: None,
        expected: None,
    });
    Ok(())
}

/// Seeded generator of operation sequences
#[derive(Debug)]
pub struct SequenceGenerator {
    rng: StdRng,
    deck: Deck,
}

impl SequenceGenerator {
    /// Generator drawing from the full catalog
    ///
    /// `restart` keeps its weight when restarts are disabled and then runs
    /// as a no-op.
    pub fn new(seed: u64) -> Self {
        let weights: Vec<u32> = OP_GENERATORS.iter().map(|g| g.weight).collect();
        SequenceGenerator {
            rng: StdRng::seed_from_u64(seed),
            deck: Deck::new(&weights),
        }
    }

    /// Draw `n` operations, each with its prerequisites
    pub fn generate(&mut self, gens: &mut Generators, n: usize) -> MetaResult<Vec<OpRun>> {
        let mut ops = Vec::with_capacity(n * 2);
        for _ in 0..n {
            let Some(card) = self.deck.draw(&mut self.rng) else {
                break;
            };
            let reference = OpReference::unresolved(OP_GENERATORS[card]);
            resolve_and_add_op(gens, &mut self.rng, reference, &mut ops)?;
        }
        tracing::debug!(drawn = n, total = ops.len(), "generated operation sequence");
        Ok(ops)
    }
}
