//! Instruction emitters used by rewrite patterns.
//!
//! Patterns build replacement IR through the [`Emitter`] trait so the same code can
//! write either directly before the matched root ([`InsertionPoint`]) or into a region
//! of a `cond` under construction ([`RegionBuilder`]). Every emitter draws value ids
//! from the function-wide allocator of the owning [`ProgramRewriter`].

use crate::ir::{
    index::InstId,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{CondSpec, Instruction, Operand, Operation, Region, ValueId, ValueType},
};

pub trait Emitter {
    /// Reserves a fresh SSA value id.
    fn allocate_value(&mut self) -> ValueId;

    /// Appends an instruction whose id came from [`Emitter::allocate_value`].
    fn push(&mut self, instruction: Instruction) -> Result<(), RewriteError>;

    fn emit(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<ValueId, RewriteError> {
        let id = self.allocate_value();
        self.push(Instruction {
            id,
            op,
            operands,
            output,
        })?;
        Ok(id)
    }
}

/// Emits instructions into the function body immediately before `at`.
pub struct InsertionPoint<'r, 'a> {
    rewriter: &'r mut ProgramRewriter<'a>,
    at: InstId,
}

impl<'r, 'a> InsertionPoint<'r, 'a> {
    pub fn new(rewriter: &'r mut ProgramRewriter<'a>, at: InstId) -> Self {
        Self { rewriter, at }
    }
}

impl Emitter for InsertionPoint<'_, '_> {
    fn allocate_value(&mut self) -> ValueId {
        self.rewriter.allocate_value()
    }

    fn push(&mut self, instruction: Instruction) -> Result<(), RewriteError> {
        self.rewriter
            .insert_instruction_before(self.at, instruction)
            .map(|_| ())
    }
}

/// Collects the body of a region while borrowing ids from its parent emitter.
pub struct RegionBuilder<'p, E: Emitter + ?Sized> {
    parent: &'p mut E,
    body: Vec<Instruction>,
}

impl<'p, E: Emitter + ?Sized> RegionBuilder<'p, E> {
    pub fn new(parent: &'p mut E) -> Self {
        Self {
            parent,
            body: Vec::new(),
        }
    }

    /// Seals the region yielding `result` of type `ty`.
    pub fn finish(self, result: ValueId, ty: ValueType) -> Region {
        Region {
            body: self.body,
            result_ids: vec![result],
            results: vec![ty],
        }
    }
}

impl<E: Emitter + ?Sized> Emitter for RegionBuilder<'_, E> {
    fn allocate_value(&mut self) -> ValueId {
        self.parent.allocate_value()
    }

    fn push(&mut self, instruction: Instruction) -> Result<(), RewriteError> {
        self.body.push(instruction);
        Ok(())
    }
}

/// Emits `cond(predicate)` whose regions are produced by the two callbacks.
///
/// Each callback receives an emitter for its region and returns the value the region
/// yields; both must produce a value of type `output`.
pub fn emit_cond<Then, Else>(
    emitter: &mut dyn Emitter,
    predicate: ValueId,
    output: ValueType,
    then_branch: Then,
    else_branch: Else,
) -> Result<ValueId, RewriteError>
where
    Then: FnOnce(&mut dyn Emitter) -> Result<ValueId, RewriteError>,
    Else: FnOnce(&mut dyn Emitter) -> Result<ValueId, RewriteError>,
{
    let then_region = {
        let mut region = RegionBuilder::new(&mut *emitter);
        let result = then_branch(&mut region)?;
        region.finish(result, output.clone())
    };
    let else_region = {
        let mut region = RegionBuilder::new(&mut *emitter);
        let result = else_branch(&mut region)?;
        region.finish(result, output.clone())
    };
    emitter.emit(
        Operation::Cond(CondSpec {
            then_region,
            else_region,
        }),
        vec![Operand::Value(predicate)],
        output,
    )
}
