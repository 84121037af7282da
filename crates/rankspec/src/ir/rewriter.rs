use thiserror::Error;

use crate::ir::{
    index::{DefId, FunctionIndexError, FunctionIndices, InstId},
    spec::{Function, Instruction, Operand, Operation, TensorLiteral, ValueId, ValueType},
    utils::replace_uses_in_instruction,
};

/// Errors raised while mutating a function through [`ProgramRewriter`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error(transparent)]
    Index(#[from] FunctionIndexError),
    #[error("instruction {inst:?} is not part of the function")]
    UnknownInstruction { inst: InstId },
    #[error("cannot erase %{value:?} while it still has uses")]
    LiveUses { value: ValueId },
    #[error("value %{value:?} has no tensor type")]
    MissingTensorType { value: ValueId },
    #[error("malformed rewrite plan: {reason}")]
    InvalidPlan { reason: &'static str },
}

/// Mutable IR editor with stable instruction identifiers and SSA accounting.
pub struct ProgramRewriter<'a> {
    pub func: &'a mut Function,
    indices: FunctionIndices,
}

impl<'a> ProgramRewriter<'a> {
    /// Creates a rewriter for the provided function, indexing its body.
    pub fn new(func: &'a mut Function) -> Result<Self, FunctionIndexError> {
        let indices = FunctionIndices::build(func)?;
        Ok(Self { func, indices })
    }

    /// Returns the operation referenced by `inst`.
    pub fn op(&self, inst: InstId) -> Option<&Operation> {
        let pos = self.indices.position(inst)?;
        Some(&self.func.body[pos].op)
    }

    /// Returns the operands for the given instruction.
    pub fn operands(&self, inst: InstId) -> &[Operand] {
        match self.indices.position(inst) {
            Some(pos) => &self.func.body[pos].operands,
            None => &[],
        }
    }

    /// Current position of `inst` within the function body.
    pub fn position(&self, inst: InstId) -> Option<usize> {
        self.indices.position(inst)
    }

    pub fn instruction(&self, inst: InstId) -> Option<&Instruction> {
        let pos = self.indices.position(inst)?;
        self.func.body.get(pos)
    }

    /// Returns the SSA value produced by the instruction.
    pub fn value_of(&self, inst: InstId) -> Option<ValueId> {
        self.indices.value_of(inst)
    }

    /// Returns the type recorded for a top-level value.
    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.indices.type_of(value)
    }

    /// Resolves an operand to its type; tuple elements and literals included.
    pub fn operand_type(&self, operand: &Operand) -> Option<ValueType> {
        match operand {
            Operand::Value(value) => self.type_of(*value).cloned(),
            Operand::TupleElement { tuple, index } => match self.type_of(*tuple)? {
                ValueType::Tuple(elements) => elements.get(*index).cloned(),
                ValueType::Tensor(_) => None,
            },
            Operand::Literal(literal) => Some(ValueType::Tensor(literal.spec.clone())),
        }
    }

    /// Returns the instruction defining the provided value.
    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.indices.inst_of(value)
    }

    pub fn def_of(&self, value: ValueId) -> Option<DefId> {
        self.indices.def_of(value)
    }

    /// Returns the recorded users for the value.
    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.indices.users_of(value)
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.indices.contains(inst)
    }

    /// Returns the current version counter for an instruction.
    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.indices.version(inst)
    }

    pub fn insts_in_order(&self) -> Vec<InstId> {
        self.indices.ordered_inst_ids()
    }

    /// Hands out a fresh value id, e.g. for instructions placed inside a new region.
    pub fn allocate_value(&mut self) -> ValueId {
        self.indices.allocate_value()
    }

    /// Ensures freshly allocated ids are at least `floor`.
    pub fn reserve_values_below(&mut self, floor: u32) {
        self.indices.reserve_values_below(floor);
    }

    pub fn next_value(&self) -> ValueId {
        self.indices.next_value()
    }

    /// Replaces all uses of `from` with `to`, including uses inside nested regions.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<(), RewriteError> {
        if from == to {
            return Ok(());
        }
        let consumers = self.indices.users_of(from).to_vec();
        for inst in consumers {
            let pos = self
                .indices
                .position(inst)
                .ok_or(RewriteError::UnknownInstruction { inst })?;
            replace_uses_in_instruction(&mut self.func.body[pos], from, to);
            self.indices.update_operand_use(inst, from, to)?;
            self.bump_version(inst);
        }
        self.indices.clear_users(from);
        Ok(())
    }

    /// Redirects function results that name `from` to `to`.
    pub fn replace_result_uses(&mut self, from: ValueId, to: ValueId) {
        for result_id in &mut self.func.result_ids {
            if *result_id == from {
                *result_id = to;
            }
        }
    }

    /// Replaces the value produced by `root` everywhere and erases `root`.
    pub fn replace_op(&mut self, root: InstId, replacement: ValueId) -> Result<(), RewriteError> {
        let value = self
            .value_of(root)
            .ok_or(RewriteError::UnknownInstruction { inst: root })?;
        self.replace_all_uses(value, replacement)?;
        self.replace_result_uses(value, replacement);
        self.erase_inst(root)
    }

    /// Erases the instruction identified by `inst`.
    pub fn erase_inst(&mut self, inst: InstId) -> Result<(), RewriteError> {
        let value = self
            .indices
            .value_of(inst)
            .ok_or(RewriteError::UnknownInstruction { inst })?;
        if !self.indices.users_of(value).is_empty() {
            return Err(RewriteError::LiveUses { value });
        }
        let pos = self
            .indices
            .position(inst)
            .ok_or(RewriteError::UnknownInstruction { inst })?;
        let instruction = self.func.body.remove(pos);
        self.indices.remove_instruction(inst, &instruction);
        Ok(())
    }

    /// Inserts a new instruction before `at`, returning its identifiers.
    pub fn insert_before(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<(InstId, ValueId), RewriteError> {
        let id = self.indices.allocate_value();
        let inst = self.insert_instruction_before(
            at,
            Instruction {
                id,
                op,
                operands,
                output,
            },
        )?;
        Ok((inst, id))
    }

    /// Inserts a fully formed instruction before `at`.
    ///
    /// Its id must come from [`Self::allocate_value`].
    pub fn insert_instruction_before(
        &mut self,
        at: InstId,
        instruction: Instruction,
    ) -> Result<InstId, RewriteError> {
        let pos = self
            .indices
            .position(at)
            .ok_or(RewriteError::UnknownInstruction { inst: at })?;
        let inst_id = self.indices.allocate_inst();
        self.indices.insert_instruction(inst_id, pos, &instruction)?;
        self.func.body.insert(pos, instruction);
        Ok(inst_id)
    }

    /// Materialises a constant literal by inserting a `Constant` operation before `at`.
    pub fn materialize_constant(
        &mut self,
        at: InstId,
        literal: TensorLiteral,
    ) -> Result<(InstId, ValueId), RewriteError> {
        let output = ValueType::Tensor(literal.spec.clone());
        self.insert_before(at, Operation::Constant(literal), Vec::new(), output)
    }

    /// Verifies basic SSA invariants after mutations.
    pub fn verify(&self) -> bool {
        FunctionIndices::build(self.func).is_ok()
    }

    /// Bumps the version counter for an instruction.
    pub fn bump_version(&mut self, inst: InstId) {
        self.indices.bump_version(inst);
    }
}
