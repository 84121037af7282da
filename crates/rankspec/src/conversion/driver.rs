use std::mem;

use tracing::{debug, trace, warn};

use crate::conversion::{
    ConversionDiagnostic, ConversionError, ConversionStage, LegalityPolicy, LegalityReport,
};
use crate::env;
use crate::ir::{
    index::{FunctionIndexError, FunctionIndices},
    pattern::FrozenPatternSet,
    rewriter::ProgramRewriter,
    spec::{Function, Operation, ValueType},
    utils::{collect_value_types, max_value_id, region_captures},
};

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Upper bound on successful rewrites per function; further illegal ops are reported.
    pub max_rewrites: usize,
    /// Re-index the function after conversion and report SSA violations.
    pub verify_after: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_rewrites: usize::MAX,
            verify_after: env::verify_enabled(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStats {
    /// Instructions whose legality was checked.
    pub visited: usize,
    /// Instructions the policy rejected.
    pub illegal: usize,
    /// Successful pattern applications.
    pub applied: usize,
    /// Illegal instructions left in place.
    pub failed: usize,
    /// Nested regions converted.
    pub regions: usize,
}

/// Legalizes `func` in a single program-order sweep.
///
/// Every instruction the policy rejects is offered to the patterns in benefit order.
/// When none applies, the instruction is left unchanged and a diagnostic is recorded,
/// and conversion continues with the remaining instructions. Instructions nested in
/// `cond` regions are converted the same way, region by region. Any recorded
/// diagnostic turns the result into [`ConversionError::Illegal`].
#[tracing::instrument(skip_all, fields(function = %func.name))]
pub fn apply_partial_conversion(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    policy: &dyn LegalityPolicy,
    cfg: &ConversionConfig,
) -> Result<ConversionStats, ConversionError> {
    let mut report = LegalityReport::default();
    let mut stats = ConversionStats::default();
    let name = func.name.clone();

    convert_body(
        func,
        &name,
        patterns,
        policy,
        cfg,
        0,
        &mut report,
        &mut stats,
    )?;

    if cfg.verify_after {
        if let Err(err) = FunctionIndices::build(func) {
            report.push(ConversionDiagnostic::new(
                ConversionStage::Verify,
                Some(name.clone()),
                None,
                err.to_string(),
            ));
        }
    }

    if report.is_ok() {
        Ok(stats)
    } else {
        Err(ConversionError::Illegal {
            function: name,
            report,
        })
    }
}

/// Converts one body and returns the first value id that is still free afterwards.
#[allow(clippy::too_many_arguments)]
fn convert_body(
    func: &mut Function,
    diagnostic_name: &str,
    patterns: &FrozenPatternSet,
    policy: &dyn LegalityPolicy,
    cfg: &ConversionConfig,
    value_floor: u32,
    report: &mut LegalityReport,
    stats: &mut ConversionStats,
) -> Result<u32, ConversionError> {
    let mut rewriter = ProgramRewriter::new(func)?;
    rewriter.reserve_values_below(value_floor);

    for inst in rewriter.insts_in_order() {
        let Some(instruction) = rewriter.instruction(inst) else {
            continue;
        };
        let op = instruction.op.clone();
        let operand_types = instruction
            .operands
            .iter()
            .map(|operand| rewriter.operand_type(operand))
            .collect::<Vec<_>>();
        let position = rewriter.position(inst);
        stats.visited += 1;
        if policy.is_legal(&op, &operand_types) {
            continue;
        }
        stats.illegal += 1;

        if stats.applied >= cfg.max_rewrites {
            stats.failed += 1;
            report.push(ConversionDiagnostic::new(
                ConversionStage::Rewrite,
                Some(diagnostic_name.to_string()),
                position,
                format!("rewrite budget exhausted before {}", op.mnemonic()),
            ));
            continue;
        }

        let mut outcome: Option<Result<&'static str, String>> = None;
        for (_, pattern) in patterns.matching(&op) {
            match pattern.match_and_rewrite(inst, &mut rewriter) {
                Ok(true) => {
                    outcome = Some(Ok(pattern.name()));
                    break;
                }
                Ok(false) => {
                    trace!(
                        pattern = pattern.name(),
                        op = op.mnemonic(),
                        "pattern declined"
                    );
                }
                Err(err) => {
                    outcome = Some(Err(format!("pattern {} failed: {err}", pattern.name())));
                    break;
                }
            }
        }

        match outcome {
            Some(Ok(pattern)) => {
                stats.applied += 1;
                debug!(pattern, op = op.mnemonic(), ?position, "legalized operation");
            }
            Some(Err(message)) => {
                stats.failed += 1;
                warn!(op = op.mnemonic(), ?position, %message, "rewrite failed");
                report.push(ConversionDiagnostic::new(
                    ConversionStage::Rewrite,
                    Some(diagnostic_name.to_string()),
                    position,
                    message,
                ));
            }
            None => {
                stats.failed += 1;
                let message = format!(
                    "failed to legalize operation {} with operand types [{}]",
                    op.mnemonic(),
                    describe_types(&operand_types)
                );
                warn!(op = op.mnemonic(), ?position, "no pattern legalizes operation");
                report.push(ConversionDiagnostic::new(
                    ConversionStage::Legalize,
                    Some(diagnostic_name.to_string()),
                    position,
                    message,
                ));
            }
        }
    }

    let mut floor = rewriter.next_value().0;
    drop(rewriter);

    for index in 0..func.body.len() {
        if !matches!(func.body[index].op, Operation::Cond(_)) {
            continue;
        }
        let region_count = func.body[index].op.regions().len();
        for region_index in 0..region_count {
            floor = convert_region(
                func,
                index,
                region_index,
                diagnostic_name,
                patterns,
                policy,
                cfg,
                floor,
                report,
                stats,
            )?;
        }
    }

    Ok(floor)
}

/// Converts one region of the instruction at `index` by lifting it into a function
/// whose parameters are the values the region captures.
#[allow(clippy::too_many_arguments)]
fn convert_region(
    func: &mut Function,
    index: usize,
    region_index: usize,
    diagnostic_name: &str,
    patterns: &FrozenPatternSet,
    policy: &dyn LegalityPolicy,
    cfg: &ConversionConfig,
    floor: u32,
    report: &mut LegalityReport,
    stats: &mut ConversionStats,
) -> Result<u32, ConversionError> {
    let types = collect_value_types(func);
    let floor = floor.max(max_value_id(func).map_or(0, |max| max.0 + 1));
    let owner = func.body[index].id;

    let mut regions = func.body[index].op.regions_mut();
    let Some(region) = regions.get_mut(region_index) else {
        return Ok(floor);
    };

    let captures = region_captures(region);
    let mut parameters: Vec<ValueType> = Vec::with_capacity(captures.len());
    for value in &captures {
        let ty = types
            .get(value)
            .cloned()
            .ok_or(FunctionIndexError::MissingValueDefinition { value: *value })?;
        parameters.push(ty);
    }

    let mut lifted = Function {
        name: format!("{diagnostic_name}/cond%{}.{region_index}", owner.0),
        parameters,
        parameter_ids: captures,
        results: region.results.clone(),
        body: mem::take(&mut region.body),
        result_ids: region.result_ids.clone(),
    };
    let lifted_name = lifted.name.clone();
    let outcome = convert_body(
        &mut lifted,
        &lifted_name,
        patterns,
        policy,
        cfg,
        floor,
        report,
        stats,
    );
    region.body = lifted.body;
    region.result_ids = lifted.result_ids;
    stats.regions += 1;
    outcome
}

fn describe_types(types: &[Option<ValueType>]) -> String {
    types
        .iter()
        .map(|ty| match ty {
            Some(ty) => ty.to_string(),
            None => "<unknown>".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
