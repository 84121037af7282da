//! Legality-driven partial conversion of functions.

mod driver;
mod legality;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{index::FunctionIndexError, rewriter::RewriteError};

pub use driver::{apply_partial_conversion, ConversionConfig, ConversionStats};
pub use legality::{
    check_function_legality, check_program_legality, LegalityPolicy, LegalityReport,
    OperationKind, RankedOperandsPolicy,
};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to legalize function `{function}`: {report}")]
    Illegal {
        function: String,
        report: LegalityReport,
    },
    #[error(transparent)]
    Index(#[from] FunctionIndexError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

impl ConversionError {
    /// Diagnostics carried by a legality failure; empty for other errors.
    pub fn diagnostics(&self) -> &[ConversionDiagnostic] {
        match self {
            ConversionError::Illegal { report, .. } => &report.diagnostics,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionStage {
    Legalize,
    Rewrite,
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionDiagnostic {
    pub stage: ConversionStage,
    pub function: Option<String>,
    pub instruction_index: Option<usize>,
    pub message: String,
}

impl ConversionDiagnostic {
    pub fn new(
        stage: ConversionStage,
        function: Option<String>,
        instruction_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            function,
            instruction_index,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConversionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.stage)?;
        if let Some(function) = &self.function {
            write!(f, " @{function}")?;
        }
        if let Some(index) = self.instruction_index {
            write!(f, " #{index}")?;
        }
        write!(f, ": {}", self.message)
    }
}
