//! Interfaces of the external collaborators
//!
//! The queue never builds graphs or machine code itself. It asks a
//! [`Parser`] for each reachable unit's body, a [`MethodResolver`] for the
//! targets of call sites, and a [`Backend`] for the compiled artifact of
//! each final body.

use crate::inlining::GraphCostModel;
use crate::ir::Graph;
use crate::universe::{MethodUnit, UnitId, Universe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub unit: String,
    pub message: String,
}

impl ParseError {
    pub fn new(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cannot parse {}: {}", self.unit, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub unit: String,
    pub message: String,
}

impl BackendError {
    pub fn new(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Backend failed for {}: {}", self.unit, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Supplies the IR graph of a reachable unit.
pub trait Parser: Send + Sync {
    fn parse(&self, universe: &Universe, unit: &MethodUnit) -> Result<Graph, ParseError>;
}

/// Answers which implementations a call may reach.
pub trait MethodResolver: Send + Sync {
    /// Implementations a virtual call to `method` may dispatch to.
    fn implementations(&self, method: UnitId) -> Vec<UnitId>;

    fn is_reachable(&self, method: UnitId) -> bool;
}

pub trait CompiledArtifact {
    fn code_size(&self) -> usize;
}

/// Turns a final graph into a compiled artifact.
pub trait Backend: Send + Sync {
    type Artifact: CompiledArtifact + Send + Sync;

    fn compile(&self, unit: &MethodUnit, graph: &Graph) -> Result<Self::Artifact, BackendError>;
}

/// Artifact of [`SizeEstimateBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatedCode {
    pub unit: String,
    pub code_size: usize,
    pub nodes: usize,
}

impl CompiledArtifact for EstimatedCode {
    fn code_size(&self) -> usize {
        self.code_size
    }
}

/// Backend that only estimates code size from the graph cost.
#[derive(Debug, Clone, Copy)]
pub struct SizeEstimateBackend {
    pub bytes_per_cost_unit: usize,
}

impl Default for SizeEstimateBackend {
    fn default() -> Self {
        Self {
            bytes_per_cost_unit: 4,
        }
    }
}

impl Backend for SizeEstimateBackend {
    type Artifact = EstimatedCode;

    fn compile(&self, unit: &MethodUnit, graph: &Graph) -> Result<EstimatedCode, BackendError> {
        graph
            .verify()
            .map_err(|e| BackendError::new(unit.qualified_name(), e.to_string()))?;
        let cost = GraphCostModel.size(graph) as usize;
        Ok(EstimatedCode {
            unit: unit.qualified_name(),
            code_size: cost * self.bytes_per_cost_unit,
            nodes: graph.live_count(),
        })
    }
}
