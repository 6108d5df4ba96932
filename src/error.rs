//! Errors surfaced by the compile queue
//!
//! Every unit-task failure is wrapped with the unit, phase and round it
//! happened in before it aborts the compilation.

use crate::config::ConfigError;
use crate::inlining::InliningError;
use crate::ir::GraphError;
use crate::queue::{BackendError, ParseError};
use crate::scheduler::Phase;

#[derive(Debug)]
pub enum SchedulerError {
    /// Configuration rejected before scheduling
    Config(ConfigError),
    /// The parser failed for a reachable unit
    Parse(ParseError),
    /// The backend failed for a scheduled unit
    Backend(BackendError),
    /// Inlining left a graph in an unusable state
    Inlining { unit: String, source: InliningError },
    /// A graph failed a structural check
    Graph { unit: String, source: GraphError },
    /// A unit that should hold a graph has none
    MissingGraph { unit: String },
    /// A side-table slot was written twice in one round
    DuplicatePublication { unit: String },
    /// Failure inside a unit task of a scheduler round
    InRound {
        phase: Phase,
        round: u32,
        unit: String,
        source: Box<SchedulerError>,
    },
    /// A phase did not converge within its round limit
    RoundLimit { phase: Phase, rounds: u32 },
    /// The worker pool could not be created
    ThreadPool(String),
}

impl SchedulerError {
    /// Attach round context to a unit-task failure.
    pub fn in_round(self, phase: Phase, round: u32, unit: impl Into<String>) -> Self {
        SchedulerError::InRound {
            phase,
            round,
            unit: unit.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, past any round context.
    pub fn root_cause(&self) -> &SchedulerError {
        match self {
            SchedulerError::InRound { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Parse(e) => write!(f, "{}", e),
            Self::Backend(e) => write!(f, "{}", e),
            Self::Inlining { unit, source } => write!(f, "Inlining into {} failed: {}", unit, source),
            Self::Graph { unit, source } => write!(f, "Malformed graph in {}: {}", unit, source),
            Self::MissingGraph { unit } => write!(f, "Unit {} has no graph", unit),
            Self::DuplicatePublication { unit } => {
                write!(f, "Unit {} published twice in one round", unit)
            }
            Self::InRound {
                phase,
                round,
                unit,
                source,
            } => write!(f, "{} phase, round {}, unit {}: {}", phase, round, unit, source),
            Self::RoundLimit { phase, rounds } => {
                write!(f, "{} phase did not converge within {} rounds", phase, rounds)
            }
            Self::ThreadPool(msg) => write!(f, "Cannot start worker pool: {}", msg),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Inlining { source, .. } => Some(source),
            Self::Graph { source, .. } => Some(source),
            Self::InRound { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ConfigError> for SchedulerError {
    fn from(e: ConfigError) -> Self {
        SchedulerError::Config(e)
    }
}

impl From<ParseError> for SchedulerError {
    fn from(e: ParseError) -> Self {
        SchedulerError::Parse(e)
    }
}

impl From<BackendError> for SchedulerError {
    fn from(e: BackendError) -> Self {
        SchedulerError::Backend(e)
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
