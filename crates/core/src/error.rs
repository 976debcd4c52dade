//! Error types for the workflow toolkit.

use crate::types::{ParameterType, SpaceId, StepId};
use crate::validation::ValidationIssue;
use std::path::PathBuf;

/// Result type for workflow toolkit operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Umbrella error for callers that do not care which stage failed.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Failure to read or decode a workflow document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported workflow file extension: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Failure to bind parameter values into a workflow.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("Required parameter '{name}' not provided and has no default")]
    MissingParameter { name: String },

    #[error("Parameter '{name}' is not declared by the workflow")]
    UnknownParameter { name: String },

    #[error("Parameter '{name}' must be of type {expected}, got '{value}'")]
    InvalidValue {
        name: String,
        expected: ParameterType,
        value: String,
    },
}

/// Failure to build a dependency graph from step definitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DagError {
    #[error("Duplicate step name: {step}")]
    DuplicateStep { step: StepId },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("Step '{step}' depends on itself")]
    SelfDependency { step: StepId },

    #[error("Workflow contains circular dependencies involving step '{step}'")]
    Cycle { step: StepId },

    #[error("Step {0} not found")]
    StepNotFound(StepId),
}

/// Failure to parse a condition expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("Condition is empty")]
    Empty,

    #[error("Condition '{expression}' is missing an operand")]
    MissingOperand { expression: String },

    #[error("Unsupported condition: {expression}")]
    Unsupported { expression: String },
}

/// Failure of a catalog operation.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Workflow '{name}' failed validation with {} error(s)", .issues.len())]
    Invalid {
        name: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Workflow '{name}' not found in space '{space}'")]
    NotFound { space: SpaceId, name: String },

    #[error("Version {version} of workflow '{name}' not found in space '{space}'")]
    VersionNotFound {
        space: SpaceId,
        name: String,
        version: u32,
    },

    #[error("Failed to compute content digest: {0}")]
    Digest(#[from] serde_json::Error),
}
