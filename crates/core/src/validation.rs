//! Semantic validation of workflow definitions.
//!
//! Parsing only guarantees a document has the right shape. The validator
//! checks everything a workflow designer needs before a definition is
//! accepted: names, dependencies, references, per-type step settings,
//! policies, conditions and triggers.

use crate::condition::Condition;
use crate::error::DagError;
use crate::policy::{EffectivePolicy, RetryPolicy};
use crate::template::{step_references, Reference};
use crate::types::{ExecutionMode, StepDefinition, StepId, StepType, Trigger, WorkflowDefinition};
use crate::workflow::WorkflowDag;
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

const HTTP_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// A single finding about a workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("Workflow name cannot be empty")]
    MissingName,

    #[error("Empty workflow: no steps defined")]
    EmptyWorkflow,

    #[error("Invalid step name '{step}': {reason}")]
    InvalidStepName { step: String, reason: String },

    #[error("Duplicate step name: {step}")]
    DuplicateStep { step: StepId },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("Step '{step}' depends on itself")]
    SelfDependency { step: StepId },

    #[error("Circular dependency detected involving step '{step}'")]
    CircularDependency { step: StepId },

    #[error("Step '{step}' references output of unknown step '{reference}'")]
    UnknownStepReference { step: StepId, reference: StepId },

    #[error("Step '{step}' references undeclared parameter '{parameter}'")]
    UndeclaredParameter { step: StepId, parameter: String },

    #[error("Step '{step}' of type '{step_type}' requires '{key}'")]
    MissingConfig {
        step: StepId,
        step_type: String,
        key: String,
    },

    #[error("Invalid configuration for step '{step}': {reason}")]
    InvalidConfig { step: StepId, reason: String },

    #[error("Invalid retry policy for {scope}: {reason}")]
    InvalidRetry { scope: String, reason: String },

    #[error("Timeout for {scope} must be greater than zero")]
    ZeroTimeout { scope: String },

    #[error("Invalid condition in step '{step}': {error}")]
    InvalidCondition { step: StepId, error: String },

    #[error("Invalid cron schedule '{cron}': {error}")]
    InvalidSchedule { cron: String, error: String },

    #[error("Default for parameter '{parameter}' is not a valid {expected}")]
    InvalidParameterDefault { parameter: String, expected: String },

    #[error("Step '{step}' uses custom type '{step_type}'")]
    CustomStepType { step: StepId, step_type: String },

    #[error("Parameter '{parameter}' is declared but never used")]
    UnusedParameter { parameter: String },

    #[error("Step '{step}' retries but has no timeout")]
    RetryWithoutTimeout { step: StepId },

    #[error("Workflow is in parallel mode but every step declares depends_on")]
    RedundantParallelMode,
}

/// Result of validating one workflow
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks workflow definitions for semantic problems
#[derive(Debug, Clone, Default)]
pub struct WorkflowValidator {
    strict_mode: bool,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    /// In strict mode warnings are reported as errors
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Validate a complete workflow
    pub fn validate(&self, workflow: &WorkflowDefinition) -> ValidationReport {
        let mut report = ValidationReport::new();

        if workflow.name.trim().is_empty() {
            report.errors.push(ValidationIssue::MissingName);
        }
        if workflow.steps.is_empty() {
            report.errors.push(ValidationIssue::EmptyWorkflow);
        }

        let structural_errors_before = report.errors.len();
        self.validate_step_names(workflow, &mut report);
        self.validate_dependencies(workflow, &mut report);
        self.validate_references(workflow, &mut report);
        let structure_ok = report.errors.len() == structural_errors_before;

        // Cycle detection needs every edge endpoint to exist
        if structure_ok && !workflow.steps.is_empty() {
            if let Err(DagError::Cycle { step }) = WorkflowDag::from_definition(workflow) {
                report
                    .errors
                    .push(ValidationIssue::CircularDependency { step });
            }
        }

        for step in &workflow.steps {
            self.validate_step_config(step, &mut report);
            self.validate_condition(step, &mut report);
        }

        self.validate_policies(workflow, &mut report);
        self.validate_triggers(workflow, &mut report);
        self.validate_parameters(workflow, &mut report);
        self.collect_warnings(workflow, &mut report);

        if self.strict_mode && !report.warnings.is_empty() {
            tracing::warn!(
                "Strict mode: treating {} warning(s) as errors for workflow {}",
                report.warnings.len(),
                workflow.name
            );
            let warnings = std::mem::take(&mut report.warnings);
            report.errors.extend(warnings);
        }

        report
    }

    fn validate_step_names(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let mut seen = HashSet::new();
        for step in &workflow.steps {
            if let Some(reason) = invalid_name_reason(step.name.as_str()) {
                report.errors.push(ValidationIssue::InvalidStepName {
                    step: step.name.0.clone(),
                    reason,
                });
            }
            if !seen.insert(step.name.clone()) {
                report.errors.push(ValidationIssue::DuplicateStep {
                    step: step.name.clone(),
                });
            }
        }
    }

    fn validate_dependencies(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let names: HashSet<&StepId> = workflow.steps.iter().map(|s| &s.name).collect();

        for step in &workflow.steps {
            for dep in step.depends_on.iter().flatten() {
                if dep == &step.name {
                    report.errors.push(ValidationIssue::SelfDependency {
                        step: step.name.clone(),
                    });
                } else if !names.contains(dep) {
                    report.errors.push(ValidationIssue::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
    }

    fn validate_references(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let names: HashSet<&StepId> = workflow.steps.iter().map(|s| &s.name).collect();

        for step in &workflow.steps {
            for reference in step_references(step) {
                match reference {
                    Reference::Param(name) => {
                        if !workflow.parameters.contains_key(&name) {
                            report.errors.push(ValidationIssue::UndeclaredParameter {
                                step: step.name.clone(),
                                parameter: name,
                            });
                        }
                    }
                    Reference::StepOutput { step: target, .. } => {
                        if target == step.name {
                            report.errors.push(ValidationIssue::SelfDependency {
                                step: step.name.clone(),
                            });
                        } else if !names.contains(&target) {
                            report.errors.push(ValidationIssue::UnknownStepReference {
                                step: step.name.clone(),
                                reference: target,
                            });
                        }
                    }
                    Reference::Other(_) => {}
                }
            }
        }
    }

    fn validate_step_config(&self, step: &StepDefinition, report: &mut ValidationReport) {
        let missing = |key: &str| ValidationIssue::MissingConfig {
            step: step.name.clone(),
            step_type: step.step_type.to_string(),
            key: key.to_string(),
        };
        let invalid = |reason: String| ValidationIssue::InvalidConfig {
            step: step.name.clone(),
            reason,
        };

        match &step.step_type {
            StepType::TasLlm => {
                if !has_text(step, "prompt") && step.action.is_none() {
                    report.errors.push(missing("prompt"));
                }
            }
            StepType::TasRag => {
                if !has_text(step, "query") {
                    report.errors.push(missing("query"));
                }
            }
            StepType::Http => {
                match step.config.get("url") {
                    Some(serde_json::Value::String(raw)) => {
                        if let Err(reason) = check_http_url(raw) {
                            report.errors.push(invalid(reason));
                        }
                    }
                    Some(_) => report.errors.push(invalid("url must be a string".to_string())),
                    None => report.errors.push(missing("url")),
                }
                if let Some(method) = step.config.get("method") {
                    let ok = method
                        .as_str()
                        .map(|m| HTTP_METHODS.contains(&m.to_ascii_uppercase().as_str()))
                        .unwrap_or(false);
                    if !ok {
                        report
                            .errors
                            .push(invalid(format!("unsupported HTTP method {}", method)));
                    }
                }
            }
            StepType::Mcp => {
                for key in ["server", "tool"] {
                    if !has_text(step, key) {
                        report.errors.push(missing(key));
                    }
                }
            }
            StepType::Script => {
                if !has_text(step, "command") && !has_text(step, "script") {
                    report.errors.push(missing("command"));
                }
            }
            StepType::Condition => match step.config_str("expression") {
                Some(expression) => {
                    if let Err(e) = Condition::parse(expression) {
                        report.errors.push(ValidationIssue::InvalidCondition {
                            step: step.name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
                None => report.errors.push(missing("expression")),
            },
            StepType::Wait => match step.config.get("duration") {
                Some(serde_json::Value::String(raw)) => {
                    if !raw.contains("{{") {
                        if let Err(e) = humantime::parse_duration(raw) {
                            report
                                .errors
                                .push(invalid(format!("invalid duration '{}': {}", raw, e)));
                        }
                    }
                }
                Some(serde_json::Value::Number(n)) if n.as_u64().is_some() => {}
                Some(other) => report
                    .errors
                    .push(invalid(format!("invalid duration {}", other))),
                None => report.errors.push(missing("duration")),
            },
            StepType::Transform | StepType::Custom(_) => {}
        }
    }

    fn validate_condition(&self, step: &StepDefinition, report: &mut ValidationReport) {
        if let Some(when) = &step.when {
            if let Err(e) = Condition::parse(when) {
                report.errors.push(ValidationIssue::InvalidCondition {
                    step: step.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn validate_policies(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        check_policy(
            "workflow defaults",
            workflow.defaults.timeout,
            workflow.defaults.retry.as_ref(),
            report,
        );
        for step in &workflow.steps {
            check_policy(
                &format!("step '{}'", step.name),
                step.timeout,
                step.retry.as_ref(),
                report,
            );
        }
    }

    fn validate_triggers(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        for trigger in &workflow.triggers {
            if let Trigger::Schedule { cron, .. } = trigger {
                if let Err(error) = parse_cron(cron) {
                    report.errors.push(ValidationIssue::InvalidSchedule {
                        cron: cron.clone(),
                        error,
                    });
                }
            }
        }
    }

    fn validate_parameters(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        for (name, param) in &workflow.parameters {
            if let Some(default) = &param.default {
                if !param.param_type.accepts(default) {
                    report.errors.push(ValidationIssue::InvalidParameterDefault {
                        parameter: name.clone(),
                        expected: param.param_type.to_string(),
                    });
                }
            }
        }
    }

    fn collect_warnings(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let mut used_params = HashSet::new();

        for step in &workflow.steps {
            if step.step_type.is_custom() {
                report.warnings.push(ValidationIssue::CustomStepType {
                    step: step.name.clone(),
                    step_type: step.step_type.to_string(),
                });
            }

            let policy = EffectivePolicy::resolve(step, &workflow.defaults);
            if policy.attempts() > 1 && policy.timeout.is_none() {
                report.warnings.push(ValidationIssue::RetryWithoutTimeout {
                    step: step.name.clone(),
                });
            }

            for reference in step_references(step) {
                if let Reference::Param(name) = reference {
                    used_params.insert(name);
                }
            }
        }

        for name in workflow.parameters.keys() {
            if !used_params.contains(name) {
                report.warnings.push(ValidationIssue::UnusedParameter {
                    parameter: name.clone(),
                });
            }
        }

        if workflow.mode == ExecutionMode::Parallel
            && workflow.steps.len() > 1
            && workflow
                .steps
                .iter()
                .skip(1)
                .all(|s| s.depends_on.as_ref().is_some_and(|d| !d.is_empty()))
        {
            report.warnings.push(ValidationIssue::RedundantParallelMode);
        }
    }
}

fn invalid_name_reason(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return Some("name cannot be empty".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Some(format!("character '{}' is not allowed", c));
    }
    None
}

fn has_text(step: &StepDefinition, key: &str) -> bool {
    step.config_str(key)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

fn check_http_url(raw: &str) -> Result<(), String> {
    // Templated URLs are only known at run time
    if raw.contains("{{") {
        return Ok(());
    }
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("url scheme '{}' is not http or https", other)),
    }
}

fn check_policy(
    scope: &str,
    timeout: Option<Duration>,
    retry: Option<&RetryPolicy>,
    report: &mut ValidationReport,
) {
    if timeout == Some(Duration::ZERO) {
        report.errors.push(ValidationIssue::ZeroTimeout {
            scope: scope.to_string(),
        });
    }
    if let Some(retry) = retry {
        for reason in retry.check() {
            report.errors.push(ValidationIssue::InvalidRetry {
                scope: scope.to_string(),
                reason,
            });
        }
    }
}

/// Parse a cron expression. Five-field expressions get a leading seconds field.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, String> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized).map_err(|e| e.to_string())
}
