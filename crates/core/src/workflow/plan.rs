// Design-time execution plan: stages, effective policies and condition pruning

use super::dag::WorkflowDag;
use crate::condition::Condition;
use crate::error::DagError;
use crate::policy::EffectivePolicy;
use crate::template::TemplateProcessor;
use crate::types::{ExecutionMode, StepId, StepType, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Whether a planned step will run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlannedStatus {
    Scheduled,
    /// The `when` guard can only be decided at run time
    Conditional { condition: String },
    /// The `when` guard is already known to be false
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub name: StepId,
    pub step_type: StepType,
    pub depends_on: Vec<StepId>,
    #[serde(flatten)]
    pub status: PlannedStatus,
    pub policy: EffectivePolicy,
}

impl PlannedStep {
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, PlannedStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStage {
    pub index: usize,
    pub steps: Vec<PlannedStep>,
}

/// Ordered stages of a workflow with the policy each step runs under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub workflow: String,
    pub version: String,
    pub mode: ExecutionMode,
    pub stages: Vec<PlanStage>,
}

impl ExecutionPlan {
    /// Build a plan from a definition.
    ///
    /// `known` maps references (`params.region`) to values that are fixed
    /// before the run; `when` guards that only read known values are decided
    /// here. A skipped step does not skip its dependents.
    pub fn build(
        workflow: &WorkflowDefinition,
        known: &HashMap<String, String>,
    ) -> Result<Self, DagError> {
        let dag = WorkflowDag::from_definition(workflow)?;
        let mut stages = Vec::with_capacity(dag.stages().len());

        for (index, stage) in dag.stages().iter().enumerate() {
            let mut steps = Vec::with_capacity(stage.len());
            for step_id in stage {
                let step = dag
                    .step(step_id)
                    .ok_or_else(|| DagError::StepNotFound(step_id.clone()))?;

                let status = match &step.when {
                    None => PlannedStatus::Scheduled,
                    Some(expression) => match Condition::parse(expression) {
                        Ok(condition) => match condition.evaluate(known) {
                            Some(true) => PlannedStatus::Scheduled,
                            Some(false) => PlannedStatus::Skipped {
                                reason: format!("condition '{}' is false", expression.trim()),
                            },
                            None => PlannedStatus::Conditional {
                                condition: expression.trim().to_string(),
                            },
                        },
                        // Validation reports malformed guards; keep the step visible
                        Err(_) => PlannedStatus::Conditional {
                            condition: expression.trim().to_string(),
                        },
                    },
                };

                steps.push(PlannedStep {
                    name: step.name.clone(),
                    step_type: step.step_type.clone(),
                    depends_on: dag.dependencies(step_id)?,
                    status,
                    policy: EffectivePolicy::resolve(step, &workflow.defaults),
                });
            }
            stages.push(PlanStage { index, steps });
        }

        tracing::debug!(
            "Planned workflow {} into {} stage(s)",
            workflow.name,
            stages.len()
        );

        Ok(Self {
            workflow: workflow.name.clone(),
            version: workflow.version.clone(),
            mode: workflow.mode,
            stages,
        })
    }

    /// Bind `supplied` parameter values and plan with them as known values
    pub fn with_parameters(
        workflow: &WorkflowDefinition,
        supplied: &HashMap<String, String>,
    ) -> crate::Result<Self> {
        let values = TemplateProcessor::resolve_parameters(workflow, supplied)?;
        Ok(Self::build(
            workflow,
            &TemplateProcessor::known_values(&values),
        )?)
    }

    pub fn steps(&self) -> impl Iterator<Item = &PlannedStep> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }

    pub fn step(&self, name: &str) -> Option<&PlannedStep> {
        self.steps().find(|s| s.name.as_str() == name)
    }

    /// Upper bound on wall-clock time if every step exhausts its attempts.
    ///
    /// Stages run one after another and a stage lasts as long as its slowest
    /// step. `None` if any step that may run has no timeout.
    pub fn worst_case_duration(&self) -> Option<Duration> {
        let mut total = Duration::ZERO;
        for stage in &self.stages {
            let mut slowest = Duration::ZERO;
            for step in stage.steps.iter().filter(|s| !s.is_skipped()) {
                slowest = slowest.max(step.policy.worst_case_duration()?);
            }
            total = total.saturating_add(slowest);
        }
        Some(total)
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Workflow {} v{} ({} mode, {} stage(s))",
            self.workflow,
            self.version,
            self.mode,
            self.stages.len()
        )?;

        for stage in &self.stages {
            writeln!(f, "Stage {}:", stage.index + 1)?;
            for step in &stage.steps {
                write!(f, "  - {} [{}]", step.name, step.step_type)?;
                if !step.depends_on.is_empty() {
                    let deps: Vec<&str> = step.depends_on.iter().map(StepId::as_str).collect();
                    write!(f, " after {}", deps.join(", "))?;
                }
                match &step.policy.timeout {
                    Some(t) => write!(f, " timeout={}", humantime::format_duration(*t))?,
                    None => write!(f, " timeout=none")?,
                }
                write!(
                    f,
                    " attempts={} on_error={}",
                    step.policy.attempts(),
                    step.policy.on_error
                )?;
                match &step.status {
                    PlannedStatus::Scheduled => writeln!(f)?,
                    PlannedStatus::Conditional { condition } => writeln!(f, " when {}", condition)?,
                    PlannedStatus::Skipped { reason } => writeln!(f, " SKIPPED ({})", reason)?,
                }
            }
        }

        match self.worst_case_duration() {
            Some(d) => write!(
                f,
                "Worst case duration: {}",
                humantime::format_duration(d)
            ),
            None => write!(f, "Worst case duration: unbounded (some steps have no timeout)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::policy::{BackoffStrategy, RetryPolicy, StepPolicy};
    use crate::types::{ParameterDefinition, ParameterType, StepDefinition};

    fn workflow(mode: ExecutionMode, steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "ingest".to_string(),
            description: None,
            version: "2.1".to_string(),
            space: None,
            mode,
            parameters: Default::default(),
            defaults: StepPolicy {
                timeout: Some(Duration::from_secs(10)),
                retry: None,
                on_error: None,
            },
            triggers: vec![],
            steps,
        }
    }

    fn known(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sequential_plan_has_one_step_per_stage() {
        let wf = workflow(
            ExecutionMode::Sequential,
            vec![
                StepDefinition::new("a", StepType::Http),
                StepDefinition::new("b", StepType::Transform),
                StepDefinition::new("c", StepType::TasLlm),
            ],
        );
        let plan = ExecutionPlan::build(&wf, &HashMap::new()).unwrap();

        assert_eq!(plan.stages.len(), 3);
        assert!(plan.stages.iter().all(|s| s.steps.len() == 1));
        assert_eq!(plan.step("c").unwrap().depends_on, vec![StepId::new("b")]);
        assert_eq!(plan.worst_case_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_conditions_decided_from_known_values() {
        let mut notify = StepDefinition::new("notify", StepType::Http);
        notify.when = Some("{{ params.notify }} == true".to_string());
        let mut escalate = StepDefinition::new("escalate", StepType::Http);
        escalate.when = Some("{{ steps.classify.output }} == urgent".to_string());

        let wf = workflow(
            ExecutionMode::Parallel,
            vec![
                StepDefinition::new("classify", StepType::TasLlm),
                notify,
                escalate,
            ],
        );
        let plan = ExecutionPlan::build(&wf, &known(&[("params.notify", "false")])).unwrap();

        assert!(plan.step("notify").unwrap().is_skipped());
        assert!(matches!(
            plan.step("escalate").unwrap().status,
            PlannedStatus::Conditional { .. }
        ));
        assert_eq!(plan.step("classify").unwrap().status, PlannedStatus::Scheduled);
    }

    #[test]
    fn test_with_parameters_binds_known_values() {
        let mut notify = StepDefinition::new("notify", StepType::Http);
        notify.when = Some("{{ params.notify }}".to_string());
        let mut wf = workflow(ExecutionMode::Parallel, vec![notify]);
        wf.parameters.insert(
            "notify".to_string(),
            ParameterDefinition {
                param_type: ParameterType::Boolean,
                description: None,
                default: None,
                required: true,
            },
        );

        let supplied = known(&[("notify", "false")]);
        let plan = ExecutionPlan::with_parameters(&wf, &supplied).unwrap();
        assert!(plan.step("notify").unwrap().is_skipped());

        assert!(matches!(
            ExecutionPlan::with_parameters(&wf, &HashMap::new()),
            Err(crate::WorkflowError::Template(TemplateError::MissingParameter { .. }))
        ));
    }

    #[test]
    fn test_worst_case_uses_slowest_step_per_stage() {
        let mut slow = StepDefinition::new("slow", StepType::Script);
        slow.retry = Some(RetryPolicy {
            max_attempts: 2,
            backoff: BackoffStrategy::Fixed,
            initial_delay: Duration::from_secs(5),
            max_delay: None,
            multiplier: 2.0,
        });
        let wf = workflow(
            ExecutionMode::Parallel,
            vec![StepDefinition::new("fast", StepType::Script), slow],
        );
        let plan = ExecutionPlan::build(&wf, &HashMap::new()).unwrap();

        // one stage; slow = 2 x 10s + 5s backoff
        assert_eq!(plan.worst_case_duration(), Some(Duration::from_secs(25)));
    }

    #[test]
    fn test_unbounded_when_a_step_has_no_timeout() {
        let mut wf = workflow(
            ExecutionMode::Sequential,
            vec![StepDefinition::new("a", StepType::Wait)],
        );
        wf.defaults.timeout = None;
        let plan = ExecutionPlan::build(&wf, &HashMap::new()).unwrap();

        assert_eq!(plan.worst_case_duration(), None);
        assert!(plan.to_string().contains("unbounded"));
    }

    #[test]
    fn test_plan_serializes_status_inline() {
        let wf = workflow(
            ExecutionMode::Sequential,
            vec![StepDefinition::new("a", StepType::Http)],
        );
        let plan = ExecutionPlan::build(&wf, &HashMap::new()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();

        assert_eq!(json["stages"][0]["steps"][0]["status"], "scheduled");
        assert_eq!(json["stages"][0]["steps"][0]["policy"]["timeout"], "10s");
    }
}
