pub mod dag;
pub mod plan;

pub use dag::{EdgeKind, WorkflowDag};
pub use plan::{ExecutionPlan, PlanStage, PlannedStatus, PlannedStep};
