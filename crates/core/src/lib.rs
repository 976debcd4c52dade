// Core types and functionality for the TAS Workflow Builder

pub mod types;
pub mod error;
pub mod policy;
pub mod condition;
pub mod template;
pub mod workflow;
pub mod validation;
pub mod catalog;
pub mod parser;

pub use error::{Result, WorkflowError};
pub use types::*;
