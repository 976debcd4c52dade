// Per-step timeout, retry and error-handling policies

use crate::types::StepDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on `max_attempts` accepted by validation
pub const MAX_RETRY_ATTEMPTS: u32 = 100;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    2.0
}

/// Retry policy for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,
    /// Growth factor for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: None,
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let retry = attempt - 1;

        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(retry),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
                let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
            }
        };

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delays before each retry, in order
    pub fn delays(&self) -> Vec<Duration> {
        (2..=self.max_attempts)
            .map(|attempt| self.delay_before_attempt(attempt))
            .collect()
    }

    /// Time spent waiting between attempts if every attempt fails
    pub fn total_backoff(&self) -> Duration {
        self.delays()
            .into_iter()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }

    /// Problems with the policy's numbers, if any
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_attempts == 0 {
            problems.push("max_attempts must be greater than 0".to_string());
        }
        if self.max_attempts > MAX_RETRY_ATTEMPTS {
            problems.push(format!(
                "max_attempts must not exceed {}",
                MAX_RETRY_ATTEMPTS
            ));
        }
        let flat = self.multiplier.is_nan() || self.multiplier <= 1.0;
        if self.backoff == BackoffStrategy::Exponential && flat {
            problems.push("multiplier must be greater than 1.0 for exponential backoff".to_string());
        }
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.initial_delay {
                problems.push("max_delay must not be shorter than initial_delay".to_string());
            }
        }
        problems
    }
}

/// What happens to the workflow when a step has exhausted its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    FailWorkflow,
    Continue,
    SkipDependents,
}

impl std::fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailWorkflow => write!(f, "fail_workflow"),
            Self::Continue => write!(f, "continue"),
            Self::SkipDependents => write!(f, "skip_dependents"),
        }
    }
}

/// Workflow-level policy defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPolicy {
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

impl StepPolicy {
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.retry.is_none() && self.on_error.is_none()
    }
}

/// Policy that actually applies to a step after defaults are merged in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    pub on_error: ErrorPolicy,
}

impl EffectivePolicy {
    /// Merge step overrides over workflow defaults
    pub fn resolve(step: &StepDefinition, defaults: &StepPolicy) -> Self {
        Self {
            timeout: step.timeout.or(defaults.timeout),
            retry: step.retry.clone().or_else(|| defaults.retry.clone()),
            on_error: step.on_error.or(defaults.on_error).unwrap_or_default(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retry.as_ref().map(|r| r.max_attempts.max(1)).unwrap_or(1)
    }

    /// Longest the step can take when every attempt times out.
    /// `None` when the step has no timeout.
    pub fn worst_case_duration(&self) -> Option<Duration> {
        let timeout = self.timeout?;
        let backoff = self
            .retry
            .as_ref()
            .map(RetryPolicy::total_backoff)
            .unwrap_or(Duration::ZERO);
        Some(timeout.saturating_mul(self.attempts()).saturating_add(backoff))
    }
}
