// Parameter binding and `{{ ... }}` reference handling for workflow definitions

use crate::condition::{Condition, Operand};
use crate::error::TemplateError;
use crate::types::{ParameterDefinition, ParameterType, StepDefinition, StepId, WorkflowDefinition};
use serde_json::Value;
use std::collections::HashMap;

/// A `{{ ... }}` reference found in step text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `{{ params.NAME }}`
    Param(String),
    /// `{{ steps.STEP.output }}` or `{{ steps.STEP.output.field }}`
    StepOutput { step: StepId, path: Vec<String> },
    /// Anything else (environment lookups, runtime helpers, ...)
    Other(String),
}

impl Reference {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(name) = raw.strip_prefix("params.") {
            return Self::Param(name.to_string());
        }

        if let Some(rest) = raw.strip_prefix("steps.") {
            let mut parts = rest.split('.');
            if let Some(step) = parts.next().filter(|s| !s.is_empty()) {
                return Self::StepOutput {
                    step: StepId::new(step),
                    path: parts.map(str::to_string).collect(),
                };
            }
        }

        Self::Other(raw.to_string())
    }
}

/// Extract the raw contents of every `{{ ... }}` placeholder in `text`
pub fn extract_references(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current = String::new();
    let mut in_ref = false;

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();
            in_ref = true;
            current.clear();
        } else if c == '}' && chars.peek() == Some(&'}') && in_ref {
            chars.next();
            if !current.trim().is_empty() {
                refs.push(current.trim().to_string());
            }
            in_ref = false;
            current.clear();
        } else if in_ref {
            current.push(c);
        }
    }

    refs.sort();
    refs.dedup();
    refs
}

/// All parsed references a step makes
pub fn step_references(step: &StepDefinition) -> Vec<Reference> {
    let mut refs: Vec<Reference> = Vec::new();
    for text in step.template_texts() {
        for raw in extract_references(text) {
            let reference = Reference::parse(&raw);
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
    }

    // Bare references in `when:` are legal too (`params.enabled`)
    if let Some(when) = &step.when {
        if let Ok(condition) = Condition::parse(when) {
            for raw in condition.references() {
                let reference = Reference::parse(raw);
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        }
    }

    refs
}

/// Steps whose output a step reads
pub fn step_output_dependencies(step: &StepDefinition) -> Vec<StepId> {
    step_references(step)
        .into_iter()
        .filter_map(|r| match r {
            Reference::StepOutput { step, .. } => Some(step),
            _ => None,
        })
        .collect()
}

/// Binds parameter values into a workflow definition
pub struct TemplateProcessor;

impl TemplateProcessor {
    /// Merge supplied values with declared defaults and type-check them.
    ///
    /// Optional parameters with neither a value nor a default resolve to `null`.
    pub fn resolve_parameters(
        workflow: &WorkflowDefinition,
        supplied: &HashMap<String, String>,
    ) -> Result<HashMap<String, Value>, TemplateError> {
        for name in supplied.keys() {
            if !workflow.parameters.contains_key(name) {
                return Err(TemplateError::UnknownParameter { name: name.clone() });
            }
        }

        let mut values = HashMap::new();
        for (name, param) in &workflow.parameters {
            let value = match supplied.get(name) {
                Some(raw) => Self::coerce(name, param.param_type, raw)?,
                None => match &param.default {
                    Some(default) => {
                        Self::check_default(name, param, default)?;
                        default.clone()
                    }
                    None if param.required => {
                        return Err(TemplateError::MissingParameter { name: name.clone() })
                    }
                    None => Value::Null,
                },
            };
            values.insert(name.clone(), value);
        }

        Ok(values)
    }

    /// Produce a copy of the workflow with every `{{ params.X }}` substituted.
    /// Step output references are left for the runtime.
    pub fn render(
        workflow: &WorkflowDefinition,
        supplied: &HashMap<String, String>,
    ) -> Result<WorkflowDefinition, TemplateError> {
        let values = Self::resolve_parameters(workflow, supplied)?;
        let mut rendered = workflow.clone();

        for step in &mut rendered.steps {
            if let Some(action) = &mut step.action {
                *action = Self::substitute(action, &values);
            }
            if let Some(when) = &mut step.when {
                // Bound values become literals so the guard still parses
                *when = Self::substitute_with(when, &values, |v| {
                    Operand::Literal(display_value(v)).to_string()
                });
            }
            for value in step.config.values_mut() {
                Self::render_value(value, &values);
            }
        }

        tracing::debug!(
            "Rendered workflow {} with {} parameter(s)",
            workflow.name,
            values.len()
        );

        Ok(rendered)
    }

    /// Values known before the run, keyed the way conditions reference them
    pub fn known_values(values: &HashMap<String, Value>) -> HashMap<String, String> {
        values
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (format!("params.{}", k), display_value(v)))
            .collect()
    }

    fn coerce(name: &str, expected: ParameterType, raw: &str) -> Result<Value, TemplateError> {
        let invalid = || TemplateError::InvalidValue {
            name: name.to_string(),
            expected,
            value: raw.to_string(),
        };

        match expected {
            ParameterType::String => Ok(Value::String(raw.to_string())),
            ParameterType::Number => {
                if let Ok(i) = raw.trim().parse::<i64>() {
                    return Ok(Value::from(i));
                }
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(invalid)
            }
            ParameterType::Boolean => raw
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| invalid()),
            ParameterType::Array | ParameterType::Object => {
                let value: Value = serde_json::from_str(raw).map_err(|_| invalid())?;
                if expected.accepts(&value) {
                    Ok(value)
                } else {
                    Err(invalid())
                }
            }
        }
    }

    fn check_default(
        name: &str,
        param: &ParameterDefinition,
        default: &Value,
    ) -> Result<(), TemplateError> {
        if param.param_type.accepts(default) {
            Ok(())
        } else {
            Err(TemplateError::InvalidValue {
                name: name.to_string(),
                expected: param.param_type,
                value: default.to_string(),
            })
        }
    }

    fn render_value(value: &mut Value, params: &HashMap<String, Value>) {
        match value {
            Value::String(s) => {
                // A string that is exactly one parameter placeholder takes the typed value
                let refs = extract_references(s);
                if refs.len() == 1 && is_single_placeholder(s) {
                    if let Reference::Param(name) = Reference::parse(&refs[0]) {
                        if let Some(bound) = params.get(&name) {
                            *value = bound.clone();
                            return;
                        }
                    }
                }
                *s = Self::substitute(s, params);
            }
            Value::Array(items) => {
                for item in items {
                    Self::render_value(item, params);
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    Self::render_value(item, params);
                }
            }
            _ => {}
        }
    }

    /// Replace parameter placeholders in a string, leaving other placeholders intact
    fn substitute(text: &str, params: &HashMap<String, Value>) -> String {
        Self::substitute_with(text, params, display_value)
    }

    fn substitute_with(
        text: &str,
        params: &HashMap<String, Value>,
        format: impl Fn(&Value) -> String,
    ) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            result.push_str(&rest[..start]);

            let placeholder = &rest[start..end];
            let inner = &placeholder[2..placeholder.len() - 2];
            match Reference::parse(inner) {
                Reference::Param(name) if params.contains_key(&name) => {
                    result.push_str(&format(&params[&name]));
                }
                _ => result.push_str(placeholder),
            }

            rest = &rest[end..];
        }

        result.push_str(rest);
        result
    }
}

fn is_single_placeholder(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParameterDefinition, StepType};
    use indexmap::IndexMap;

    fn param(param_type: ParameterType, default: Option<Value>, required: bool) -> ParameterDefinition {
        ParameterDefinition {
            param_type,
            description: None,
            default,
            required,
        }
    }

    fn workflow() -> WorkflowDefinition {
        let mut parameters = IndexMap::new();
        parameters.insert("document".to_string(), param(ParameterType::String, None, true));
        parameters.insert(
            "max_tokens".to_string(),
            param(ParameterType::Number, Some(serde_json::json!(512)), false),
        );
        parameters.insert("tags".to_string(), param(ParameterType::Array, None, false));

        let mut summarize = StepDefinition::new("summarize", StepType::TasLlm)
            .with_config("prompt", serde_json::json!("Summarize {{ params.document }}"))
            .with_config("max_tokens", serde_json::json!("{{ params.max_tokens }}"))
            .with_config("context", serde_json::json!("{{ steps.load.output }}"));
        summarize.action = Some("summarize {{params.document}}".to_string());
        summarize.when = Some("{{ params.max_tokens }} > 100".to_string());

        WorkflowDefinition {
            name: "summaries".to_string(),
            description: None,
            version: "1.0".to_string(),
            space: None,
            mode: Default::default(),
            parameters,
            defaults: Default::default(),
            triggers: vec![],
            steps: vec![StepDefinition::new("load", StepType::TasRag), summarize],
        }
    }

    fn supplied(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_references() {
        let text = "Analyze {{ params.file }} using {{steps.load.output.text}} and {{ params.file }}";
        assert_eq!(
            extract_references(text),
            vec!["params.file", "steps.load.output.text"]
        );
    }

    #[test]
    fn test_reference_parse() {
        assert_eq!(Reference::parse("params.x"), Reference::Param("x".to_string()));
        assert_eq!(
            Reference::parse("steps.load.output.text"),
            Reference::StepOutput {
                step: StepId::new("load"),
                path: vec!["output".to_string(), "text".to_string()],
            }
        );
        assert_eq!(Reference::parse("env.HOME"), Reference::Other("env.HOME".to_string()));
    }

    #[test]
    fn test_render_substitutes_params_and_keeps_step_refs() {
        let rendered = TemplateProcessor::render(&workflow(), &supplied(&[("document", "q3.pdf")]))
            .unwrap();
        let step = &rendered.steps[1];

        assert_eq!(step.config_str("prompt"), Some("Summarize q3.pdf"));
        assert_eq!(step.config.get("max_tokens"), Some(&serde_json::json!(512)));
        assert_eq!(step.config_str("context"), Some("{{ steps.load.output }}"));
        assert_eq!(step.action.as_deref(), Some("summarize q3.pdf"));
        assert_eq!(step.when.as_deref(), Some("512 > 100"));
    }

    #[test]
    fn test_rendered_guards_still_parse() {
        let mut wf = workflow();
        wf.steps[1].when = Some("{{ params.document }} == 'x < y'".to_string());
        wf.steps[0].when = Some("{{ params.tags }} == none".to_string());

        let rendered =
            TemplateProcessor::render(&wf, &supplied(&[("document", "x < y")])).unwrap();

        let guard = rendered.steps[1].when.as_deref().unwrap();
        assert_eq!(guard, "'x < y' == 'x < y'");
        assert_eq!(Condition::parse(guard).unwrap().evaluate(&HashMap::new()), Some(true));

        let guard = rendered.steps[0].when.as_deref().unwrap();
        assert_eq!(guard, "'' == none");
        assert_eq!(Condition::parse(guard).unwrap().evaluate(&HashMap::new()), Some(false));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = TemplateProcessor::render(&workflow(), &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingParameter {
                name: "document".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_and_mistyped_parameters() {
        let unknown = TemplateProcessor::resolve_parameters(
            &workflow(),
            &supplied(&[("document", "a"), ("colour", "red")]),
        );
        assert!(matches!(unknown, Err(TemplateError::UnknownParameter { .. })));

        let mistyped = TemplateProcessor::resolve_parameters(
            &workflow(),
            &supplied(&[("document", "a"), ("max_tokens", "lots")]),
        );
        assert!(matches!(mistyped, Err(TemplateError::InvalidValue { .. })));

        let not_array = TemplateProcessor::resolve_parameters(
            &workflow(),
            &supplied(&[("document", "a"), ("tags", "{\"a\": 1}")]),
        );
        assert!(matches!(not_array, Err(TemplateError::InvalidValue { .. })));
    }

    #[test]
    fn test_optional_without_default_is_null_and_not_known() {
        let values =
            TemplateProcessor::resolve_parameters(&workflow(), &supplied(&[("document", "a")]))
                .unwrap();
        assert_eq!(values["tags"], Value::Null);

        let known = TemplateProcessor::known_values(&values);
        assert_eq!(known.get("params.document").map(String::as_str), Some("a"));
        assert_eq!(known.get("params.max_tokens").map(String::as_str), Some("512"));
        assert!(!known.contains_key("params.tags"));
    }

    #[test]
    fn test_step_output_dependencies() {
        let wf = workflow();
        assert_eq!(step_output_dependencies(&wf.steps[1]), vec![StepId::new("load")]);
        assert!(step_output_dependencies(&wf.steps[0]).is_empty());
    }

    #[test]
    fn test_bare_when_reference_is_collected() {
        let mut step = StepDefinition::new("notify", StepType::Http);
        step.when = Some("params.enabled".to_string());
        assert_eq!(
            step_references(&step),
            vec![Reference::Param("enabled".to_string())]
        );
    }
}
