// Condition expressions used by `when:` guards and `condition` steps

use crate::error::ConditionError;
use std::collections::HashMap;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Operator {
    // Two-character operators must be tried before their one-character prefixes
    const ALL: [(&'static str, Operator); 6] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A variable such as `params.region` or `steps.fetch.output.status`
    Reference(String),
    Literal(String),
}

impl Operand {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(inner) = raw.strip_prefix("{{").and_then(|r| r.strip_suffix("}}")) {
            return Self::Reference(inner.trim().to_string());
        }

        for quote in ['"', '\''] {
            if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
                return Self::Literal(raw[1..raw.len() - 1].to_string());
            }
        }

        if raw.starts_with("params.") || raw.starts_with("steps.") {
            Self::Reference(raw.to_string())
        } else {
            Self::Literal(raw.to_string())
        }
    }

    fn resolve<'a>(&'a self, context: &'a HashMap<String, String>) -> Option<&'a str> {
        match self {
            Self::Reference(name) => context.get(name).map(String::as_str),
            Self::Literal(value) => Some(value.as_str()),
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference(name) => write!(f, "{{{{ {} }}}}", name),
            Self::Literal(value) if needs_quotes(value) => {
                let quote = if value.contains('\'') { '"' } else { '\'' };
                write!(f, "{}{}{}", quote, value, quote)
            }
            Self::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// A parsed condition: a bare operand (truthiness check) or a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub left: Operand,
    pub comparison: Option<(Operator, Operand)>,
}

impl Condition {
    /// Parse an expression such as `{{ params.mode }} == full` or `count > 3`
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Empty);
        }

        if let Some((idx, symbol, operator)) = find_operator(trimmed) {
            let left = trimmed[..idx].trim();
            let right = trimmed[idx + symbol.len()..].trim();
            if left.is_empty() || right.is_empty() {
                return Err(ConditionError::MissingOperand {
                    expression: trimmed.to_string(),
                });
            }
            return Ok(Self {
                left: Operand::parse(left),
                comparison: Some((operator, Operand::parse(right))),
            });
        }

        let operand = Operand::parse(trimmed);
        if let Operand::Literal(value) = &operand {
            if value.contains(char::is_whitespace) && !is_quoted(trimmed) {
                return Err(ConditionError::Unsupported {
                    expression: trimmed.to_string(),
                });
            }
        }

        Ok(Self {
            left: operand,
            comparison: None,
        })
    }

    /// Evaluate against known variable values.
    ///
    /// Returns `None` when a referenced variable is not in `context`, i.e. the
    /// outcome is only known at run time.
    pub fn evaluate(&self, context: &HashMap<String, String>) -> Option<bool> {
        let left = self.left.resolve(context)?;

        let Some((operator, right)) = &self.comparison else {
            return Some(is_truthy(left));
        };
        let right = right.resolve(context)?;

        let result = match (left.parse::<f64>(), right.parse::<f64>()) {
            (Ok(l), Ok(r)) => match operator {
                Operator::Eq => l == r,
                Operator::Ne => l != r,
                Operator::Ge => l >= r,
                Operator::Le => l <= r,
                Operator::Gt => l > r,
                Operator::Lt => l < r,
            },
            _ => match operator {
                Operator::Eq => left == right,
                Operator::Ne => left != right,
                Operator::Ge => left >= right,
                Operator::Le => left <= right,
                Operator::Gt => left > right,
                Operator::Lt => left < right,
            },
        };

        Some(result)
    }

    /// Variable names the condition reads
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        if let Operand::Reference(name) = &self.left {
            refs.push(name.as_str());
        }
        if let Some((_, Operand::Reference(name))) = &self.comparison {
            refs.push(name.as_str());
        }
        refs
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.comparison {
            Some((operator, right)) => write!(f, "{} {} {}", self.left, operator.symbol(), right),
            None => write!(f, "{}", self.left),
        }
    }
}

/// Leftmost operator outside quoted literals
fn find_operator(expression: &str) -> Option<(usize, &'static str, Operator)> {
    let mut quote = None;
    for (idx, c) in expression.char_indices() {
        match quote {
            Some(open) => {
                if c == open {
                    quote = None;
                }
                continue;
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                continue;
            }
            None => {}
        }

        let rest = &expression[idx..];
        if let Some((symbol, operator)) = Operator::ALL
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
        {
            return Some((idx, symbol, *operator));
        }
    }
    None
}

fn is_quoted(raw: &str) -> bool {
    raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value.starts_with("params.")
        || value.starts_with("steps.")
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | '!' | '<' | '>' | '"' | '\'' | '{'))
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no" | "null"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_comparison_with_template_reference() {
        let condition = Condition::parse("{{ params.mode }} == 'full run'").unwrap();
        assert_eq!(condition.left, Operand::Reference("params.mode".to_string()));
        assert_eq!(
            condition.comparison,
            Some((Operator::Eq, Operand::Literal("full run".to_string())))
        );
        assert_eq!(condition.references(), vec!["params.mode"]);
    }

    #[test]
    fn test_evaluate_equality() {
        let ctx = context(&[("params.status", "complete")]);
        let eq = Condition::parse("params.status == complete").unwrap();
        let ne = Condition::parse("params.status != pending").unwrap();
        assert_eq!(eq.evaluate(&ctx), Some(true));
        assert_eq!(ne.evaluate(&ctx), Some(true));
    }

    #[test]
    fn test_evaluate_numeric() {
        let ctx = context(&[("params.count", "5")]);
        assert_eq!(Condition::parse("params.count > 3").unwrap().evaluate(&ctx), Some(true));
        assert_eq!(Condition::parse("params.count >= 5").unwrap().evaluate(&ctx), Some(true));
        assert_eq!(Condition::parse("params.count < 10").unwrap().evaluate(&ctx), Some(true));
        assert_eq!(Condition::parse("params.count <= 4").unwrap().evaluate(&ctx), Some(false));
        // "10" < "9" as strings, but not as numbers
        assert_eq!(Condition::parse("10 < 9").unwrap().evaluate(&ctx), Some(false));
    }

    #[test]
    fn test_unknown_reference_is_undecided() {
        let condition = Condition::parse("{{ steps.classify.output }} == spam").unwrap();
        assert_eq!(condition.evaluate(&HashMap::new()), None);
    }

    #[test]
    fn test_bare_operand_truthiness() {
        let ctx = context(&[("params.enabled", "false"), ("params.name", "x")]);
        assert_eq!(Condition::parse("params.enabled").unwrap().evaluate(&ctx), Some(false));
        assert_eq!(Condition::parse("{{ params.name }}").unwrap().evaluate(&ctx), Some(true));
        assert_eq!(Condition::parse("true").unwrap().evaluate(&ctx), Some(true));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Condition::parse("   "), Err(ConditionError::Empty));
        assert!(matches!(
            Condition::parse("params.x =="),
            Err(ConditionError::MissingOperand { .. })
        ));
        assert!(matches!(
            Condition::parse("status is done"),
            Err(ConditionError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_operators_inside_quotes_are_literal_text() {
        let condition = Condition::parse("params.x < '=='").unwrap();
        assert_eq!(condition.left, Operand::Reference("params.x".to_string()));
        assert_eq!(
            condition.comparison,
            Some((Operator::Lt, Operand::Literal("==".to_string())))
        );

        let condition = Condition::parse(r#"params.label == "a>b""#).unwrap();
        let ctx = context(&[("params.label", "a>b")]);
        assert_eq!(condition.evaluate(&ctx), Some(true));
        assert_eq!(Condition::parse(&condition.to_string()).unwrap(), condition);
    }

    #[test]
    fn test_display_round_trips() {
        let condition = Condition::parse("params.count>=2").unwrap();
        assert_eq!(condition.to_string(), "{{ params.count }} >= 2");
        assert_eq!(Condition::parse(&condition.to_string()).unwrap(), condition);
    }
}
