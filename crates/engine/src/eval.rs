//! Declarative expression evaluation for profile rules.
//!
//! Conditions come in a small Python-flavored dialect:
//! `v['state.flags.x'] > 2 and not v['state.current_action']`. A
//! normalization pass rewrites the dialect into `evalexpr` syntax and
//! binds each `v['...']` reference to a scalar from the state view, then
//! the expression is parsed and evaluated.
//!
//! Only a syntactically malformed expression produces
//! [`Error::Evaluator`]. Every runtime lookup degrades: absent paths
//! bind falsey, type mismatches evaluate to false. Evaluation is pure.

use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue};
use regex::Regex;
use serde_json::Value;

use rt_domain::error::{Error, Result};
use rt_domain::state::resolve_path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conditions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate a condition string against a read-only state view.
pub fn eval_condition(expr: &str, view: &Value) -> Result<bool> {
    let (normalized, bindings) = normalize(expr, view);

    let mut context: HashMapContext = HashMapContext::new();
    for (name, value) in bindings {
        // Only fails on identifier clashes, which we generate ourselves.
        context
            .set_value(name, value)
            .map_err(|e| Error::Evaluator(e.to_string()))?;
    }

    let tree = evalexpr::build_operator_tree(&normalized)
        .map_err(|e| Error::Evaluator(format!("{expr}: {e}")))?;

    match tree.eval_with_context(&context) {
        Ok(value) => Ok(truthy(&value)),
        Err(e) => {
            // Runtime degradation, e.g. `false > 2` after an absent path.
            tracing::debug!(condition = expr, error = %e, "condition evaluated falsey");
            Ok(false)
        }
    }
}

fn truthy(value: &EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => *b,
        EvalValue::Int(i) => *i != 0,
        EvalValue::Float(f) => *f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(t) => !t.is_empty(),
        EvalValue::Empty => false,
    }
}

/// Rewrite the profile dialect into evalexpr syntax. Returns the
/// rewritten expression plus the `refN` variable bindings.
fn normalize(expr: &str, view: &Value) -> (String, Vec<(String, EvalValue)>) {
    let reference =
        Regex::new(r#"v\[\s*(?:'([^']*)'|"([^"]*)")\s*\]"#).expect("static regex");

    let mut bindings = Vec::new();
    let rewritten = reference
        .replace_all(expr, |caps: &regex::Captures<'_>| {
            let path = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            let name = format!("ref{}", bindings.len());
            bindings.push((name.clone(), bind(resolve_path(view, path))));
            name
        })
        .into_owned();

    // Remaining single-quoted literals become evalexpr strings.
    let rewritten = rewritten.replace('\'', "\"");

    // Word operators and Python literals, outside string literals only.
    let mut out = String::with_capacity(rewritten.len());
    for (i, chunk) in rewritten.split('"').enumerate() {
        if i > 0 {
            out.push('"');
        }
        if i % 2 == 0 {
            out.push_str(&rewrite_words(chunk));
        } else {
            out.push_str(chunk);
        }
    }
    (out, bindings)
}

fn rewrite_words(chunk: &str) -> String {
    let words = Regex::new(r"\b(True|False|None|and|or|not)\b").expect("static regex");
    words
        .replace_all(chunk, |caps: &regex::Captures<'_>| {
            match &caps[1] {
                "True" => "true",
                "False" | "None" => "false",
                "and" => "&&",
                "or" => "||",
                "not" => "!",
                other => other,
            }
            .to_string()
        })
        .into_owned()
}

/// Bind a resolved state value to an evalexpr scalar. Containers bind
/// to their non-emptiness; absent and null bind false.
fn bind(value: Option<&Value>) -> EvalValue {
    match value {
        None | Some(Value::Null) => EvalValue::Boolean(false),
        Some(Value::Bool(b)) => EvalValue::Boolean(*b),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                EvalValue::Int(i)
            } else {
                EvalValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Some(Value::String(s)) => EvalValue::String(s.clone()),
        Some(Value::Array(a)) => EvalValue::Boolean(!a.is_empty()),
        Some(Value::Object(o)) => EvalValue::Boolean(!o.is_empty()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Interpolate `{{ path.to.value }}` references with the string form of
/// the resolved value; absent paths become the empty string.
pub fn render_template(text: &str, view: &Value) -> String {
    let placeholder = Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static regex");
    placeholder
        .replace_all(text, |caps: &regex::Captures<'_>| {
            string_form(resolve_path(view, &caps[1]))
        })
        .into_owned()
}

fn string_form(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
