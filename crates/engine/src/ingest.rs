//! Ingestors — named formatters that render a state value as prompt
//! text. Referenced by `state_value` prompt segments and by inbox items.

use std::collections::HashMap;

use serde_json::Value;

use rt_domain::work::WorkModule;

pub type Ingestor = fn(&Value) -> String;

pub const DEFAULT_INGESTOR: &str = "plain_text";

pub struct IngestorRegistry {
    map: HashMap<&'static str, Ingestor>,
}

impl IngestorRegistry {
    /// Registry with the stock formatters.
    pub fn new() -> Self {
        let mut map: HashMap<&'static str, Ingestor> = HashMap::new();
        map.insert("plain_text", plain_text);
        map.insert("json_block", json_block);
        map.insert("work_modules_digest", work_modules_digest);
        map.insert("shared_context_block", shared_context_block);
        Self { map }
    }

    /// Render `value` with the named formatter; unknown names fall back
    /// to `plain_text`.
    pub fn render(&self, ingestor_id: &str, value: &Value) -> String {
        let f = self
            .map
            .get(ingestor_id)
            .copied()
            .unwrap_or_else(|| {
                tracing::warn!(ingestor_id, "unknown ingestor, using plain_text");
                plain_text
            });
        f(value)
    }
}

impl Default for IngestorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stock formatters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn plain_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_block(value: &Value) -> String {
    let body = serde_json::to_string_pretty(value).unwrap_or_default();
    format!("```json\n{body}\n```")
}

/// One line per module: id, status, name, deliverable count.
fn work_modules_digest(value: &Value) -> String {
    let modules: Vec<WorkModule> = value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    if modules.is_empty() {
        return "(no work modules yet)".into();
    }

    modules
        .iter()
        .map(|m| {
            let status = serde_json::to_value(m.status)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            let deliverables = match m.deliverables.len() {
                0 => String::new(),
                n => format!(", {n} deliverable{}", if n == 1 { "" } else { "s" }),
            };
            format!("- {} [{}] {}{}", m.module_id, status, m.name, deliverables)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn shared_context_block(value: &Value) -> String {
    match value.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", plain_text(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
