use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    /// LLM endpoint definitions (key = `llm_config_ref` in profiles).
    #[serde(default)]
    pub llm: HashMap<String, LlmConfig>,
}

impl Config {
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Resolve an `llm_config_ref` from a profile.
    pub fn llm_config(&self, name: &str) -> Option<&LlmConfig> {
        self.llm.get(name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_64")]
    pub max_turns_per_flow: u32,
    #[serde(default = "d_4")]
    pub max_concurrent_child_flows: usize,
    #[serde(default = "d_120000")]
    pub llm_call_timeout_ms: u64,
    #[serde(default = "d_3")]
    pub llm_max_retries: u32,
    #[serde(default = "d_600000")]
    pub run_wall_clock_timeout_ms: u64,
    #[serde(default)]
    pub state_dump_enabled: bool,
    #[serde(default)]
    pub state_dump_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns_per_flow: 64,
            max_concurrent_child_flows: 4,
            llm_call_timeout_ms: 120_000,
            llm_max_retries: 3,
            run_wall_clock_timeout_ms: 600_000,
            state_dump_enabled: false,
            state_dump_path: None,
        }
    }
}

impl EngineConfig {
    /// Overlay `RT_*` environment variables onto this config.
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        overlay_u32("RT_MAX_TURNS_PER_FLOW", &mut self.max_turns_per_flow);
        overlay_usize(
            "RT_MAX_CONCURRENT_CHILD_FLOWS",
            &mut self.max_concurrent_child_flows,
        );
        overlay_u64("RT_LLM_CALL_TIMEOUT_MS", &mut self.llm_call_timeout_ms);
        overlay_u32("RT_LLM_MAX_RETRIES", &mut self.llm_max_retries);
        overlay_u64(
            "RT_RUN_WALL_CLOCK_TIMEOUT_MS",
            &mut self.run_wall_clock_timeout_ms,
        );
        if let Ok(v) = std::env::var("RT_STATE_DUMP_ENABLED") {
            self.state_dump_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("RT_STATE_DUMP_PATH") {
            if !v.is_empty() {
                self.state_dump_path = Some(PathBuf::from(v));
            }
        }
    }
}

fn overlay_u32(var: &str, slot: &mut u32) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

fn overlay_u64(var: &str, slot: &mut u64) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

fn overlay_usize(var: &str, slot: &mut usize) {
    if let Ok(v) = std::env::var(var) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_120000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

// ── serde default helpers ──────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_4() -> usize {
    4
}
fn d_64() -> u32 {
    64
}
fn d_120000() -> u64 {
    120_000
}
fn d_600000() -> u64 {
    600_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_turns_per_flow, 64);
        assert_eq!(cfg.max_concurrent_child_flows, 4);
        assert_eq!(cfg.llm_max_retries, 3);
        assert!(!cfg.state_dump_enabled);
    }

    #[test]
    fn toml_round_trip_with_partial_keys() {
        let cfg = Config::from_toml(
            r#"
            [engine]
            max_turns_per_flow = 16
            state_dump_enabled = true

            [llm.default]
            endpoint_url = "http://localhost:8000/v1/chat/completions"
            model = "test-model"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_turns_per_flow, 16);
        assert!(cfg.engine.state_dump_enabled);
        // Unspecified keys fall back to defaults.
        assert_eq!(cfg.engine.llm_max_retries, 3);
        let llm = cfg.llm_config("default").unwrap();
        assert_eq!(llm.model, "test-model");
        assert_eq!(llm.timeout_ms, 120_000);
    }

    #[test]
    fn unknown_llm_ref_is_none() {
        let cfg = Config::default();
        assert!(cfg.llm_config("missing").is_none());
    }
}
