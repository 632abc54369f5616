//! Run supervisor — the top-level object for one user request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use uuid::Uuid;

use rt_domain::config::Config;
use rt_domain::error::Result;
use rt_domain::tool::ChatMessage;
use rt_profiles::ProfileStore;

use crate::bus::{EndState, EventBus, RunEvent};
use crate::cancel::CancelToken;
use crate::flow::{FlowRunner, FlowTermination};
use crate::ingest::IngestorRegistry;
use crate::llm::ProviderMap;
use crate::registry::ToolRegistry;
use crate::team::TeamState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a flow or tool can reach during a run. Shared via `Arc`;
/// the registries are read-only, team state carries its own lock.
pub struct RunContext {
    pub run_id: Uuid,
    pub config: Arc<Config>,
    pub team: TeamState,
    pub bus: EventBus,
    pub cancel: CancelToken,
    pub profiles: Arc<ProfileStore>,
    pub registry: Arc<ToolRegistry>,
    pub providers: Arc<ProviderMap>,
    pub ingestors: IngestorRegistry,
    /// Bounds concurrent child flows during dispatch.
    pub dispatch_permits: Arc<Semaphore>,
    /// Findings submitted by `generate_message_summary`, per flow.
    findings: Mutex<HashMap<String, Value>>,
    /// Context strings tools contribute for a flow's next prompt.
    tool_context: Mutex<HashMap<String, Vec<String>>>,
    /// Message histories of terminated flows, addressed by flow id.
    flow_archive: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl RunContext {
    pub fn new(
        config: Arc<Config>,
        profiles: Arc<ProfileStore>,
        registry: Arc<ToolRegistry>,
        providers: Arc<ProviderMap>,
    ) -> Arc<Self> {
        let team = TeamState::new();
        team.set_profiles_list(&profiles.associate_names());

        let permits = config.engine.max_concurrent_child_flows.max(1);
        Arc::new(Self {
            run_id: Uuid::new_v4(),
            config,
            team,
            bus: EventBus::new(),
            cancel: CancelToken::new(),
            profiles,
            registry,
            providers,
            ingestors: IngestorRegistry::new(),
            dispatch_permits: Arc::new(Semaphore::new(permits)),
            findings: Mutex::new(HashMap::new()),
            tool_context: Mutex::new(HashMap::new()),
            flow_archive: Mutex::new(HashMap::new()),
        })
    }

    // ── Findings slot (Associate submissions) ──────────────────────

    /// Store a flow's submitted findings; a later call replaces them.
    pub fn submit_findings(&self, flow_id: &str, findings: Value) {
        self.findings.lock().insert(flow_id.to_string(), findings);
    }

    pub fn take_findings(&self, flow_id: &str) -> Option<Value> {
        self.findings.lock().remove(flow_id)
    }

    // ── Tool-contributed prompt context ────────────────────────────

    pub fn contribute_tool_context(&self, flow_id: &str, text: impl Into<String>) {
        self.tool_context
            .lock()
            .entry(flow_id.to_string())
            .or_default()
            .push(text.into());
    }

    pub fn take_tool_context(&self, flow_id: &str) -> Vec<String> {
        self.tool_context.lock().remove(flow_id).unwrap_or_default()
    }

    // ── Flow archive ───────────────────────────────────────────────

    pub fn archive_flow(&self, flow_id: &str, messages: Vec<ChatMessage>) {
        self.flow_archive
            .lock()
            .insert(flow_id.to_string(), messages);
    }

    pub fn archived_messages(&self, flow_id: &str) -> Option<Vec<ChatMessage>> {
        self.flow_archive.lock().get(flow_id).cloned()
    }

    fn archive_snapshot(&self) -> HashMap<String, Vec<ChatMessage>> {
        self.flow_archive.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Run;

/// Handle to a started run: cancel it, await it.
pub struct RunHandle {
    pub run_id: Uuid,
    ctx: Arc<RunContext>,
    handle: tokio::task::JoinHandle<FlowTermination>,
}

impl RunHandle {
    /// Fire the run-wide cancel token. Flows stop at their next
    /// suspension point.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    pub fn context(&self) -> Arc<RunContext> {
        self.ctx.clone()
    }

    /// Wait for the Principal flow (and thus the run) to terminate.
    pub async fn wait(self) -> FlowTermination {
        self.handle
            .await
            .unwrap_or_else(|e| FlowTermination::Error(format!("run task panicked: {e}")))
    }
}

impl Run {
    /// Start a run: seed team state, spawn the Principal flow with the
    /// user prompt as its first user message, publish `RunEnd` when it
    /// terminates.
    pub fn start(
        ctx: Arc<RunContext>,
        principal_profile: &str,
        user_prompt: &str,
    ) -> Result<RunHandle> {
        let profile = ctx.profiles.resolve(principal_profile)?;
        let flow_id = format!("flow_{}_{}", profile.name, short_id());

        let mut runner = FlowRunner::new(ctx.clone(), profile, flow_id);
        runner.push_message(ChatMessage::user(user_prompt));

        let run_id = ctx.run_id;
        tracing::info!(%run_id, principal = principal_profile, "run started");

        // Wall-clock watchdog: cancels the run, never aborts the flow
        // mid-step, so FlowEnd/RunEnd still publish.
        let watchdog = {
            let cancel = ctx.cancel.clone();
            let cap = std::time::Duration::from_millis(ctx.config.engine.run_wall_clock_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(cap).await;
                tracing::warn!(%run_id, "run wall-clock cap reached, cancelling");
                cancel.cancel();
            })
        };

        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let termination = runner.run().await;
            watchdog.abort();

            let (outcome, error) = match &termination {
                FlowTermination::Success => (EndState::Success, None),
                FlowTermination::Error(e) => (EndState::Error, Some(e.clone())),
                FlowTermination::Cancelled => (EndState::Cancelled, None),
            };

            if task_ctx.config.engine.state_dump_enabled {
                dump_state(&task_ctx, outcome);
            }

            task_ctx.bus.publish(RunEvent::RunEnd {
                run_id,
                outcome,
                error,
            });
            tracing::info!(%run_id, ?outcome, "run ended");
            termination
        });

        Ok(RunHandle {
            run_id,
            ctx,
            handle,
        })
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Serialize team state plus all flow histories to the configured path.
fn dump_state(ctx: &RunContext, outcome: EndState) {
    let Some(ref path) = ctx.config.engine.state_dump_path else {
        tracing::warn!("state dump enabled but no state_dump_path configured");
        return;
    };

    let dump = json!({
        "run_id": ctx.run_id,
        "finished_at": chrono::Utc::now(),
        "outcome": outcome,
        "team": ctx.team.snapshot(),
        "flows": ctx.archive_snapshot(),
    });

    match serde_json::to_string_pretty(&dump) {
        Ok(body) => {
            if let Err(e) = std::fs::write(path, body) {
                tracing::warn!(path = %path.display(), error = %e, "state dump failed");
            } else {
                tracing::info!(path = %path.display(), "state dumped");
            }
        }
        Err(e) => tracing::warn!(error = %e, "state dump serialization failed"),
    }
}
