use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::config::RuntimeConfig;
use crate::error::RunnerError;
use crate::error_codes;

const DEFAULT_WRAPPER: &str = "./wrapper.sh";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;

/// Handle of one created, not-yet-started exec inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandle {
    pub id: String,
}

/// Whether the runtime accepted the exec at all. A rejection here means
/// the computation never ran, which settles differently from a
/// computation that ran and failed.
#[derive(Debug)]
pub enum CreateExecOutcome {
    Created(ExecHandle),

    Rejected {
        code: i64,
        message: &'static str,
    },
}

/// Raw product of one started exec, consumed immediately by the
/// interpreter. Never persisted.
#[derive(Debug)]
pub enum ExecutionOutcome {
    RawOutput(Vec<u8>),

    RuntimeFailure {
        code: i64,
        message: String,
    },
}

/// One-shot execution operations against a running sandbox. Single
/// attempt each; retry policy belongs to the settlement controller.
#[async_trait]
pub trait ExecRunner: Send + Sync {
    async fn create_exec(
        &self,
        unit: &str,
        dataset_artifact: &str,
        software_artifact: &str,
        requester_key: &str,
    ) -> Result<CreateExecOutcome, RunnerError>;

    /// Start a previously created exec and buffer its combined output to
    /// completion. No partial consumption; the full buffer comes back
    /// once the stream ends.
    async fn run_exec(&self, exec: &ExecHandle) -> Result<ExecutionOutcome, RunnerError>;

    /// Liveness probe of the container's current execution unit.
    async fn container_alive(&self, unit: &str) -> bool;
}

/// Exec adapter over the container runtime's http control plane.
pub struct DockerRunner {
    http: reqwest::Client,
    control_url: String,
    wrapper_entrypoint: String,
}

#[derive(Debug, Deserialize)]
struct CreatedExec {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Running")]
    running: bool,
}

impl DockerRunner {
    pub fn new(config: &RuntimeConfig) -> Result<DockerRunner, RunnerError> {
        let timeout = config.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| RunnerError::Transport(e.to_string()))?;
        Ok(DockerRunner {
            http,
            control_url: config.control_url.trim_end_matches('/').to_string(),
            wrapper_entrypoint: config.wrapper_entrypoint
                .clone()
                .unwrap_or_else(|| DEFAULT_WRAPPER.to_string()),
        })
    }
}

#[async_trait]
impl ExecRunner for DockerRunner {
    async fn create_exec(
        &self,
        unit: &str,
        dataset_artifact: &str,
        software_artifact: &str,
        requester_key: &str,
    ) -> Result<CreateExecOutcome, RunnerError> {
        let url = format!("{}/containers/{unit}/exec", self.control_url);
        let body = json!({
            "Cmd": [
                self.wrapper_entrypoint,
                dataset_artifact,
                software_artifact,
                requester_key,
            ],
            "AttachStdout": true,
        });
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = i64::from(resp.status().as_u16());
        if let Some(message) = error_codes::message_for(status) {
            warn!("Runtime refused the exec for `{unit}` with status {status}.");
            return Ok(CreateExecOutcome::Rejected { code: status, message });
        }
        if !resp.status().is_success() {
            return Err(RunnerError::Malformed(format!(
                "create-exec for `{unit}` answered {status}"
            )));
        }
        let created: CreatedExec = resp
            .json()
            .await
            .map_err(|e| RunnerError::Malformed(e.to_string()))?;
        debug!("Exec `{}` created inside `{unit}`.", created.id);
        Ok(CreateExecOutcome::Created(ExecHandle { id: created.id }))
    }

    async fn run_exec(&self, exec: &ExecHandle) -> Result<ExecutionOutcome, RunnerError> {
        let url = format!("{}/exec/{}/start", self.control_url, exec.id);
        let resp = self.http.post(&url).json(&json!({})).send().await?;
        let status = i64::from(resp.status().as_u16());
        if !resp.status().is_success() {
            let message = error_codes::message_for(status)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Exec start answered status {status}."));
            return Ok(ExecutionOutcome::RuntimeFailure { code: status, message });
        }
        let output = resp.bytes().await?;
        Ok(ExecutionOutcome::RawOutput(output.to_vec()))
    }

    async fn container_alive(&self, unit: &str) -> bool {
        let url = format!("{}/containers/{unit}/json", self.control_url);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,

            Err(e) => {
                warn!("Liveness probe for `{unit}` failed: `{e}`");
                return false;
            }
        };
        if !resp.status().is_success() {
            return false;
        }
        match resp.json::<InspectedContainer>().await {
            Ok(inspected) => inspected.state.running,

            Err(e) => {
                warn!("Liveness probe for `{unit}` is unreadable: `{e}`");
                false
            }
        }
    }
}
