//! Engine wire types.
//!
//! Shapes follow the Docker Engine API v1.43 JSON encoding. Only the
//! fields the supervisor consumes are modeled; unknown fields in engine
//! responses are ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// List / inspect responses
// ============================================================================

/// Container summary returned by the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,
    /// Container names, each prefixed with `/`.
    pub names: Vec<String>,
    /// Labels attached at create time.
    pub labels: HashMap<String, String>,
    /// Coarse state string (`running`, `exited`, ...).
    pub state: String,
}

/// Container inspect response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInspect {
    /// Container ID.
    pub id: String,
    /// Container name, prefixed with `/`.
    pub name: String,
    /// Creation-time configuration.
    pub config: InspectConfig,
    /// Runtime state.
    pub state: ContainerState,
}

/// Creation-time configuration block of an inspect response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InspectConfig {
    /// Labels attached at create time.
    pub labels: HashMap<String, String>,
}

/// Runtime state block of an inspect response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    /// Status string (`created`, `running`, `exited`, ...).
    pub status: String,
    /// Whether the container is currently running.
    pub running: bool,
    /// Last error the daemon recorded for this container, if any.
    pub error: String,
}

// ============================================================================
// Create request
// ============================================================================

/// Container create request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateContainer {
    /// Hostname inside the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Attach the standard output.
    pub attach_stdout: bool,
    /// Attach the standard error.
    pub attach_stderr: bool,
    /// Environment, one `KEY=value` entry per element.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Command to run when starting the container.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    /// Image reference as declared by the operator.
    pub image: String,
    /// Working directory for the command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    /// Signal used to stop the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    /// Seconds to wait after the stop signal before killing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<i64>,
    /// Labels set on the container.
    pub labels: HashMap<String, String>,
    /// Host-side configuration.
    pub host_config: HostConfig,
}

/// Host-side configuration of a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    /// Volume bindings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    /// Network mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    /// Restart policy applied by the engine.
    pub restart_policy: RestartPolicy,
    /// Log driver configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_config: Option<LogConfig>,
    /// Memory limit in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// CPU quota in units of 10^-9 CPUs.
    #[serde(rename = "NanoCpus", skip_serializing_if = "Option::is_none")]
    pub nano_cpus: Option<i64>,
}

/// Restart policy of a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RestartPolicy {
    /// Policy name (`always`, `unless-stopped`, ...).
    pub name: String,
}

/// Log driver configuration of a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogConfig {
    /// Driver name.
    #[serde(rename = "Type")]
    pub driver: String,
    /// Driver options.
    pub config: HashMap<String, String>,
}

/// Container create response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreatedContainer {
    /// ID of the created container.
    pub id: String,
    /// Warnings emitted during create.
    pub warnings: Vec<String>,
}

// ============================================================================
// Exec
// ============================================================================

/// Exec create request body.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreate {
    /// Command to run inside the container.
    pub cmd: Vec<String>,
    /// One output stream must be attached so the attach call waits for exit.
    pub attach_stderr: bool,
}

/// Exec create response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecCreated {
    /// ID of the exec session.
    pub id: String,
}

/// Exec inspect response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExecInspect {
    /// Whether the exec command is still running.
    pub running: bool,
    /// Exit code; absent while the command is running.
    pub exit_code: Option<i64>,
}
