//! Test support: a scriptable in-memory engine.
//!
//! [`MockEngine`] stands in for a container daemon so reconciliation logic
//! can be exercised without one. It keeps a small world of containers that
//! behaves like dockerd for the operations the supervisor uses (create
//! conflicts on duplicate names, start flips state to running, remove
//! deletes), records every call for ordering and count assertions, and
//! lets tests script the next failure per operation.

use crate::config::{Declaration, Template, VERSION_LABEL};
use crate::supervisor::Supervisor;
use async_trait::async_trait;
use corral_engine::types::{
    ContainerInspect, ContainerState, ContainerSummary, CreateContainer, ExecInspect,
    InspectConfig,
};
use corral_engine::{Engine, EngineError, ExecStream, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    /// `list_containers`.
    List {
        /// Whether stopped containers were included.
        all: bool,
    },
    /// `inspect_container`.
    Inspect {
        /// Inspected name.
        name: String,
    },
    /// `pull_image`.
    Pull {
        /// Pulled image reference.
        image: String,
    },
    /// `create_container`.
    Create {
        /// Instance name.
        name: String,
        /// Full create request.
        spec: CreateContainer,
    },
    /// `start_container`.
    Start {
        /// Container id.
        id: String,
    },
    /// `stop_container`.
    Stop {
        /// Container name.
        name: String,
    },
    /// `remove_container`.
    Remove {
        /// Container name.
        name: String,
        /// Whether removal was forced.
        force: bool,
    },
    /// `network_disconnect`.
    NetworkDisconnect {
        /// Network name.
        network: String,
        /// Container id.
        container_id: String,
        /// Whether the disconnect was forced.
        force: bool,
    },
    /// `exec_create`.
    ExecCreate {
        /// Container name.
        name: String,
        /// Command.
        cmd: Vec<String>,
    },
    /// `exec_attach`.
    ExecAttach {
        /// Exec session id.
        exec_id: String,
    },
    /// `exec_inspect`.
    ExecInspect {
        /// Exec session id.
        exec_id: String,
    },
}

/// Scriptable in-memory engine.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    containers: Mutex<HashMap<String, ContainerInspect>>,
    extra_summaries: Mutex<Vec<ContainerSummary>>,
    execs: Mutex<HashMap<String, ExecInspect>>,
    exec_exit_code: Mutex<i64>,
    hang_exec: Mutex<bool>,
    hang_writers: Mutex<Vec<tokio::io::DuplexStream>>,
    failures: Mutex<HashMap<String, EngineError>>,
    next_id: Mutex<u64>,
}

impl MockEngine {
    /// Creates an empty engine world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a container into the world, keyed by its name.
    pub fn insert_container(&self, inspect: ContainerInspect) {
        let name = inspect.name.trim_start_matches('/').to_string();
        self.lock(&self.containers).insert(name, inspect);
    }

    /// Inserts a running container that does not carry the version label.
    pub fn insert_unlabeled_container(&self, name: &str, id: &str) {
        self.insert_container(ContainerInspect {
            id: id.to_string(),
            name: format!("/{name}"),
            config: InspectConfig::default(),
            state: ContainerState {
                status: "running".to_string(),
                running: true,
                error: String::new(),
            },
        });
    }

    /// Adds a raw summary that only shows up in list results, e.g. a
    /// container mid-removal with no names.
    pub fn insert_summary(&self, summary: ContainerSummary) {
        self.lock(&self.extra_summaries).push(summary);
    }

    /// Returns the world's view of a container.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<ContainerInspect> {
        self.lock(&self.containers).get(name).cloned()
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock(&self.calls).clone()
    }

    /// Scripts the next call of `op` (`list`, `inspect`, `pull`, `create`,
    /// `start`, `stop`, `remove`, `network_disconnect`, `exec_create`) to
    /// fail with `error`.
    pub fn fail_next(&self, op: &str, error: EngineError) {
        self.lock(&self.failures).insert(op.to_string(), error);
    }

    /// Sets the exit code future exec sessions report.
    pub fn set_exec_exit_code(&self, exit_code: i64) {
        *self.lock(&self.exec_exit_code) = exit_code;
    }

    /// Registers an exec session with a fixed state.
    pub fn prime_exec(&self, exec_id: &str, running: bool, exit_code: Option<i64>) {
        self.lock(&self.execs)
            .insert(exec_id.to_string(), ExecInspect { running, exit_code });
    }

    /// Makes future exec attaches hang until the probe deadline.
    pub fn hang_exec_output(&self) {
        *self.lock(&self.hang_exec) = true;
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().expect("mock engine state poisoned")
    }

    fn record(&self, call: EngineCall) {
        self.lock(&self.calls).push(call);
    }

    fn take_failure(&self, op: &str) -> Result<()> {
        match self.lock(&self.failures).remove(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut next = self.lock(&self.next_id);
        *next += 1;
        format!("{prefix}-{}", *next)
    }

    fn summarize(name: &str, inspect: &ContainerInspect) -> ContainerSummary {
        ContainerSummary {
            id: inspect.id.clone(),
            names: vec![format!("/{name}")],
            labels: inspect.config.labels.clone(),
            state: inspect.state.status.clone(),
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        self.record(EngineCall::List { all });
        self.take_failure("list")?;
        let mut summaries: Vec<ContainerSummary> = self
            .lock(&self.containers)
            .iter()
            .map(|(name, inspect)| Self::summarize(name, inspect))
            .collect();
        summaries.extend(self.lock(&self.extra_summaries).iter().cloned());
        if !all {
            summaries.retain(|s| s.state == "running");
        }
        Ok(summaries)
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInspect> {
        self.record(EngineCall::Inspect {
            name: name.to_string(),
        });
        self.take_failure("inspect")?;
        self.container(name)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {name}")))
    }

    async fn pull_image(&self, image: &str, _auth: Option<&str>) -> Result<()> {
        self.record(EngineCall::Pull {
            image: image.to_string(),
        });
        self.take_failure("pull")
    }

    async fn create_container(&self, name: &str, spec: CreateContainer) -> Result<String> {
        self.record(EngineCall::Create {
            name: name.to_string(),
            spec: spec.clone(),
        });
        self.take_failure("create")?;
        let mut containers = self.lock(&self.containers);
        if containers.contains_key(name) {
            return Err(EngineError::Conflict(format!("name already in use: {name}")));
        }
        let id = self.fresh_id("ctr");
        containers.insert(
            name.to_string(),
            ContainerInspect {
                id: id.clone(),
                name: format!("/{name}"),
                config: InspectConfig {
                    labels: spec.labels.clone(),
                },
                state: ContainerState {
                    status: "created".to_string(),
                    running: false,
                    error: String::new(),
                },
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Start { id: id.to_string() });
        self.take_failure("start")?;
        let mut containers = self.lock(&self.containers);
        let Some(inspect) = containers.values_mut().find(|c| c.id == id) else {
            return Err(EngineError::NotFound(format!("no such container: {id}")));
        };
        inspect.state.status = "running".to_string();
        inspect.state.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str, _timeout: Option<Duration>) -> Result<()> {
        self.record(EngineCall::Stop {
            name: name.to_string(),
        });
        self.take_failure("stop")?;
        let mut containers = self.lock(&self.containers);
        let Some(inspect) = containers.get_mut(name) else {
            return Err(EngineError::NotFound(format!("no such container: {name}")));
        };
        inspect.state.status = "exited".to_string();
        inspect.state.running = false;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        self.record(EngineCall::Remove {
            name: name.to_string(),
            force,
        });
        self.take_failure("remove")?;
        if self.lock(&self.containers).remove(name).is_none() {
            return Err(EngineError::NotFound(format!("no such container: {name}")));
        }
        Ok(())
    }

    async fn network_disconnect(
        &self,
        network: &str,
        container_id: &str,
        force: bool,
    ) -> Result<()> {
        self.record(EngineCall::NetworkDisconnect {
            network: network.to_string(),
            container_id: container_id.to_string(),
            force,
        });
        self.take_failure("network_disconnect")
    }

    async fn exec_create(&self, name: &str, cmd: &[String]) -> Result<String> {
        self.record(EngineCall::ExecCreate {
            name: name.to_string(),
            cmd: cmd.to_vec(),
        });
        self.take_failure("exec_create")?;
        let id = self.fresh_id("exec");
        let exit_code = *self.lock(&self.exec_exit_code);
        self.lock(&self.execs).insert(
            id.clone(),
            ExecInspect {
                running: false,
                exit_code: Some(exit_code),
            },
        );
        Ok(id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<ExecStream> {
        self.record(EngineCall::ExecAttach {
            exec_id: exec_id.to_string(),
        });
        if *self.lock(&self.hang_exec) {
            let (reader, writer) = tokio::io::duplex(64);
            // The writer half is parked so the reader never sees EOF.
            self.lock(&self.hang_writers).push(writer);
            return Ok(Box::new(reader));
        }
        Ok(Box::new(tokio::io::empty()))
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect> {
        self.record(EngineCall::ExecInspect {
            exec_id: exec_id.to_string(),
        });
        self.lock(&self.execs)
            .get(exec_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no such exec: {exec_id}")))
    }
}

/// Builds an inspect result for a running container stamped with the
/// version label.
#[must_use]
pub fn running_container(name: &str, id: &str, version: &str) -> ContainerInspect {
    ContainerInspect {
        id: id.to_string(),
        name: format!("/{name}"),
        config: InspectConfig {
            labels: HashMap::from([(VERSION_LABEL.to_string(), version.to_string())]),
        },
        state: ContainerState {
            status: "running".to_string(),
            running: true,
            error: String::new(),
        },
    }
}

/// Installs a declaration directly, bypassing the file source.
pub fn install_declaration(supervisor: &Supervisor, declaration: Declaration) {
    supervisor.install(declaration);
}

/// Inserts an instance record without spawning its run loop. The returned
/// receiver holds the record's wake channel open; dropping it closes the
/// channel.
pub fn register_instance(
    supervisor: &Arc<Supervisor>,
    name: &str,
    template: Option<Template>,
) -> mpsc::Receiver<()> {
    let (_reconciler, reload_rx) = supervisor.adopt(name.to_string(), template.map(Arc::new));
    reload_rx
}

/// Opens a reconciliation action on an instance, as a reconciler would
/// before its first engine call.
pub fn open_action(supervisor: &Supervisor, name: &str) {
    supervisor.mark_action_started(name);
}

/// Records a probe failure on an instance.
pub fn record_probe_error(supervisor: &Supervisor, name: &str, error: &str) {
    supervisor.record_probe(name, None, Some(error.to_string()));
}
