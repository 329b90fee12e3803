//! Per-instance reconciliation task.
//!
//! Each managed instance gets one long-lived cooperative task. On every
//! wake-up the task drives the instance toward its declared state with a
//! single reconciliation pass. Nothing is retried inline: every failure
//! logs, abandons the current pass and waits for the next tick, which
//! keeps the decision tree flat.

use crate::config::{Template, VERSION_LABEL};
use crate::probe;
use crate::supervisor::Supervisor;
use corral_engine::types::ContainerInspect;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Engine error left behind when a previous container's network endpoint
/// was not released before the new one was created. The pattern is fragile
/// against engine version drift; unmatched error strings are logged so
/// operators can extend it.
static NETWORK_ENDPOINT_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^endpoint with name .* already exists in network (.*)$")
        .expect("endpoint conflict pattern should compile")
});

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep the task alive and wait for the next wake-up.
    Continue,
    /// The instance is gone and unmanaged; the task ends.
    Terminate,
}

/// The control task for a single instance.
pub(crate) struct Reconciler {
    name: String,
    supervisor: Arc<Supervisor>,
}

impl Reconciler {
    pub(crate) fn new(name: String, supervisor: Arc<Supervisor>) -> Self {
        Self { name, supervisor }
    }

    /// Wake loop: a periodic tick (interval read fresh each cycle so
    /// reloads take effect) or a reload pulse, whichever fires first.
    /// Exactly one reconciliation pass runs per wake-up.
    pub(crate) async fn run(self, mut reload_rx: mpsc::Receiver<()>) {
        loop {
            let interval = self.supervisor.check_interval();
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                pulse = reload_rx.recv() => {
                    if pulse.is_none() {
                        // The record was dropped out from under us.
                        return;
                    }
                }
            }
            if self.reconcile().await == Flow::Terminate {
                return;
            }
        }
    }

    /// One pass of the decision tree. The first matching branch runs and
    /// returns.
    pub(crate) async fn reconcile(&self) -> Flow {
        let Some(template) = self.supervisor.template_for(&self.name) else {
            return self.remove_undeclared().await;
        };

        let inspect = match self
            .supervisor
            .engine()
            .inspect_container(&self.name)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if e.is_not_found() => {
                info!(instance = %self.name, "container not found");
                self.materialize(template).await;
                return Flow::Continue;
            }
            Err(e) => {
                error!(instance = %self.name, "cannot inspect container: {e}");
                return Flow::Continue;
            }
        };

        if inspect.config.labels.get(VERSION_LABEL) == Some(&template.version) {
            self.hold_steady(&template, &inspect).await;
            return Flow::Continue;
        }

        info!(instance = %self.name, "container definition changed, reloading");
        self.replace(template).await;
        Flow::Continue
    }

    /// The declaration vanished: stop and remove the container, then drop
    /// this instance from the supervisor map.
    async fn remove_undeclared(&self) -> Flow {
        info!(instance = %self.name, "container definition not found");
        self.supervisor.mark_action_started(&self.name);
        if let Err(e) = self.remove_container().await {
            // The action stays open so the stuck detector can trip.
            error!(instance = %self.name, "cannot remove container: {e}");
            return Flow::Continue;
        }
        self.supervisor.clear_action(&self.name);
        self.supervisor.forget(&self.name);
        Flow::Terminate
    }

    /// The container does not exist: pull, create and start it.
    async fn materialize(&self, template: Arc<Template>) {
        self.supervisor.mark_action_started(&self.name);
        if let Err(e) = self.pull_image(&template).await {
            error!(instance = %self.name, "cannot pull image: {e}");
            return;
        }
        self.supervisor
            .snapshot_template(&self.name, Arc::clone(&template));
        if self.create_and_start(&template).await {
            self.supervisor.clear_action(&self.name);
        }
    }

    /// The declared version changed: destroy the old container, then
    /// create and start the new one. At-least-once, no overlap; the old
    /// container is gone before the new one exists.
    async fn replace(&self, template: Arc<Template>) {
        if let Err(e) = self.pull_image(&template).await {
            error!(instance = %self.name, "cannot pull image: {e}");
            return;
        }
        self.supervisor.mark_action_started(&self.name);
        if let Err(e) = self.remove_container().await {
            error!(instance = %self.name, "cannot remove container: {e}");
            return;
        }
        self.supervisor
            .snapshot_template(&self.name, Arc::clone(&template));
        if self.create_and_start(&template).await {
            self.supervisor.clear_action(&self.name);
        }
    }

    /// The running container matches its declaration. Recover from known
    /// engine states, otherwise run the liveness probe. Both recoveries
    /// may fire in one pass: a start that failed on a stale endpoint
    /// leaves the container in "created" with the endpoint error set, and
    /// converging needs the disconnect and then the start.
    async fn hold_steady(&self, template: &Template, inspect: &ContainerInspect) {
        let engine = self.supervisor.engine();

        if let Some(captures) = NETWORK_ENDPOINT_CONFLICT.captures(&inspect.state.error) {
            let network = &captures[1];
            info!(instance = %self.name, error = %inspect.state.error, "detected stale network endpoint");
            if let Err(e) = engine
                .network_disconnect(network, &inspect.id, true)
                .await
            {
                error!(instance = %self.name, "cannot disconnect container from network: {e}");
                return;
            }
        } else if !inspect.state.error.is_empty() {
            info!(instance = %self.name, error = %inspect.state.error, "unrecognized engine error state");
        }

        // A container in "created" was made by us but never successfully
        // started, e.g. a prior start failed.
        if inspect.state.status == "created" {
            info!(instance = %self.name, "container not running, starting container");
            if let Err(e) = engine.start_container(&inspect.id).await {
                error!(instance = %self.name, "cannot start container: {e}");
                return;
            }
            // The create/start action that stranded the container is now
            // complete.
            self.supervisor.clear_action(&self.name);
            return;
        }

        self.run_probe(template).await;
    }

    async fn run_probe(&self, template: &Template) {
        let previous = self.supervisor.probe_session(&self.name);
        let (session, result) = probe::probe(
            self.supervisor.engine().as_ref(),
            &self.name,
            &template.check_cmd,
            template.check_timeout(),
            previous,
        )
        .await;
        let error = result.err().map(|e| e.to_string());
        if let Some(e) = &error {
            warn!(instance = %self.name, "health check failed: {e}");
        }
        self.supervisor.record_probe(&self.name, session, error);
    }

    async fn pull_image(&self, template: &Template) -> corral_engine::Result<()> {
        info!(instance = %self.name, image = %template.image, "pulling image");
        self.supervisor
            .engine()
            .pull_image(&template.image, template.registry_auth.as_deref())
            .await
    }

    /// Stops and force-removes the container. A container that is already
    /// gone counts as removed.
    async fn remove_container(&self) -> corral_engine::Result<()> {
        let engine = self.supervisor.engine();
        info!(instance = %self.name, "stopping container");
        match engine.stop_container(&self.name, None).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        info!(instance = %self.name, "removing container");
        match engine.remove_container(&self.name, true).await {
            Ok(()) | Err(corral_engine::EngineError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Creates and starts the container; true on success.
    async fn create_and_start(&self, template: &Template) -> bool {
        let engine = self.supervisor.engine();
        info!(instance = %self.name, "creating container");
        let id = match engine
            .create_container(&self.name, template.create_spec(&self.name))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(instance = %self.name, "cannot create container: {e}");
                return false;
            }
        };
        info!(instance = %self.name, "starting container");
        if let Err(e) = engine.start_container(&id).await {
            error!(instance = %self.name, "cannot start container: {e}");
            return false;
        }
        true
    }
}
