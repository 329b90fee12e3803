//! Process-level coordinator.
//!
//! The supervisor owns the parsed declaration, the expanded instance map
//! and one record per managed instance, all behind a single coarse mutex.
//! Contention is negligible at reconciliation cadence; the mutex is only
//! ever held for short reads and writes, never across an engine call.

use crate::config::{Declaration, Template, VERSION_LABEL};
use crate::error::{Result, SupervisorError};
use crate::health;
use crate::reconciler::Reconciler;
use corral_engine::Engine;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

/// One managed instance, as tracked by the supervisor.
pub(crate) struct InstanceRecord {
    /// Template snapshot used for the last reconciliation; `None` for a
    /// stale container that exists only to be removed.
    pub(crate) template: Option<Arc<Template>>,
    /// Coalescing reload pulse; a full slot drops further pulses.
    pub(crate) reload_tx: mpsc::Sender<()>,
    /// Set while a reconciliation action is in flight against the engine.
    pub(crate) action_started: Option<Instant>,
    /// Exec session left behind by the last probe, if any.
    pub(crate) last_probe_session: Option<String>,
    /// Error reported by the last probe, if any.
    pub(crate) last_probe_error: Option<String>,
}

impl InstanceRecord {
    /// An instance is stuck when an action has been in flight longer than
    /// the stop allowance plus one reconciliation interval.
    fn is_stuck(&self, check_interval: Duration) -> bool {
        let allowance = self
            .template
            .as_ref()
            .map_or(Duration::from_secs(10), |t| t.stuck_allowance());
        self.action_started
            .is_some_and(|started| started.elapsed() > allowance + check_interval)
    }
}

/// Health view of one instance, snapshotted under the supervisor mutex.
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    /// Instance name.
    pub name: String,
    /// Whether the stuck detector has tripped.
    pub stuck: bool,
    /// Error reported by the last periodic probe, if any.
    pub probe_error: Option<String>,
}

struct State {
    declaration: Declaration,
    definitions: HashMap<String, Arc<Template>>,
    records: HashMap<String, InstanceRecord>,
}

/// Process-level coordinator owning the reconciler map.
pub struct Supervisor {
    engine: Arc<dyn Engine>,
    declaration_path: PathBuf,
    state: Mutex<State>,
}

impl Supervisor {
    /// Creates a supervisor over `engine`, reading declarations from
    /// `declaration_path`.
    pub fn new(engine: Arc<dyn Engine>, declaration_path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            declaration_path: declaration_path.into(),
            state: Mutex::new(State {
                declaration: Declaration::default(),
                definitions: HashMap::new(),
                records: HashMap::new(),
            }),
        })
    }

    /// Returns the engine handle.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Parses the declaration file and swaps in the fresh instance map.
    /// On failure the previous state is retained.
    ///
    /// # Errors
    ///
    /// Returns a config error when the file cannot be read or parsed.
    pub fn reload_from_source(&self) -> Result<()> {
        info!(path = %self.declaration_path.display(), "loading declaration");
        let declaration = Declaration::load(&self.declaration_path)?;
        let definitions = declaration.instances();
        if let Ok(mut state) = self.state.lock() {
            state.declaration = declaration;
            state.definitions = definitions;
        }
        Ok(())
    }

    /// Returns the periodic reconciliation cadence, read fresh so reloads
    /// take effect on the next cycle.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.state
            .lock()
            .map(|s| s.declaration.check_interval())
            .unwrap_or(Duration::from_secs(60))
    }

    /// Returns the health endpoint bind address.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        self.state
            .lock()
            .map(|s| s.declaration.listen_addr.clone())
            .unwrap_or_default()
    }

    /// Looks up the declared template for an instance name.
    #[must_use]
    pub fn template_for(&self, name: &str) -> Option<Arc<Template>> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.definitions.get(name).cloned())
    }

    /// Pulses every live reconciler and spawns reconcilers for newly
    /// declared instances.
    pub fn reload_instances(self: &Arc<Self>) {
        let mut missing = Vec::new();
        if let Ok(state) = self.state.lock() {
            for record in state.records.values() {
                // A full slot means a reconcile is already pending; the
                // extra pulse is dropped.
                let _ = record.reload_tx.try_send(());
            }
            for (name, template) in &state.definitions {
                if !state.records.contains_key(name) {
                    missing.push((name.clone(), Arc::clone(template)));
                }
            }
        }
        for (name, template) in missing {
            self.spawn_instance(name, Some(template));
        }
    }

    /// Startup-only sweep: containers that carry the version label but no
    /// longer appear in the declaration get a template-less reconciler
    /// whose first pass removes them. Containers without the label were
    /// not created by us and are never touched; containers without names
    /// are mid-removal and ignored.
    ///
    /// # Errors
    ///
    /// Returns an engine error when the container list cannot be fetched.
    pub async fn remove_stale_containers(self: &Arc<Self>) -> Result<()> {
        let containers = self.engine.list_containers(true).await?;
        let mut stale = Vec::new();
        if let Ok(state) = self.state.lock() {
            for summary in &containers {
                if !summary.labels.contains_key(VERSION_LABEL) {
                    continue;
                }
                let Some(first) = summary.names.first() else {
                    continue;
                };
                if summary
                    .names
                    .iter()
                    .any(|n| state.definitions.contains_key(n.trim_start_matches('/')))
                {
                    continue;
                }
                let name = first.trim_start_matches('/').to_string();
                if state.records.contains_key(&name) {
                    continue;
                }
                stale.push(name);
            }
        }
        for name in stale {
            info!(instance = %name, "found stale container");
            self.spawn_instance(name, None);
        }
        Ok(())
    }

    /// Serves the health endpoint and the signal loop until a termination
    /// signal or a fatal error. Termination leaves containers running;
    /// they are persistent workloads under the engine's restart policy.
    ///
    /// # Errors
    ///
    /// Returns an error when the health endpoint cannot be served, a
    /// signal handler cannot be installed, or a reload fails to parse.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listen_addr = self.listen_addr();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .map_err(|e| SupervisorError::Http(e.to_string()))?;
        info!(addr = %listen_addr, "health endpoint listening");

        let (http_err_tx, mut http_err_rx) = mpsc::channel::<String>(1);
        let router = health::router(Arc::clone(&self));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                let _ = http_err_tx.send(e.to_string()).await;
            }
        });

        let mut reload =
            signal(SignalKind::hangup()).map_err(|e| SupervisorError::Signal(e.to_string()))?;
        let mut terminate =
            signal(SignalKind::terminate()).map_err(|e| SupervisorError::Signal(e.to_string()))?;

        loop {
            tokio::select! {
                _ = reload.recv() => {
                    info!("reload signal received");
                    self.reload_from_source()?;
                    self.reload_instances();
                }
                Some(e) = http_err_rx.recv() => {
                    return Err(SupervisorError::Http(e));
                }
                _ = terminate.recv() => {
                    info!("termination signal received, leaving containers running");
                    return Ok(());
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, leaving containers running");
                    return Ok(());
                }
            }
        }
    }

    /// Snapshots per-instance health under the mutex. The engine is never
    /// queried here; callers combine this with a separate list call.
    #[must_use]
    pub fn health_snapshot(&self) -> Vec<InstanceHealth> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let interval = state.declaration.check_interval();
        state
            .records
            .iter()
            .map(|(name, record)| InstanceHealth {
                name: name.clone(),
                stuck: record.is_stuck(interval),
                probe_error: record.last_probe_error.clone(),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Record plumbing used by reconcilers
    // ------------------------------------------------------------------

    /// Inserts a record with a primed pulse and returns the reconciler for
    /// it plus the wake channel. The caller decides whether to spawn the
    /// run loop; tests drive `reconcile` directly.
    pub(crate) fn adopt(
        self: &Arc<Self>,
        name: String,
        template: Option<Arc<Template>>,
    ) -> (Reconciler, mpsc::Receiver<()>) {
        let (reload_tx, reload_rx) = mpsc::channel(1);
        // The first reconcile runs immediately.
        let _ = reload_tx.try_send(());
        if let Ok(mut state) = self.state.lock() {
            state.records.insert(
                name.clone(),
                InstanceRecord {
                    template,
                    reload_tx,
                    action_started: None,
                    last_probe_session: None,
                    last_probe_error: None,
                },
            );
        }
        (Reconciler::new(name, Arc::clone(self)), reload_rx)
    }

    fn spawn_instance(self: &Arc<Self>, name: String, template: Option<Arc<Template>>) {
        let (reconciler, reload_rx) = self.adopt(name, template);
        tokio::spawn(reconciler.run(reload_rx));
    }

    pub(crate) fn mark_action_started(&self, name: &str) {
        self.with_record(name, |record| record.action_started = Some(Instant::now()));
    }

    pub(crate) fn clear_action(&self, name: &str) {
        self.with_record(name, |record| record.action_started = None);
    }

    pub(crate) fn snapshot_template(&self, name: &str, template: Arc<Template>) {
        self.with_record(name, |record| record.template = Some(template));
    }

    /// Deletes an instance record. Called by a reconciler once it has
    /// confirmed the container no longer exists and no declaration wants
    /// it back.
    pub(crate) fn forget(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.records.remove(name);
        }
    }

    pub(crate) fn probe_session(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.records.get(name).and_then(|r| r.last_probe_session.clone()))
    }

    pub(crate) fn record_probe(&self, name: &str, session: Option<String>, error: Option<String>) {
        self.with_record(name, |record| {
            record.last_probe_session = session;
            record.last_probe_error = error;
        });
    }

    pub(crate) fn action_in_flight(&self, name: &str) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.records.get(name).map(|r| r.action_started.is_some()))
            .unwrap_or(false)
    }

    pub(crate) fn has_record(&self, name: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.records.contains_key(name))
            .unwrap_or(false)
    }

    pub(crate) fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    fn with_record(&self, name: &str, f: impl FnOnce(&mut InstanceRecord)) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(record) = state.records.get_mut(name) {
                f(record);
            }
        }
    }

    pub(crate) fn install(&self, declaration: Declaration) {
        let definitions = declaration.instances();
        if let Ok(mut state) = self.state.lock() {
            state.declaration = declaration;
            state.definitions = definitions;
        }
    }
}
