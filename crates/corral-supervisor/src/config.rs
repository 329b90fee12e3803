//! Declaration loading and instance expansion.
//!
//! The operator file is YAML, loaded through figment layering: built-in
//! defaults, then the file, then `CORRAL_*` environment variables.
//!
//! ## Example declaration
//!
//! ```yaml
//! check_interval_secs: 60
//! listen_addr: "127.0.0.1:26662"
//!
//! containers:
//!   web:
//!     version: "2024-06-01"
//!     count: 2
//!     image: registry.example.com/web:stable
//!     env:
//!       PORT: "8080"
//!     binds:
//!       - /srv/web:/data
//!     check_cmd: ["curl", "-sf", "http://localhost:8080/ping"]
//! ```

use crate::error::Result;
use corral_engine::types::{
    CreateContainer, HostConfig, LogConfig as EngineLogConfig, RestartPolicy,
};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Label stamped on every container the supervisor creates. Its presence
/// is the sole criterion for "this container is ours"; its value is the
/// template version the container was created from.
pub const VERSION_LABEL: &str = "com.corral.container-manager.container-version";

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:26662";
const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RESTART_POLICY: &str = "unless-stopped";

/// The operator-provided description of the desired container set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Declaration {
    /// Cadence of periodic reconciliation, in seconds.
    pub check_interval_secs: u64,
    /// Bind address of the health endpoint.
    pub listen_addr: String,
    /// Declared container families, by base name.
    pub containers: BTreeMap<String, Template>,
}

impl Default for Declaration {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            containers: BTreeMap::new(),
        }
    }
}

impl Declaration {
    /// Loads a declaration from `path`, applying defaults and template
    /// normalization.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file is missing required fields or is
    /// not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // Figment skips absent files; an absent declaration is an
        // operator error, not an empty container set.
        if !path.exists() {
            return Err(figment::Error::from(format!(
                "declaration file not found: {}",
                path.display()
            ))
            .into());
        }
        let mut declaration: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CORRAL_"))
            .extract()?;
        declaration.normalize();
        Ok(declaration)
    }

    fn normalize(&mut self) {
        if self.check_interval_secs == 0 {
            self.check_interval_secs = DEFAULT_CHECK_INTERVAL_SECS;
        }
        for template in self.containers.values_mut() {
            template.apply_defaults();
        }
    }

    /// Returns the periodic reconciliation cadence.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Expands declared families into the instance map.
    ///
    /// A family `svc` with count `k` produces `svc` for the first instance
    /// and `svc.2` … `svc.k` for the rest; the base name is never suffixed
    /// for the first instance. A declared name colliding with another
    /// family's expansion is an operator error; the later-written key wins.
    #[must_use]
    pub fn instances(&self) -> HashMap<String, Arc<Template>> {
        let mut instances = HashMap::new();
        for (base, template) in &self.containers {
            let template = Arc::new(template.clone());
            for i in 1..=template.count {
                let key = if i == 1 {
                    base.clone()
                } else {
                    format!("{base}.{i}")
                };
                instances.insert(key, Arc::clone(&template));
            }
        }
        instances
    }
}

/// Declared state of one container family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    /// Opaque identity of the running configuration. A running container
    /// whose version label differs from this is destroyed and recreated.
    pub version: String,
    /// Number of instances in the family; 0 is normalized to 1.
    pub count: u32,
    /// Image reference to run.
    pub image: String,
    /// Working directory for the command.
    pub working_dir: Option<String>,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Command to run.
    pub cmd: Vec<String>,
    /// Signal used to stop the container.
    pub stop_signal: Option<String>,
    /// Seconds to wait after the stop signal before killing.
    pub stop_timeout_secs: Option<u64>,
    /// Network mode.
    pub network_mode: Option<String>,
    /// Hostname inside the container; defaults to the instance name.
    pub hostname: Option<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Volume bindings.
    pub binds: Vec<String>,
    /// Log driver configuration.
    pub log_config: Option<LogDriver>,
    /// Resource limits.
    pub resources: Resources,
    /// Engine restart policy for created containers.
    pub restart_policy: String,
    /// Pre-encoded registry auth payload for pulls.
    pub registry_auth: Option<String>,
    /// Liveness command run inside the container on the no-change path.
    pub check_cmd: Vec<String>,
    /// Read deadline for the liveness command, in seconds.
    pub check_timeout_secs: u64,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: String::new(),
            count: 1,
            image: String::new(),
            working_dir: None,
            entrypoint: Vec::new(),
            cmd: Vec::new(),
            stop_signal: None,
            stop_timeout_secs: None,
            network_mode: None,
            hostname: None,
            env: BTreeMap::new(),
            binds: Vec::new(),
            log_config: None,
            resources: Resources::default(),
            restart_policy: DEFAULT_RESTART_POLICY.to_string(),
            registry_auth: None,
            check_cmd: default_check_cmd(),
            check_timeout_secs: DEFAULT_CHECK_TIMEOUT_SECS,
        }
    }
}

fn default_check_cmd() -> Vec<String> {
    vec!["ls".to_string(), "/".to_string()]
}

impl Template {
    fn apply_defaults(&mut self) {
        if self.count == 0 {
            self.count = 1;
        }
        if self.check_cmd.is_empty() {
            self.check_cmd = default_check_cmd();
        }
        if self.check_timeout_secs == 0 {
            self.check_timeout_secs = DEFAULT_CHECK_TIMEOUT_SECS;
        }
        if self.restart_policy.is_empty() {
            self.restart_policy = DEFAULT_RESTART_POLICY.to_string();
        }
    }

    /// Returns the read deadline for the liveness command.
    #[must_use]
    pub const fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Returns the stop allowance used by the stuck detector: the declared
    /// stop timeout, or 10 seconds when none is declared.
    #[must_use]
    pub fn stuck_allowance(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS))
    }

    /// Assembles the engine create request for one instance, including the
    /// version label.
    #[must_use]
    pub fn create_spec(&self, name: &str) -> CreateContainer {
        let env = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        CreateContainer {
            hostname: Some(self.hostname.clone().unwrap_or_else(|| name.to_string())),
            attach_stdout: true,
            attach_stderr: true,
            env,
            cmd: self.cmd.clone(),
            image: self.image.clone(),
            working_dir: self.working_dir.clone(),
            entrypoint: self.entrypoint.clone(),
            stop_signal: self.stop_signal.clone(),
            stop_timeout: self
                .stop_timeout_secs
                .and_then(|secs| i64::try_from(secs).ok())
                .filter(|secs| *secs > 0),
            labels: HashMap::from([(VERSION_LABEL.to_string(), self.version.clone())]),
            host_config: HostConfig {
                binds: self.binds.clone(),
                network_mode: self.network_mode.clone(),
                restart_policy: RestartPolicy {
                    name: self.restart_policy.clone(),
                },
                log_config: self.log_config.as_ref().map(|lc| EngineLogConfig {
                    driver: lc.driver.clone(),
                    config: lc.options.clone().into_iter().collect(),
                }),
                memory: self.resources.memory_bytes,
                nano_cpus: self.resources.nano_cpus,
            },
        }
    }
}

/// Log driver selection for a container family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDriver {
    /// Driver name (`json-file`, `journald`, ...).
    pub driver: String,
    /// Driver options.
    pub options: BTreeMap<String, String>,
}

/// Resource limits for a container family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 10^-9 CPUs.
    pub nano_cpus: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn template(version: &str, count: u32) -> Template {
        Template {
            version: version.to_string(),
            count,
            image: "img:1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn declaration_defaults() {
        let declaration = Declaration::default();
        assert_eq!(declaration.check_interval(), Duration::from_secs(60));
        assert_eq!(declaration.listen_addr, "127.0.0.1:26662");
        assert!(declaration.containers.is_empty());
    }

    #[test]
    fn template_defaults() {
        let template = Template::default();
        assert_eq!(template.count, 1);
        assert_eq!(template.check_cmd, vec!["ls", "/"]);
        assert_eq!(template.check_timeout(), Duration::from_secs(10));
        assert_eq!(template.restart_policy, "unless-stopped");
        assert_eq!(template.stuck_allowance(), Duration::from_secs(10));
    }

    #[test]
    fn expansion_suffixes_all_but_the_first_instance() {
        let mut declaration = Declaration::default();
        declaration
            .containers
            .insert("svc".to_string(), template("1", 3));

        let instances = declaration.instances();
        let mut names: Vec<_> = instances.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["svc", "svc.2", "svc.3"]);
    }

    #[test]
    fn count_zero_is_normalized_to_one() {
        let mut declaration = Declaration::default();
        declaration
            .containers
            .insert("svc".to_string(), template("1", 0));
        declaration.normalize();

        let instances = declaration.instances();
        assert_eq!(instances.len(), 1);
        assert!(instances.contains_key("svc"));
    }

    #[test]
    fn create_spec_stamps_version_label_and_hostname() {
        let mut template = template("v42", 1);
        template
            .env
            .insert("PORT".to_string(), "8080".to_string());
        template.binds.push("/srv:/data".to_string());

        let spec = template.create_spec("svc.2");
        assert_eq!(spec.labels[VERSION_LABEL], "v42");
        assert_eq!(spec.hostname.as_deref(), Some("svc.2"));
        assert_eq!(spec.env, vec!["PORT=8080"]);
        assert_eq!(spec.host_config.binds, vec!["/srv:/data"]);
        assert_eq!(spec.host_config.restart_policy.name, "unless-stopped");
        assert!(spec.attach_stdout);
        assert!(spec.attach_stderr);
    }

    #[test]
    fn declared_hostname_wins_over_instance_name() {
        let mut template = template("1", 1);
        template.hostname = Some("fixed-host".to_string());
        let spec = template.create_spec("svc");
        assert_eq!(spec.hostname.as_deref(), Some("fixed-host"));
    }

    #[test]
    fn load_parses_yaml_and_applies_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
check_interval_secs: 15
containers:
  web:
    version: "3"
    image: img:3
    count: 2
  worker:
    version: "1"
    image: worker:1
    check_cmd: ["true"]
"#
        )
        .unwrap();

        let declaration = Declaration::load(file.path()).unwrap();
        assert_eq!(declaration.check_interval(), Duration::from_secs(15));

        let web = &declaration.containers["web"];
        assert_eq!(web.count, 2);
        assert_eq!(web.check_cmd, vec!["ls", "/"]);

        let worker = &declaration.containers["worker"];
        assert_eq!(worker.count, 1);
        assert_eq!(worker.check_cmd, vec!["true"]);

        let instances = declaration.instances();
        assert_eq!(instances.len(), 3);
        assert!(instances.contains_key("web"));
        assert!(instances.contains_key("web.2"));
        assert!(instances.contains_key("worker"));
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "containers: [not, a, mapping]").unwrap();
        assert!(Declaration::load(file.path()).is_err());
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Declaration::load("/nonexistent/declaration.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
