use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, Map};
use indexmap::IndexSet;
use recap_agent::{DEFAULT_SOCKET_PATH, UploadWatcher};
use recap_protocol::{CollectionRef, DEFAULT_STAGES, ProcessingOptions};
use recap_runtime::RuntimeConfig;
use serde::Deserialize;

/// Prefix of environment overrides, e.g. `RECAP__AGENT__SOCKET_PATH`.
pub const ENV_PREFIX: &str = "RECAP";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RecapConfig {
    pub service: ServiceConfig,
    pub agent: AgentConfig,
    pub session: SessionConfig,
    pub processing: ProcessingConfig,
    pub store: StoreConfig,
    pub fallback: FallbackConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen: String,
    pub log_level: String,
    pub log_json: bool,
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8844".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            event_capacity: recap_events::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Socket,
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub mode: AgentMode,
    pub socket_path: PathBuf,
    pub timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub upload_poll_ms: u64,
    /// Reply latency of the simulated agent.
    pub simulated_latency_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Socket,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout_ms: 5_000,
            upload_timeout_ms: 60_000,
            upload_poll_ms: 500,
            simulated_latency_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub org_id: Option<String>,
    pub device_id: Option<String>,
    pub timezone: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            org_id: None,
            device_id: None,
            timezone: "UTC".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Simulated,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub mode: ProcessingMode,
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub simulated_delay_ms: u64,
    pub timeout_ms: u64,
    pub poll_ms: u64,
    pub stages: Vec<String>,
    pub pipeline_version: String,
    pub config_path: String,
    pub visibility: String,
    pub media_processing: bool,
    pub llm_enabled: bool,
    pub include_flowchart: bool,
    /// Directory receiving a copy of every submitted trigger document.
    pub trigger_dir: Option<PathBuf>,
    pub degrade_on_failure: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let options = ProcessingOptions::default();
        Self {
            mode: ProcessingMode::Simulated,
            base_url: None,
            request_timeout_ms: 10_000,
            simulated_delay_ms: 5_000,
            timeout_ms: 30_000,
            poll_ms: 500,
            stages: DEFAULT_STAGES.iter().map(|s| (*s).to_owned()).collect(),
            pipeline_version: "1.0".to_owned(),
            config_path: "secrets/config.toml".to_owned(),
            visibility: "private".to_owned(),
            media_processing: options.media_processing,
            llm_enabled: options.llm_enabled,
            include_flowchart: options.include_flowchart,
            trigger_dir: None,
            degrade_on_failure: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    None,
    File,
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub root: Option<PathBuf>,
    pub base_url: Option<String>,
    pub bearer_token: Option<String>,
    pub collection_template: String,
    pub limit: usize,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::None,
            root: None,
            base_url: None,
            bearer_token: None,
            collection_template: CollectionRef::DEFAULT_TEMPLATE.to_owned(),
            limit: recap_store::DEFAULT_LIMIT,
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FallbackConfig {
    /// Fixed seed for reproducible selection and synthesis.
    pub seed: Option<u64>,
}

impl RecapConfig {
    /// Reads `path` (missing file tolerated) and overlays `RECAP__*` variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(Some(path.as_ref()), None)
    }

    /// `env` replaces the process environment as the override source when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let s = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("processing.stages")
                    .source(env),
            )
            .build()?;
        s.try_deserialize()
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let processing = &self.processing;
        RuntimeConfig {
            org_id: self.session.org_id.clone(),
            device_id: self.session.device_id.clone(),
            timezone: self.session.timezone.clone(),
            stages: processing.stages.iter().cloned().collect::<IndexSet<_>>(),
            options: ProcessingOptions {
                media_processing: processing.media_processing,
                llm_enabled: processing.llm_enabled,
                include_flowchart: processing.include_flowchart,
            },
            visibility: processing.visibility.clone(),
            pipeline_version: processing.pipeline_version.clone(),
            config_path: processing.config_path.clone(),
            stop_timeout: Some(Duration::from_millis(self.agent.timeout_ms)),
            upload: UploadWatcher::new(
                Duration::from_millis(self.agent.upload_poll_ms),
                Duration::from_millis(self.agent.upload_timeout_ms),
            ),
            processing_timeout: Duration::from_millis(processing.timeout_ms),
            collection_template: self.store.collection_template.clone(),
            degrade_on_processing_failure: processing.degrade_on_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use config::Map;
    use tokio::fs;

    use super::{AgentMode, ProcessingMode, RecapConfig, StoreBackend};
    use crate::testing::unique_test_root;

    #[test]
    fn defaults_without_file_or_environment() -> Result<()> {
        let config = RecapConfig::load_with_env(None, Some(Map::new()))?;
        assert_eq!(config.service.listen, "127.0.0.1:8844");
        assert_eq!(config.agent.mode, AgentMode::Socket);
        assert_eq!(config.agent.timeout_ms, 5_000);
        assert_eq!(config.processing.mode, ProcessingMode::Simulated);
        assert_eq!(config.processing.stages, ["A", "B", "C", "D", "E", "F", "U"]);
        assert_eq!(config.store.backend, StoreBackend::None);
        assert_eq!(config.store.limit, 100);
        assert!(config.fallback.seed.is_none());

        let runtime = config.runtime_config();
        assert_eq!(runtime.processing_timeout, Duration::from_secs(30));
        assert_eq!(runtime.upload.timeout, Duration::from_secs(60));
        assert!(runtime.degrade_on_processing_failure);
        Ok(())
    }

    #[tokio::test]
    async fn file_then_environment_overrides() -> Result<()> {
        let root = unique_test_root("recap-kernel-config");
        fs::create_dir_all(&root).await?;
        let path = root.join("recap.toml");
        fs::write(
            &path,
            r#"
[agent]
mode = "simulated"
timeout_ms = 750

[session]
org_id = "diligent4"

[processing]
stages = ["A", "F"]
include_flowchart = false

[store]
backend = "file"
root = "/var/lib/recap/docs"
"#,
        )
        .await?;

        let mut env = Map::new();
        env.insert("RECAP__AGENT__TIMEOUT_MS".to_owned(), "1200".to_owned());
        env.insert("RECAP__FALLBACK__SEED".to_owned(), "7".to_owned());
        let config = RecapConfig::load_with_env(Some(&path), Some(env))?;

        assert_eq!(config.agent.mode, AgentMode::Simulated);
        assert_eq!(config.agent.timeout_ms, 1200);
        assert_eq!(config.session.org_id.as_deref(), Some("diligent4"));
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.fallback.seed, Some(7));

        let runtime = config.runtime_config();
        assert_eq!(runtime.stages.iter().collect::<Vec<_>>(), ["A", "F"]);
        assert!(!runtime.options.include_flowchart);
        assert_eq!(runtime.stop_timeout, Some(Duration::from_millis(1200)));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[test]
    fn missing_file_is_tolerated() -> Result<()> {
        let path = unique_test_root("recap-kernel-absent").join("recap.toml");
        let config = RecapConfig::load_with_env(Some(&path), Some(Map::new()))?;
        assert_eq!(config.session.timezone, "UTC");
        Ok(())
    }
}
