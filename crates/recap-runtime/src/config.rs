use std::time::Duration;

use indexmap::IndexSet;
use recap_agent::UploadWatcher;
use recap_protocol::{CollectionRef, DEFAULT_STAGES, ProcessingOptions};

/// Knobs of the stop pipeline.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pins the organization instead of asking the agent.
    pub org_id: Option<String>,
    /// Pins the device instead of asking the agent.
    pub device_id: Option<String>,
    pub timezone: String,
    pub stages: IndexSet<String>,
    pub options: ProcessingOptions,
    pub visibility: String,
    pub pipeline_version: String,
    pub config_path: String,
    /// Timeout for `audio_stop`; the agent client default applies when unset.
    pub stop_timeout: Option<Duration>,
    pub upload: UploadWatcher,
    pub processing_timeout: Duration,
    pub collection_template: String,
    /// When false a processing failure fails the session instead of
    /// falling back to a synthesized result.
    pub degrade_on_processing_failure: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            org_id: None,
            device_id: None,
            timezone: "UTC".to_owned(),
            stages: DEFAULT_STAGES.iter().map(|s| (*s).to_owned()).collect(),
            options: ProcessingOptions::default(),
            visibility: "private".to_owned(),
            pipeline_version: "1.0".to_owned(),
            config_path: "secrets/config.toml".to_owned(),
            stop_timeout: None,
            upload: UploadWatcher::default(),
            processing_timeout: Duration::from_secs(30),
            collection_template: CollectionRef::DEFAULT_TEMPLATE.to_owned(),
            degrade_on_processing_failure: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_identity(mut self, org_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_upload(mut self, upload: UploadWatcher) -> Self {
        self.upload = upload;
        self
    }

    pub fn collection_for(&self, org_id: &str) -> CollectionRef {
        CollectionRef::from_template(&self.collection_template, org_id)
    }
}
