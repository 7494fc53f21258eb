//! Processing job descriptor and the trigger document sent to the pipeline.
//!
//! [`TriggerDocument`] is the one bit-exact contract in the system: field
//! names and nesting must not change.

use crate::error::DescriptorError;
use crate::ids::SessionId;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Trigger document schema version.
pub const TRIGGER_VERSION: &str = "1.0";

/// Pipeline stages requested when nothing else is configured.
pub const DEFAULT_STAGES: [&str; 7] = ["A", "B", "C", "D", "E", "F", "U"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub media_processing: bool,
    pub llm_enabled: bool,
    pub include_flowchart: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            media_processing: true,
            llm_enabled: true,
            include_flowchart: true,
        }
    }
}

/// Everything the processing pipeline needs to run one session.
///
/// Built once per stop, validated, then only ever read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJobDescriptor {
    pub session_id: SessionId,
    pub org_id: String,
    pub device_id: String,
    pub time_range: TimeRange,
    pub timezone: String,
    pub stages: IndexSet<String>,
    pub options: ProcessingOptions,
    pub visibility: String,
    pub pipeline_version: String,
    pub config_path: String,
}

impl ProcessingJobDescriptor {
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.stages.is_empty() {
            return Err(DescriptorError::EmptyStages);
        }
        if self.time_range.start >= self.time_range.end {
            return Err(DescriptorError::EmptyTimeRange {
                start: rfc3339_millis(self.time_range.start),
                end: rfc3339_millis(self.time_range.end),
            });
        }
        if self.org_id.trim().is_empty() {
            return Err(DescriptorError::MissingIdentity("org_id"));
        }
        if self.device_id.trim().is_empty() {
            return Err(DescriptorError::MissingIdentity("device_id"));
        }
        Ok(())
    }

    pub fn to_trigger(&self) -> TriggerDocument {
        TriggerDocument {
            version: TRIGGER_VERSION.to_owned(),
            session: TriggerSession {
                org_id: self.org_id.clone(),
                device_id: self.device_id.clone(),
                session_id: self.session_id.as_str().to_owned(),
                time_range: TriggerTimeRange {
                    start: rfc3339_millis(self.time_range.start),
                    end: rfc3339_millis(self.time_range.end),
                },
                timezone: self.timezone.clone(),
            },
            options: TriggerOptions {
                stages: self.stages.iter().cloned().collect(),
                media_processing: self.options.media_processing,
                llm_enabled: self.options.llm_enabled,
                include_flowchart: self.options.include_flowchart,
            },
            visibility: self.visibility.clone(),
            pipeline_version: self.pipeline_version.clone(),
            config_path: self.config_path.clone(),
        }
    }
}

/// `2025-08-21T13:09:15.066Z`
pub fn rfc3339_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDocument {
    pub version: String,
    pub session: TriggerSession,
    pub options: TriggerOptions,
    pub visibility: String,
    pub pipeline_version: String,
    pub config_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSession {
    pub org_id: String,
    pub device_id: String,
    pub session_id: String,
    pub time_range: TriggerTimeRange,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTimeRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOptions {
    pub stages: Vec<String>,
    pub media_processing: bool,
    pub llm_enabled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub include_flowchart: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}
