//! Processing pipeline coordination.
//!
//! [`ProcessingCoordinator`] validates a descriptor, submits its trigger
//! document through a [`ProcessingPort`](recap_protocol::ProcessingPort), and
//! waits for the job under a bounded timeout. Every wait ends in a
//! [`ProcessingOutcome`] rather than an error.

mod archive;
mod coordinator;
mod http;
mod simulated;

pub use archive::TriggerArchive;
pub use coordinator::{ProcessingCoordinator, ProcessingOutcome};
pub use http::HttpForge;
pub use simulated::SimulatedForge;

#[cfg(test)]
mod testing {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use chrono::{Duration, Utc};
    use recap_protocol::{
        DEFAULT_STAGES, ProcessingJobDescriptor, ProcessingOptions, SessionId, TimeRange,
    };

    pub fn descriptor() -> ProcessingJobDescriptor {
        let end = Utc::now();
        ProcessingJobDescriptor {
            session_id: SessionId::new_uuid(),
            org_id: "diligent4".to_owned(),
            device_id: "DESKTOP-OBMAPKG-40770579".to_owned(),
            time_range: TimeRange {
                start: end - Duration::seconds(90),
                end,
            },
            timezone: "UTC".to_owned(),
            stages: DEFAULT_STAGES.iter().map(|s| (*s).to_owned()).collect(),
            options: ProcessingOptions::default(),
            visibility: "private".to_owned(),
            pipeline_version: "1.0".to_owned(),
            config_path: "secrets/config.toml".to_owned(),
        }
    }

    pub fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }
}
