//! Workflow results.
//!
//! Real (document-store) and synthesized results share one struct so that a
//! consumer can never tell the two apart by shape, only by `source`.

use crate::ids::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowSource {
    Real,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the workflow.
    pub index: u32,
    pub action: String,
    /// Seconds from the start of the recording.
    pub timestamp_offset: u64,
    pub confidence: f64,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: WorkflowId,
    pub source: WorkflowSource,
    /// Document path the result came from (or would have come from, when synthesized).
    pub document_ref: String,
    pub title: String,
    pub summary: String,
    pub duration_seconds: u64,
    pub steps: Vec<StepRecord>,
    pub insights: Vec<String>,
    pub guide_markdown: Option<String>,
    pub productivity_score: f64,
    pub categories: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

impl WorkflowResult {
    pub fn is_synthesized(&self) -> bool {
        self.source == WorkflowSource::Synthesized
    }
}

/// Clamps a score or confidence into `[0, 1]`; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Parses `SS`, `MM:SS`, or `HH:MM:SS` into seconds.
pub fn parse_offset(raw: &str) -> Option<u64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut total = 0_u64;
    for part in parts {
        let value: u64 = part.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Formats seconds as `MM:SS`, growing to `HH:MM:SS` past an hour.
pub fn format_offset(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets_in_every_supported_shape() {
        assert_eq!(parse_offset("42"), Some(42));
        assert_eq!(parse_offset("03:15"), Some(195));
        assert_eq!(parse_offset("00:00:30"), Some(30));
        assert_eq!(parse_offset("1:00:00"), Some(3600));
        assert_eq!(parse_offset("bad"), None);
        assert_eq!(parse_offset("1:2:3:4"), None);
    }

    #[test]
    fn formats_offsets() {
        assert_eq!(format_offset(75), "01:15");
        assert_eq!(format_offset(3725), "01:02:05");
    }

    #[test]
    fn clamp_unit_bounds_values() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
