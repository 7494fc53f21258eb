//! Maps a stored workflow document onto [`WorkflowResult`].
//!
//! Published documents are written by several generations of the pipeline, so
//! every field is looked up under each name it has been stored as.

use chrono::{DateTime, Utc};
use recap_protocol::workflow::{clamp_unit, parse_offset};
use recap_protocol::{
    RetrievalError, StepRecord, StoredDocument, WorkflowId, WorkflowResult, WorkflowSource,
};
use serde_json::{Map, Value};

const DEFAULT_TITLE: &str = "Published Workflow";
const DEFAULT_SUMMARY: &str = "Real workflow from the document store";
const DEFAULT_DURATION_SECONDS: u64 = 300;
const DEFAULT_SCORE: f64 = 0.85;
const DEFAULT_STEP_CONFIDENCE: f64 = 0.9;
/// Free-form markdown fields shorter than this are not treated as a guide.
const MIN_GUIDE_CHARS: usize = 100;

pub fn map_document(document: &StoredDocument) -> Result<WorkflowResult, RetrievalError> {
    let fields = &document.fields;
    if fields.is_empty() {
        return Err(RetrievalError::Malformed {
            id: document.id.clone(),
            message: "document has no fields".to_owned(),
        });
    }

    let title = first_str(fields, &["title", "name"]).unwrap_or(DEFAULT_TITLE);
    let summary = first_str(fields, &["description", "summary"]).unwrap_or(DEFAULT_SUMMARY);
    let duration_seconds = first_u64(fields, &["duration", "duration_seconds"])
        .unwrap_or(DEFAULT_DURATION_SECONDS);
    let productivity_score = first_f64(fields, &["score", "productivity_score"])
        .map(clamp_unit)
        .unwrap_or(DEFAULT_SCORE);
    let categories = string_list(fields.get("categories"))
        .unwrap_or_else(|| vec!["real_data".to_owned()]);
    let processed_at = first_str(fields, &["created_at", "timestamp", "updated_at"])
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
        .or(document.updated_at)
        .unwrap_or_else(Utc::now);

    Ok(WorkflowResult {
        workflow_id: WorkflowId::from_string(document.id.clone()),
        source: WorkflowSource::Real,
        document_ref: document.path.clone(),
        title: title.to_owned(),
        summary: summary.to_owned(),
        duration_seconds,
        steps: extract_steps(fields),
        insights: extract_insights(fields),
        guide_markdown: extract_guide(fields),
        productivity_score,
        categories,
        processed_at,
    })
}

fn first_str<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .filter(|value| !value.trim().is_empty())
}

fn first_u64(fields: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| fields.get(*key).and_then(as_u64))
}

fn first_f64(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| fields.get(*key).and_then(as_f64))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(items.iter().map(display_string).collect())
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn extract_steps(fields: &Map<String, Value>) -> Vec<StepRecord> {
    for key in ["steps", "workflow_steps"] {
        if let Some(Value::Array(items)) = fields.get(key) {
            return items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| step_from_value(i, item))
                .collect();
        }
    }

    if let Some(Value::Array(actions)) = fields.get("actions") {
        return actions
            .iter()
            .enumerate()
            .map(|(i, action)| StepRecord {
                index: i as u32 + 1,
                action: display_string(action),
                timestamp_offset: i as u64 * 10,
                confidence: DEFAULT_STEP_CONFIDENCE,
                context: "workflow".to_owned(),
            })
            .collect();
    }

    derived_steps(fields)
}

fn step_from_value(position: usize, item: &Value) -> Option<StepRecord> {
    let fallback_index = position as u32 + 1;
    match item {
        Value::String(action) => Some(StepRecord {
            index: fallback_index,
            action: action.clone(),
            timestamp_offset: position as u64 * 10,
            confidence: DEFAULT_STEP_CONFIDENCE,
            context: "workflow".to_owned(),
        }),
        Value::Object(step) => {
            let action = first_str(step, &["action", "description", "name", "title"])?;
            let timestamp_offset = match step.get("timestamp") {
                Some(Value::String(raw)) => parse_offset(raw),
                Some(other) => as_u64(other),
                None => None,
            }
            .unwrap_or(position as u64 * 10);
            Some(StepRecord {
                index: first_u64(step, &["step", "index"])
                    .map(|n| n as u32)
                    .unwrap_or(fallback_index),
                action: action.to_owned(),
                timestamp_offset,
                confidence: first_f64(step, &["confidence"])
                    .map(clamp_unit)
                    .unwrap_or(DEFAULT_STEP_CONFIDENCE),
                context: first_str(step, &["context"])
                    .unwrap_or("workflow")
                    .to_owned(),
            })
        }
        _ => None,
    }
}

fn derived_steps(fields: &Map<String, Value>) -> Vec<StepRecord> {
    let mut steps = Vec::new();
    if let Some(title) = first_str(fields, &["title"]) {
        steps.push(StepRecord {
            index: 1,
            action: format!("Started workflow: {title}"),
            timestamp_offset: 0,
            confidence: 1.0,
            context: "initialization".to_owned(),
        });
    }
    for key in ["description", "summary", "content"] {
        let Some(value) = fields.get(key) else {
            continue;
        };
        let text = display_string(value);
        if text.trim().is_empty() || value.is_null() {
            continue;
        }
        let index = steps.len() as u32 + 1;
        let excerpt: String = text.chars().take(50).collect();
        steps.push(StepRecord {
            index,
            action: format!("Processed {key}: {excerpt}..."),
            timestamp_offset: u64::from(index) * 15,
            confidence: 0.8,
            context: "processing".to_owned(),
        });
    }
    if steps.is_empty() {
        steps.push(StepRecord {
            index: 1,
            action: "Workflow executed".to_owned(),
            timestamp_offset: 0,
            confidence: DEFAULT_STEP_CONFIDENCE,
            context: "workflow".to_owned(),
        });
    }
    steps
}

fn extract_insights(fields: &Map<String, Value>) -> Vec<String> {
    let mut insights = ["insights", "recommendations", "notes"]
        .iter()
        .find_map(|key| string_list(fields.get(*key)))
        .unwrap_or_default();

    if let Some(version) = fields.get("version").filter(|v| !v.is_null()) {
        insights.push(format!(
            "Workflow version {} from published collection",
            display_string(version)
        ));
    }
    if let Some(created) = fields.get("created_at").filter(|v| !v.is_null()) {
        insights.push(format!("Originally created: {}", display_string(created)));
    }
    if let Some(categories) = string_list(fields.get("categories")) {
        insights.push(format!("Categories: {}", categories.join(", ")));
    }

    if insights.is_empty() {
        insights = vec![
            "Real workflow data from the document store".to_owned(),
            "Published workflow with production data".to_owned(),
            "Demonstrates actual user workflow patterns".to_owned(),
        ];
    }
    insights
}

fn extract_guide(fields: &Map<String, Value>) -> Option<String> {
    if let Some(guide) = fields.get("guide_markdown").and_then(Value::as_str) {
        return Some(guide.to_owned());
    }

    match fields.get("content") {
        Some(Value::Object(content)) => {
            if let Some(guide) = content.get("guide_markdown").and_then(Value::as_str) {
                return Some(guide.to_owned());
            }
        }
        Some(Value::String(raw)) => {
            if let Ok(Value::Object(content)) = serde_json::from_str::<Value>(raw)
                && let Some(guide) = content.get("guide_markdown").and_then(Value::as_str)
            {
                return Some(guide.to_owned());
            }
        }
        _ => {}
    }

    ["markdown", "guide", "instructions", "description_markdown"]
        .iter()
        .find_map(|key| {
            fields
                .get(*key)
                .and_then(Value::as_str)
                .filter(|text| text.chars().count() > MIN_GUIDE_CHARS)
                .map(str::to_owned)
        })
}

#[cfg(test)]
mod tests {
    use recap_protocol::{RetrievalError, StoredDocument, WorkflowSource};
    use serde_json::{Map, Value, json};

    use super::map_document;

    fn document(fields: Value) -> StoredDocument {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        StoredDocument {
            id: "wf_4411".to_owned(),
            path: "organizations/diligent4/published/meta/workflows_versions/wf_4411".to_owned(),
            fields,
            updated_at: None,
        }
    }

    #[test]
    fn maps_primary_field_names() {
        let result = map_document(&document(json!({
            "title": "Quarterly close",
            "description": "Reconciled ledgers",
            "duration": 640,
            "score": 0.91,
            "categories": ["finance"],
            "created_at": "2025-07-01T09:30:00Z",
            "steps": [
                { "step": 1, "action": "Open ledger", "timestamp": "00:00:00", "confidence": 0.97, "context": "finance" },
                { "action": "Export report", "timestamp": "02:30" },
                42
            ]
        })))
        .unwrap();

        assert_eq!(result.source, WorkflowSource::Real);
        assert_eq!(result.workflow_id.as_str(), "wf_4411");
        assert!(result.document_ref.ends_with("/wf_4411"));
        assert_eq!(result.title, "Quarterly close");
        assert_eq!(result.summary, "Reconciled ledgers");
        assert_eq!(result.duration_seconds, 640);
        assert_eq!(result.productivity_score, 0.91);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].index, 2);
        assert_eq!(result.steps[1].timestamp_offset, 150);
        assert_eq!(result.steps[1].confidence, 0.9);
        assert_eq!(result.processed_at.to_rfc3339(), "2025-07-01T09:30:00+00:00");
        assert!(result.insights.contains(&"Categories: finance".to_owned()));
    }

    #[test]
    fn falls_back_to_alternate_names_and_defaults() {
        let result = map_document(&document(json!({
            "name": "Inbox triage",
            "summary": "Sorted mail",
            "actions": ["Open inbox", "Archive newsletters"],
            "score": 3.5
        })))
        .unwrap();
        assert_eq!(result.title, "Inbox triage");
        assert_eq!(result.summary, "Sorted mail");
        assert_eq!(result.duration_seconds, 300);
        assert_eq!(result.productivity_score, 1.0);
        assert_eq!(result.categories, vec!["real_data"]);
        assert_eq!(result.steps[1].action, "Archive newsletters");
        assert_eq!(result.steps[1].timestamp_offset, 10);
        assert_eq!(result.insights.len(), 3);
    }

    #[test]
    fn derives_steps_when_none_are_stored() {
        let result = map_document(&document(json!({
            "title": "Report",
            "content": "Long body of text describing what happened in the session"
        })))
        .unwrap();
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].action, "Started workflow: Report");
        assert!(result.steps[1].action.starts_with("Processed content: "));
        assert_eq!(result.steps[1].timestamp_offset, 30);
    }

    #[test]
    fn guide_markdown_is_found_in_priority_order() {
        let nested = map_document(&document(json!({
            "content": { "guide_markdown": "# Nested" },
            "markdown": "x".repeat(200)
        })))
        .unwrap();
        assert_eq!(nested.guide_markdown.as_deref(), Some("# Nested"));

        let encoded = map_document(&document(json!({
            "content": "{\"guide_markdown\": \"# Encoded\"}"
        })))
        .unwrap();
        assert_eq!(encoded.guide_markdown.as_deref(), Some("# Encoded"));

        let long_field = map_document(&document(json!({ "instructions": "y".repeat(150) }))).unwrap();
        assert_eq!(long_field.guide_markdown.map(|g| g.len()), Some(150));

        let short_field = map_document(&document(json!({ "guide": "too short" }))).unwrap();
        assert!(short_field.guide_markdown.is_none());
    }

    #[test]
    fn empty_document_is_malformed() {
        let err = map_document(&document(json!({}))).unwrap_err();
        assert!(matches!(err, RetrievalError::Malformed { .. }));
    }
}
