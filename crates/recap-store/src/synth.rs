use chrono::{Duration, Utc};
use recap_protocol::workflow::format_offset;
use recap_protocol::{
    CollectionRef, FallbackExhaustedError, StepRecord, WorkflowId, WorkflowResult, WorkflowSource,
};
use tracing::debug;

use crate::rng::SelectionRng;

const STEP_CONTEXTS: [&str; 4] = ["productivity", "analysis", "collaboration", "technical"];
const SKILLS: [&str; 4] = ["analytical", "collaborative", "technical", "creative"];
const PRACTICES: [&str; 4] = [
    "digital tools",
    "time management",
    "systematic approach",
    "best practices",
];
const QUALITIES: [&str; 4] = [
    "attention to detail",
    "strategic thinking",
    "problem-solving ability",
    "process optimization",
];
const PATTERNS: [&str; 4] = [
    "professional workflow patterns",
    "effective task prioritization",
    "quality focus",
    "team collaboration",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTemplate {
    pub title: String,
    pub summary: String,
    pub categories: Vec<String>,
    pub steps: Vec<String>,
}

impl WorkflowTemplate {
    fn new(title: &str, summary: &str, categories: &[&str], steps: &[&str]) -> Self {
        Self {
            title: title.to_owned(),
            summary: summary.to_owned(),
            categories: categories.iter().map(|c| (*c).to_owned()).collect(),
            steps: steps.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate::new(
            "Data Analysis & Reporting Session",
            "Comprehensive data analysis workflow with Excel processing, chart generation, and report compilation",
            &["data_analysis", "reporting", "productivity"],
            &[
                "Opened Excel workbook with quarterly sales data",
                "Applied advanced filters to identify top-performing regions",
                "Created pivot tables for revenue analysis by product category",
                "Generated comparative charts showing YoY growth trends",
                "Compiled findings into executive summary presentation",
                "Saved analysis results to shared team folder",
            ],
        ),
        WorkflowTemplate::new(
            "Research & Documentation Workflow",
            "Research session involving web browsing, note-taking, and document creation",
            &["research", "documentation", "knowledge_work"],
            &[
                "Conducted market research on competitor pricing strategies",
                "Gathered industry reports from multiple sources",
                "Organized findings in structured note-taking application",
                "Created comprehensive market analysis document",
                "Reviewed and edited content for accuracy and clarity",
                "Shared final document with stakeholders",
            ],
        ),
        WorkflowTemplate::new(
            "Software Development Session",
            "Coding session with debugging, testing, and version control activities",
            &["development", "programming", "technical"],
            &[
                "Reviewed code repository and identified bug reports",
                "Implemented fixes for critical authentication issues",
                "Wrote comprehensive unit tests for new functionality",
                "Performed code review and refactoring for optimization",
                "Updated documentation and API specifications",
                "Committed changes and created pull request",
            ],
        ),
        WorkflowTemplate::new(
            "Meeting Preparation & Follow-up",
            "Comprehensive meeting workflow including preparation, execution, and follow-up tasks",
            &["meetings", "collaboration", "project_management"],
            &[
                "Prepared meeting agenda and distributed to attendees",
                "Reviewed project status and compiled progress updates",
                "Facilitated team discussion on quarterly objectives",
                "Documented key decisions and action items",
                "Created follow-up task assignments in project management tool",
                "Sent meeting summary and next steps to all participants",
            ],
        ),
    ]
}

/// Builds plausible workflow results from templates when no real one is available.
#[derive(Debug, Clone)]
pub struct WorkflowSynthesizer {
    templates: Vec<WorkflowTemplate>,
}

impl Default for WorkflowSynthesizer {
    fn default() -> Self {
        Self::new(builtin_templates())
    }
}

impl WorkflowSynthesizer {
    pub fn new(templates: Vec<WorkflowTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[WorkflowTemplate] {
        &self.templates
    }

    pub fn synthesize(
        &self,
        rng: &SelectionRng,
        collection: &CollectionRef,
    ) -> Result<WorkflowResult, FallbackExhaustedError> {
        let template = rng
            .choose(&self.templates)
            .ok_or_else(|| FallbackExhaustedError {
                reason: "no workflow templates configured".to_owned(),
            })?;

        let workflow_id =
            WorkflowId::from_string(uuid::Builder::from_random_bytes(rng.bytes16()).into_uuid().to_string());
        let document_id = format!("workflow_{}", rng.between(1000, 9999));
        let days_ago = rng.between(1, 30) as i64;
        let duration_seconds = rng.between(180, 1800);
        let spacing = duration_seconds / template.steps.len().max(1) as u64;

        let steps = template
            .steps
            .iter()
            .enumerate()
            .map(|(i, action)| StepRecord {
                index: i as u32 + 1,
                action: action.clone(),
                timestamp_offset: i as u64 * spacing,
                confidence: rng.unit_between(0.85, 0.98),
                context: pick(rng, &STEP_CONTEXTS).to_owned(),
            })
            .collect::<Vec<_>>();

        let insights = vec![
            format!("Workflow demonstrates strong {} skills", pick(rng, &SKILLS)),
            format!("Efficient use of {}", pick(rng, &PRACTICES)),
            format!("Shows {}", pick(rng, &QUALITIES)),
            format!("Demonstrates {}", pick(rng, &PATTERNS)),
        ];

        let result = WorkflowResult {
            workflow_id,
            source: WorkflowSource::Synthesized,
            document_ref: collection.document_path(&document_id),
            title: template.title.clone(),
            summary: template.summary.clone(),
            duration_seconds,
            guide_markdown: Some(render_guide(&template.title, &template.summary, &steps)),
            steps,
            insights,
            productivity_score: rng.unit_between(0.75, 0.95),
            categories: template.categories.clone(),
            processed_at: Utc::now() - Duration::days(days_ago),
        };
        debug!(
            workflow_id = %result.workflow_id,
            title = %result.title,
            document_ref = %result.document_ref,
            "workflow synthesized"
        );
        Ok(result)
    }
}

fn pick<'a>(rng: &SelectionRng, options: &'a [&'a str]) -> &'a str {
    rng.choose(options).copied().unwrap_or_default()
}

fn render_guide(title: &str, summary: &str, steps: &[StepRecord]) -> String {
    let mut guide = format!("# {title}\n\n{summary}\n\n## Steps\n\n");
    for step in steps {
        guide.push_str(&format!(
            "{}. **{}** {}\n",
            step.index,
            format_offset(step.timestamp_offset),
            step.action
        ));
    }
    guide
}
