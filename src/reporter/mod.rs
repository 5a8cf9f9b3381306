//! The in-tree reference reporter (spec §5 "Reporter coupling": "ship one
//! reference JSON reporter in-tree and treat the others as additive").
//! Everything else (Markdown/JUnit/HTML/SARIF/Slack/Discord) is out of
//! scope — the core only guarantees the [`JourneyResult`] record schema
//! those formats would consume.
//!
//! Grounded on the original `JSONReporter`: a `report`/`summary`/`journeys`
//! envelope around the same per-journey, per-step, per-branch, per-issue
//! fields, reshaped from hand-built dicts into `#[derive(Serialize,
//! Deserialize)]` structs so the output is round-trippable (spec §8 "JSON
//! reporter round-trip: parsing its output reconstructs the record-level
//! fields defined in §3").

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorContext, VenomError, VenomResult};
use crate::model::JourneyResult;

/// Top-level envelope produced by [`JsonReporter::generate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub summary: ReportSummary,
    pub journeys: Vec<JourneyResult>,
}

/// Aggregate counters across every journey in the report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_journeys: usize,
    pub passed_journeys: usize,
    pub failed_journeys: usize,
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub total_paths: usize,
    pub passed_paths: usize,
    pub failed_paths: usize,
    pub total_issues: usize,
    pub total_duration_ms: f64,
    pub success_rate_pct: f64,
}

impl ReportSummary {
    fn from_results(results: &[JourneyResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.success).count();
        let total_steps: usize = results.iter().map(|r| r.total_steps()).sum();
        let passed_steps: usize = results.iter().map(|r| r.passed_steps()).sum();
        let total_paths: usize = results.iter().map(|r| r.total_paths()).sum();
        let passed_paths: usize = results.iter().map(|r| r.passed_paths()).sum();
        let total_issues: usize = results.iter().map(|r| r.issues.len()).sum();
        let total_duration_ms: f64 = results.iter().map(|r| r.duration_ms).sum();

        Self {
            total_journeys: total,
            passed_journeys: passed,
            failed_journeys: total - passed,
            total_steps,
            passed_steps,
            failed_steps: total_steps - passed_steps,
            total_paths,
            passed_paths,
            failed_paths: total_paths - passed_paths,
            total_issues,
            total_duration_ms,
            success_rate_pct: if total > 0 {
                passed as f64 / total as f64 * 100.0
            } else {
                100.0
            },
        }
    }
}

/// Reference reporter: takes journey results in, produces the stable JSON
/// schema out. Stateless beyond the `indent` setting.
#[derive(Debug, Clone, Copy)]
pub struct JsonReporter {
    pub pretty: bool,
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonReporter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Builds the envelope without serializing it, for callers that want
    /// the structured form directly.
    pub fn build_report(&self, results: &[JourneyResult]) -> Report {
        Report {
            generated_at: chrono::Utc::now(),
            version: "1.0".to_string(),
            summary: ReportSummary::from_results(results),
            journeys: results.to_vec(),
        }
    }

    /// Serializes `results` to the stable JSON schema, pretty-printed or
    /// compact per [`Self::pretty`].
    pub fn generate(&self, results: &[JourneyResult]) -> VenomResult<String> {
        let report = self.build_report(results);
        let serialize = |report: &Report| {
            if self.pretty {
                serde_json::to_string_pretty(report)
            } else {
                serde_json::to_string(report)
            }
        };
        serialize(&report).map_err(|e| VenomError::ConfigValidation {
            message: format!("failed to serialize report: {e}"),
            context: ErrorContext::new(),
        })
    }

    /// Parses a previously generated report back into its structured form.
    pub fn parse(raw: &str) -> VenomResult<Report> {
        serde_json::from_str(raw).map_err(|e| VenomError::ConfigValidation {
            message: format!("failed to parse report: {e}"),
            context: ErrorContext::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchResult, Issue, PathResult, Severity, StepResult};

    fn sample_results() -> Vec<JourneyResult> {
        let now = chrono::Utc::now();
        vec![
            JourneyResult {
                journey_name: "checkout".to_string(),
                success: true,
                started_at: now,
                finished_at: now,
                duration_ms: 120.5,
                step_results: vec![StepResult {
                    step_name: "login".to_string(),
                    success: true,
                    started_at: now,
                    finished_at: now,
                    duration_ms: 40.0,
                    response: Some(serde_json::json!({"status": 200})),
                    error: None,
                    request: Some(serde_json::json!({"method": "POST"})),
                }],
                branch_results: vec![BranchResult::new(
                    "after_login",
                    vec![PathResult {
                        path_name: "happy_path".to_string(),
                        success: true,
                        step_results: vec![],
                        error: None,
                    }],
                )],
                issues: vec![],
            },
            JourneyResult {
                journey_name: "refund".to_string(),
                success: false,
                started_at: now,
                finished_at: now,
                duration_ms: 80.0,
                step_results: vec![],
                branch_results: vec![],
                issues: vec![Issue {
                    journey: "refund".to_string(),
                    path: None,
                    step: Some("issue_refund".to_string()),
                    error: "expected 200, got 500".to_string(),
                    severity: Severity::Critical,
                    request: None,
                    response: None,
                    logs: vec![],
                    suggestion: "check upstream service health".to_string(),
                    timestamp: now,
                }],
            },
        ]
    }

    #[test]
    fn summary_counts_match_the_input_results() {
        let reporter = JsonReporter::default();
        let report = reporter.build_report(&sample_results());

        assert_eq!(report.summary.total_journeys, 2);
        assert_eq!(report.summary.passed_journeys, 1);
        assert_eq!(report.summary.failed_journeys, 1);
        assert_eq!(report.summary.total_steps, 1);
        assert_eq!(report.summary.passed_steps, 1);
        assert_eq!(report.summary.total_paths, 1);
        assert_eq!(report.summary.passed_paths, 1);
        assert_eq!(report.summary.total_issues, 1);
        assert_eq!(report.summary.success_rate_pct, 50.0);
    }

    #[test]
    fn summary_success_rate_is_100_pct_on_empty_input() {
        let reporter = JsonReporter::default();
        let report = reporter.build_report(&[]);
        assert_eq!(report.summary.success_rate_pct, 100.0);
        assert_eq!(report.summary.total_journeys, 0);
    }

    #[test]
    fn generated_json_round_trips_through_parse() {
        let reporter = JsonReporter::default();
        let results = sample_results();
        let raw = reporter.generate(&results).unwrap();

        let parsed = JsonReporter::parse(&raw).unwrap();
        assert_eq!(parsed.journeys.len(), results.len());
        assert_eq!(parsed.journeys[0].journey_name, "checkout");
        assert_eq!(parsed.journeys[1].issues[0].error, "expected 200, got 500");
        assert_eq!(parsed.summary.total_journeys, 2);
    }

    #[test]
    fn compact_mode_produces_single_line_output() {
        let reporter = JsonReporter::new(false);
        let raw = reporter.generate(&sample_results()).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert!(JsonReporter::parse("{not valid json").is_err());
    }
}
