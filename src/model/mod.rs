//! Journey data model: steps, checkpoints, branches, paths, and the result
//! records the runner produces. Grounded on the journey/step/branch
//! dataclasses of the original VenomQA, expressed as a tagged enum
//! (`JourneyItem`) instead of a loose `list[Step | Checkpoint | Branch]`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::action::ActionFn;
use crate::errors::{ErrorContext, VenomError};

/// Severity of an [`Issue`]. Ordered so `Critical > High > Medium > Low >
/// Info`, matching the "success iff no issue of severity >= high" rule in
/// §8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A step's action: a direct callable, or a name resolved at execution time
/// through an `ActionResolver` the runner was constructed with (spec §6
/// "a step's `action` is either a direct callable ... or a string name
/// resolved through an `ActionResolver`").
#[derive(Clone)]
pub enum ActionRef {
    Direct(Arc<dyn ActionFn>),
    Named(String),
}

/// A single named action invocation within a journey or path.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub action: ActionRef,
    pub description: Option<String>,
    pub expect_failure: bool,
    pub timeout: Option<std::time::Duration>,
    pub retries: u32,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("expect_failure", &self.expect_failure)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

impl Step {
    /// A step bound directly to a callable.
    pub fn new(name: impl Into<String>, action: Arc<dyn ActionFn>) -> Self {
        Self {
            name: name.into(),
            action: ActionRef::Direct(action),
            description: None,
            expect_failure: false,
            timeout: None,
            retries: 0,
        }
    }

    /// A step whose action is a registry name, resolved by whichever
    /// `ActionResolver` the runner was built with (spec §6).
    pub fn named(name: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: ActionRef::Named(action_name.into()),
            description: None,
            expect_failure: false,
            timeout: None,
            retries: 0,
        }
    }

    pub fn expect_failure(mut self, value: bool) -> Self {
        self.expect_failure = value;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Named savepoint marker. The runner calls `state.checkpoint(name)` when it
/// reaches one of these.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Named alternative continuation from a checkpoint.
#[derive(Clone)]
pub struct Path {
    pub name: String,
    pub steps: Vec<PathItem>,
    pub description: Option<String>,
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("description", &self.description)
            .finish()
    }
}

impl Path {
    pub fn new(name: impl Into<String>, steps: Vec<PathItem>) -> Self {
        Self {
            name: name.into(),
            steps,
            description: None,
        }
    }
}

/// A path may contain steps or nested checkpoints, but never a branch
/// (branches are flat within a journey — spec §3).
#[derive(Clone, Debug)]
pub enum PathItem {
    Step(Step),
    Checkpoint(Checkpoint),
}

/// Fan-out from a checkpoint into one or more independent paths.
#[derive(Clone, Debug)]
pub struct Branch {
    pub checkpoint_name: String,
    pub paths: Vec<Path>,
}

impl Branch {
    pub fn new(checkpoint_name: impl Into<String>, paths: Vec<Path>) -> Self {
        Self {
            checkpoint_name: checkpoint_name.into(),
            paths,
        }
    }
}

/// One item of a journey's top-level sequence.
#[derive(Clone, Debug)]
pub enum JourneyItem {
    Step(Step),
    Checkpoint(Checkpoint),
    Branch(Branch),
}

/// Ordered sequence of steps, checkpoints, and branches, validated at
/// construction time. Immutable once built (spec §3 "Ownership/lifetime").
#[derive(Clone, Debug)]
pub struct Journey {
    pub name: String,
    pub items: Vec<JourneyItem>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub timeout: Option<std::time::Duration>,
}

impl Journey {
    /// Construct a journey, enforcing the three invariants from spec §3:
    /// every branch references an earlier checkpoint, step names are unique
    /// within their enclosing sequence, and checkpoint names are unique
    /// across the whole journey.
    pub fn new(name: impl Into<String>, items: Vec<JourneyItem>) -> Result<Self, VenomError> {
        let name = name.into();
        Self::validate_checkpoints(&items)?;
        Self::validate_step_uniqueness(&items)?;
        Self::validate_checkpoint_uniqueness(&items)?;
        Ok(Self {
            name,
            items,
            description: None,
            tags: Vec::new(),
            timeout: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate_checkpoints(items: &[JourneyItem]) -> Result<(), VenomError> {
        let mut seen = std::collections::HashSet::new();
        for item in items {
            match item {
                JourneyItem::Checkpoint(c) => {
                    seen.insert(c.name.clone());
                }
                JourneyItem::Branch(b) => {
                    if !seen.contains(&b.checkpoint_name) {
                        return Err(VenomError::JourneyValidation {
                            message: format!(
                                "branch references unknown checkpoint '{}'",
                                b.checkpoint_name
                            ),
                            context: ErrorContext::new(),
                        });
                    }
                }
                JourneyItem::Step(_) => {}
            }
        }
        Ok(())
    }

    fn validate_step_uniqueness(items: &[JourneyItem]) -> Result<(), VenomError> {
        let mut seen = std::collections::HashSet::new();
        for item in items {
            if let JourneyItem::Step(s) = item {
                if !seen.insert(s.name.clone()) {
                    return Err(VenomError::JourneyValidation {
                        message: format!("duplicate step name '{}'", s.name),
                        context: ErrorContext::new(),
                    });
                }
            }
        }
        for item in items {
            if let JourneyItem::Branch(b) = item {
                for path in &b.paths {
                    let mut path_seen = std::collections::HashSet::new();
                    for path_item in &path.steps {
                        if let PathItem::Step(s) = path_item {
                            if !path_seen.insert(s.name.clone()) {
                                return Err(VenomError::JourneyValidation {
                                    message: format!(
                                        "duplicate step name '{}' in path '{}'",
                                        s.name, path.name
                                    ),
                                    context: ErrorContext::new(),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checkpoint names are unique across the *whole* journey (spec §3),
    /// not just its top-level sequence — a checkpoint nested inside a
    /// path's own sub-sequence (spec §3: a Path contains "a list of Steps
    /// (and nested Checkpoints)") shares the same name space, since the
    /// state manager keys savepoints by name regardless of where in the
    /// journey they were reached.
    fn validate_checkpoint_uniqueness(items: &[JourneyItem]) -> Result<(), VenomError> {
        let mut seen = std::collections::HashSet::new();
        for item in items {
            match item {
                JourneyItem::Checkpoint(c) => {
                    if !seen.insert(c.name.clone()) {
                        return Err(VenomError::JourneyValidation {
                            message: format!("duplicate checkpoint name '{}'", c.name),
                            context: ErrorContext::new(),
                        });
                    }
                }
                JourneyItem::Branch(b) => {
                    for path in &b.paths {
                        for path_item in &path.steps {
                            if let PathItem::Checkpoint(c) = path_item {
                                if !seen.insert(c.name.clone()) {
                                    return Err(VenomError::JourneyValidation {
                                        message: format!(
                                            "duplicate checkpoint name '{}' in path '{}'",
                                            c.name, path.name
                                        ),
                                        context: ErrorContext::new(),
                                    });
                                }
                            }
                        }
                    }
                }
                JourneyItem::Step(_) => {}
            }
        }
        Ok(())
    }
}

// ============================================================================
// Result records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: f64,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    pub path_name: String,
    pub success: bool,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub checkpoint_name: String,
    pub path_results: Vec<PathResult>,
    pub all_passed: bool,
}

impl BranchResult {
    pub fn new(checkpoint_name: impl Into<String>, path_results: Vec<PathResult>) -> Self {
        let all_passed = path_results.iter().all(|r| r.success);
        Self {
            checkpoint_name: checkpoint_name.into(),
            path_results,
            all_passed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub journey: String,
    pub path: Option<String>,
    pub step: Option<String>,
    pub error: String,
    pub severity: Severity,
    pub request: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    pub logs: Vec<String>,
    pub suggestion: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyResult {
    pub journey_name: String,
    pub success: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: f64,
    pub step_results: Vec<StepResult>,
    pub branch_results: Vec<BranchResult>,
    pub issues: Vec<Issue>,
}

impl JourneyResult {
    pub fn total_steps(&self) -> usize {
        self.step_results.len()
    }

    pub fn passed_steps(&self) -> usize {
        self.step_results.iter().filter(|r| r.success).count()
    }

    pub fn total_paths(&self) -> usize {
        self.branch_results
            .iter()
            .map(|b| b.path_results.len())
            .sum()
    }

    pub fn passed_paths(&self) -> usize {
        self.branch_results
            .iter()
            .flat_map(|b| b.path_results.iter())
            .filter(|p| p.success)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::test_support::noop_action;

    #[test]
    fn branch_referencing_unknown_checkpoint_rejected() {
        let branch = JourneyItem::Branch(Branch::new("missing", vec![]));
        let result = Journey::new("j", vec![branch]);
        assert!(result.is_err());
    }

    #[test]
    fn branch_referencing_prior_checkpoint_accepted() {
        let items = vec![
            JourneyItem::Checkpoint(Checkpoint::new("c1")),
            JourneyItem::Branch(Branch::new("c1", vec![Path::new("p1", vec![])])),
        ];
        assert!(Journey::new("j", items).is_ok());
    }

    #[test]
    fn duplicate_step_names_rejected() {
        let items = vec![
            JourneyItem::Step(Step::new("s1", noop_action())),
            JourneyItem::Step(Step::new("s1", noop_action())),
        ];
        assert!(Journey::new("j", items).is_err());
    }

    #[test]
    fn duplicate_checkpoint_names_rejected() {
        let items = vec![
            JourneyItem::Checkpoint(Checkpoint::new("c1")),
            JourneyItem::Checkpoint(Checkpoint::new("c1")),
        ];
        assert!(Journey::new("j", items).is_err());
    }

    #[test]
    fn duplicate_checkpoint_name_nested_in_a_path_is_rejected() {
        let items = vec![
            JourneyItem::Checkpoint(Checkpoint::new("c1")),
            JourneyItem::Branch(Branch::new(
                "c1",
                vec![Path::new("p1", vec![PathItem::Checkpoint(Checkpoint::new("c1"))])],
            )),
        ];
        assert!(Journey::new("j", items).is_err());
    }

    #[test]
    fn severity_ordering_high_above_medium() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn derived_counts_from_results() {
        let result = JourneyResult {
            journey_name: "j".into(),
            success: true,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            duration_ms: 1.0,
            step_results: vec![
                StepResult {
                    step_name: "a".into(),
                    success: true,
                    started_at: chrono::Utc::now(),
                    finished_at: chrono::Utc::now(),
                    duration_ms: 1.0,
                    response: None,
                    error: None,
                    request: None,
                },
                StepResult {
                    step_name: "b".into(),
                    success: false,
                    started_at: chrono::Utc::now(),
                    finished_at: chrono::Utc::now(),
                    duration_ms: 1.0,
                    response: None,
                    error: Some("boom".into()),
                    request: None,
                },
            ],
            branch_results: vec![],
            issues: vec![],
        };
        assert_eq!(result.total_steps(), 2);
        assert_eq!(result.passed_steps(), 1);
    }
}
