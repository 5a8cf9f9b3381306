//! The journey runner: walks a journey's steps, checkpoints, and branches,
//! producing a [`JourneyResult`]. Never raises on a user step's failure —
//! failures are captured as [`Issue`]s and `StepResult`s, mirroring
//! `runner/journey_runner.py`'s "the runner itself never raises for step
//! failures, only for programming errors" contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::action::ActionResolver;
use crate::context::ExecutionContext;
use crate::errors::{ErrorContext, VenomError, VenomResult};
use crate::http::HttpCapability;
use crate::issue::{self, IssueFormatter};
use crate::model::{
    ActionRef, Branch, BranchResult, Checkpoint, Issue, Journey, JourneyItem, Path, PathItem, PathResult, Severity,
    Step, StepResult,
};
use crate::resilience::timeout::with_timeout;
use crate::state::StateManager;

/// Runner-wide behavior knobs (spec §4.1 "a configuration (`fail_fast`,
/// `capture_logs`)").
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerConfig {
    /// Halt the walk at the first failing step rather than continuing.
    pub fail_fast: bool,
    /// Reserved for a future log-capture integration; currently only
    /// controls whether `StepResult`-adjacent log lines are collected into
    /// issues, which this crate's reference actions never populate.
    pub capture_logs: bool,
}

/// Executes one journey at a time against an injected HTTP capability and
/// an optional state manager. Holds no journey-specific state itself, so
/// one runner can be reused across invocations (the load engine gives each
/// worker its own runner instance instead — spec §5).
pub struct JourneyRunner {
    http: Arc<dyn HttpCapability>,
    state: Option<Arc<Mutex<dyn StateManager>>>,
    resolver: Option<Arc<dyn ActionResolver>>,
    config: RunnerConfig,
}

impl JourneyRunner {
    pub fn new(http: Arc<dyn HttpCapability>, state: Option<Arc<Mutex<dyn StateManager>>>, config: RunnerConfig) -> Self {
        Self { http, state, resolver: None, config }
    }

    /// Attaches an `ActionResolver` so steps built with [`Step::named`] can
    /// be resolved at execution time (spec §6). Steps built with
    /// [`Step::new`] never consult it.
    pub fn with_resolver(mut self, resolver: Arc<dyn ActionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn execute(&self, journey: &Journey) -> JourneyResultBuild {
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        if let Some(state) = &self.state {
            let mut state = state.lock().await;
            if !state.is_connected() {
                if let Err(err) = state.connect().await {
                    tracing::warn!(journey = %journey.name, error = %err, "state manager failed to connect");
                }
            }
        }

        let mut ctx = ExecutionContext::new();
        let mut step_results = Vec::new();
        let mut branch_results = Vec::new();
        let mut issues = IssueFormatter::new();
        let mut halted = false;
        let mut timed_out = false;

        for (idx, item) in journey.items.iter().enumerate() {
            if let Some(budget) = journey.timeout {
                if start.elapsed() >= budget {
                    issues.add_issue(
                        &journey.name,
                        None,
                        None,
                        format!("journey exceeded its {budget:?} timeout"),
                        Severity::Critical,
                        None,
                        vec![],
                    );
                    timed_out = true;
                    break;
                }
            }

            if halted {
                break;
            }

            match item {
                JourneyItem::Step(step) => {
                    let result = self.execute_step(&journey.name, None, step, &mut ctx, &mut issues).await;
                    let failed = !result.success;
                    step_results.push(result);
                    if failed && self.config.fail_fast {
                        halted = true;
                    }
                }
                JourneyItem::Checkpoint(checkpoint) => {
                    if let Err(err) = self.checkpoint(checkpoint).await {
                        issues.add_issue(
                            &journey.name,
                            None,
                            None,
                            err.to_string(),
                            Severity::Critical,
                            None,
                            vec![],
                        );
                        if self.config.fail_fast {
                            halted = true;
                        }
                    }
                }
                JourneyItem::Branch(branch) => {
                    let has_more = idx + 1 < journey.items.len();
                    let result = self
                        .execute_branch(&journey.name, branch, &ctx, &mut issues, has_more)
                        .await;
                    if !result.all_passed && self.config.fail_fast {
                        halted = true;
                    }
                    branch_results.push(result);
                }
            }
        }

        let finished_at = chrono::Utc::now();
        let no_critical_issues = issues.issues().iter().all(|i| i.severity < Severity::High);
        let all_branches_passed = branch_results.iter().all(|b| b.all_passed);
        let success = !timed_out && no_critical_issues && all_branches_passed;

        JourneyResultBuild {
            result: crate::model::JourneyResult {
                journey_name: journey.name.clone(),
                success,
                started_at,
                finished_at,
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                step_results,
                branch_results,
                issues: issues.issues().to_vec(),
            },
        }
    }

    async fn checkpoint(&self, checkpoint: &Checkpoint) -> VenomResult<()> {
        let state = self.state.as_ref().ok_or_else(|| VenomError::StateNotConnected {
            context: ErrorContext::new(),
        })?;
        state.lock().await.checkpoint(&checkpoint.name).await
    }

    async fn rollback(&self, checkpoint_name: &str) -> VenomResult<()> {
        let state = self.state.as_ref().ok_or_else(|| VenomError::StateNotConnected {
            context: ErrorContext::new(),
        })?;
        state.lock().await.rollback(checkpoint_name).await
    }

    async fn execute_branch(
        &self,
        journey_name: &str,
        branch: &Branch,
        trunk_ctx: &ExecutionContext,
        issues: &mut IssueFormatter,
        rollback_after: bool,
    ) -> BranchResult {
        if self.state.is_none() {
            let path_results = branch
                .paths
                .iter()
                .map(|p| PathResult {
                    path_name: p.name.clone(),
                    success: false,
                    step_results: vec![],
                    error: Some("no state manager configured; branch skipped".to_string()),
                })
                .collect();
            issues.add_issue(
                journey_name,
                None,
                None,
                format!("branch at checkpoint '{}' skipped: no state manager configured", branch.checkpoint_name),
                Severity::Critical,
                None,
                vec![],
            );
            return BranchResult::new(branch.checkpoint_name.clone(), path_results);
        }

        let mut path_results = Vec::with_capacity(branch.paths.len());

        for path in &branch.paths {
            if let Err(err) = self.rollback(&branch.checkpoint_name).await {
                issues.add_issue(
                    journey_name,
                    Some(path.name.clone()),
                    None,
                    err.to_string(),
                    Severity::Critical,
                    None,
                    vec![],
                );
                path_results.push(PathResult {
                    path_name: path.name.clone(),
                    success: false,
                    step_results: vec![],
                    error: Some(err.to_string()),
                });
                continue;
            }

            path_results.push(self.execute_path(journey_name, path, trunk_ctx, issues).await);
        }

        if rollback_after {
            let _ = self.rollback(&branch.checkpoint_name).await;
        }

        BranchResult::new(branch.checkpoint_name.clone(), path_results)
    }

    async fn execute_path(
        &self,
        journey_name: &str,
        path: &Path,
        trunk_ctx: &ExecutionContext,
        issues: &mut IssueFormatter,
    ) -> PathResult {
        let mut path_ctx = trunk_ctx.fork();
        let mut step_results = Vec::new();
        let mut halted = false;

        for item in &path.steps {
            if halted {
                break;
            }
            match item {
                PathItem::Step(step) => {
                    let result = self
                        .execute_step(journey_name, Some(path.name.as_str()), step, &mut path_ctx, issues)
                        .await;
                    if !result.success && self.config.fail_fast {
                        halted = true;
                    }
                    step_results.push(result);
                }
                PathItem::Checkpoint(checkpoint) => {
                    if let Err(err) = self.checkpoint(checkpoint).await {
                        issues.add_issue(
                            journey_name,
                            Some(path.name.clone()),
                            None,
                            err.to_string(),
                            Severity::Critical,
                            None,
                            vec![],
                        );
                    }
                }
            }
        }

        let success = step_results.iter().all(|r| r.success);
        PathResult {
            path_name: path.name.clone(),
            success,
            step_results,
            error: None,
        }
    }

    async fn execute_step(
        &self,
        journey_name: &str,
        path_name: Option<&str>,
        step: &Step,
        ctx: &mut ExecutionContext,
        issues: &mut IssueFormatter,
    ) -> StepResult {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let before_len = self.http.history().len();

        // `step.retries` is informational only (spec §3) — actual retry
        // behavior belongs to the resilience stack's `RetryPolicy`, which a
        // caller's action can wrap itself in. The runner invokes the action
        // exactly once.
        let outcome = self.invoke_action(step, ctx).await;

        let history = self.http.history();
        let exchange = if history.len() > before_len { history.last() } else { None };

        let (raw_success, error_message) = match &outcome {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        let failure_status = exchange.map(|e| e.status >= 400).unwrap_or(false);
        let clean_success = raw_success && !failure_status;
        let success = if step.expect_failure { !clean_success } else { clean_success };

        let error = if success {
            None
        } else if let Some(msg) = &error_message {
            Some(msg.clone())
        } else if failure_status {
            Some(format!("request failed with status {}", exchange.map(|e| e.status).unwrap_or(0)))
        } else if step.expect_failure {
            Some(format!("step '{}' was expected to fail but succeeded", step.name))
        } else {
            None
        };

        if !success {
            issues.add_issue(
                journey_name,
                path_name.map(|p| p.to_string()),
                Some(step.name.clone()),
                error.clone().unwrap_or_else(|| "step failed".to_string()),
                Severity::High,
                exchange,
                vec![],
            );
        }

        if success {
            if let Ok(Some(value)) = &outcome {
                ctx.store_step_result(&step.name, value.clone());
            }
        }

        StepResult {
            step_name: step.name.clone(),
            success,
            started_at,
            finished_at: chrono::Utc::now(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            response: exchange.map(issue::response_summary),
            error,
            request: exchange.map(issue::request_summary),
        }
    }

    async fn invoke_action(&self, step: &Step, ctx: &mut ExecutionContext) -> VenomResult<Option<serde_json::Value>> {
        let action = self.resolve_action(step).await?;
        let http = self.http.clone();
        match step.timeout {
            Some(budget) => {
                with_timeout(budget, &step.name, async { action.call(http.as_ref(), ctx).await }).await
            }
            None => action.call(http.as_ref(), ctx).await,
        }
    }

    /// Resolves `step.action` to a callable: a direct action is returned
    /// as-is, a named one is looked up through the runner's configured
    /// `ActionResolver` (spec §6 "the resolver is injected into the runner
    /// — no hidden global dependency in the core").
    async fn resolve_action(&self, step: &Step) -> VenomResult<Arc<dyn crate::action::ActionFn>> {
        match &step.action {
            ActionRef::Direct(action) => Ok(action.clone()),
            ActionRef::Named(name) => {
                let resolver = self.resolver.as_ref().ok_or_else(|| VenomError::StepValidation {
                    message: format!("step '{}' names action '{name}' but no ActionResolver was configured", step.name),
                    context: ErrorContext::new(),
                })?;
                resolver.resolve(name).await
            }
        }
    }
}

/// Thin wrapper so callers can `.into_inner()` without this module
/// importing `crate::model::JourneyResult` under a name that shadows the
/// local builder's own vocabulary.
pub struct JourneyResultBuild {
    result: crate::model::JourneyResult,
}

impl JourneyResultBuild {
    pub fn into_inner(self) -> crate::model::JourneyResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::test_support::{failing_action, noop_action};
    use crate::http::ReqwestHttpClient;
    use crate::model::{JourneyItem, Step};
    use crate::state::InMemoryStateManager;

    fn runner() -> JourneyRunner {
        JourneyRunner::new(Arc::new(ReqwestHttpClient::new()), None, RunnerConfig::default())
    }

    fn runner_with_state() -> JourneyRunner {
        let state = InMemoryStateManager::new();
        JourneyRunner::new(
            Arc::new(ReqwestHttpClient::new()),
            Some(Arc::new(Mutex::new(state))),
            RunnerConfig::default(),
        )
    }

    #[tokio::test]
    async fn all_passing_steps_yields_success() {
        let journey = Journey::new(
            "j",
            vec![
                JourneyItem::Step(Step::new("a", noop_action())),
                JourneyItem::Step(Step::new("b", noop_action())),
            ],
        )
        .unwrap();

        let result = runner().execute(&journey).await.into_inner();
        assert!(result.success);
        assert_eq!(result.total_steps(), 2);
        assert_eq!(result.passed_steps(), 2);
    }

    #[tokio::test]
    async fn failing_step_marks_journey_as_failed() {
        let journey = Journey::new(
            "j",
            vec![JourneyItem::Step(Step::new("a", failing_action("boom")))],
        )
        .unwrap();

        let result = runner().execute(&journey).await.into_inner();
        assert!(!result.success);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn expect_failure_inverts_outcome() {
        let journey = Journey::new(
            "j",
            vec![JourneyItem::Step(
                Step::new("a", failing_action("boom")).expect_failure(true),
            )],
        )
        .unwrap();

        let result = runner().execute(&journey).await.into_inner();
        assert!(result.success);
        assert!(result.issues.is_empty());
    }

    #[tokio::test]
    async fn expect_failure_on_a_clean_success_counts_as_failure() {
        let journey = Journey::new(
            "j",
            vec![JourneyItem::Step(Step::new("a", noop_action()).expect_failure(true))],
        )
        .unwrap();

        let result = runner().execute(&journey).await.into_inner();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn fail_fast_halts_the_walk() {
        let journey = Journey::new(
            "j",
            vec![
                JourneyItem::Step(Step::new("a", failing_action("boom"))),
                JourneyItem::Step(Step::new("b", noop_action())),
            ],
        )
        .unwrap();

        let runner = JourneyRunner::new(
            Arc::new(ReqwestHttpClient::new()),
            None,
            RunnerConfig { fail_fast: true, capture_logs: false },
        );
        let result = runner.execute(&journey).await.into_inner();
        assert_eq!(result.step_results.len(), 1);
    }

    #[tokio::test]
    async fn branch_without_state_manager_is_reported_as_skipped() {
        let journey = Journey::new(
            "j",
            vec![
                JourneyItem::Checkpoint(Checkpoint::new("c1")),
                JourneyItem::Branch(Branch::new(
                    "c1",
                    vec![Path::new("p1", vec![PathItem::Step(Step::new("s1", noop_action()))])],
                )),
            ],
        )
        .unwrap();

        let result = runner().execute(&journey).await.into_inner();
        assert!(!result.success);
        assert_eq!(result.branch_results[0].path_results[0].success, false);
    }

    #[tokio::test]
    async fn branch_with_state_manager_runs_each_path_independently() {
        let journey = Journey::new(
            "j",
            vec![
                JourneyItem::Checkpoint(Checkpoint::new("c1")),
                JourneyItem::Branch(Branch::new(
                    "c1",
                    vec![
                        Path::new("p1", vec![PathItem::Step(Step::new("s1", noop_action()))]),
                        Path::new("p2", vec![PathItem::Step(Step::new("s2", noop_action()))]),
                    ],
                )),
            ],
        )
        .unwrap();

        let result = runner_with_state().execute(&journey).await.into_inner();
        assert!(result.success);
        assert_eq!(result.total_paths(), 2);
        assert_eq!(result.passed_paths(), 2);
    }

    #[tokio::test]
    async fn journey_timeout_halts_remaining_items_and_is_reported() {
        let journey = Journey::new(
            "j",
            vec![
                JourneyItem::Step(Step::new("a", noop_action())),
                JourneyItem::Step(Step::new("b", noop_action())),
            ],
        )
        .unwrap()
        .with_timeout(Duration::from_nanos(1));

        let result = runner().execute(&journey).await.into_inner();
        assert!(!result.success);
        assert!(result.issues.iter().any(|i| i.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn named_action_resolves_through_the_configured_resolver() {
        use crate::action::DictActionResolver;

        let resolver = Arc::new(DictActionResolver::new());
        resolver.register("ping", noop_action());

        let runner = JourneyRunner::new(Arc::new(ReqwestHttpClient::new()), None, RunnerConfig::default())
            .with_resolver(resolver);

        let journey = Journey::new("j", vec![JourneyItem::Step(Step::named("a", "ping"))]).unwrap();
        let result = runner.execute(&journey).await.into_inner();
        assert!(result.success);
    }

    #[tokio::test]
    async fn named_action_without_a_resolver_fails_the_step() {
        let journey = Journey::new("j", vec![JourneyItem::Step(Step::named("a", "ping"))]).unwrap();
        let result = runner().execute(&journey).await.into_inner();
        assert!(!result.success);
        assert_eq!(result.issues.len(), 1);
    }
}
