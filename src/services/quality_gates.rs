//! Quality gates bound to phase transitions.
//!
//! Blocking gates of a transition run concurrently before the commit and all
//! of their outcomes are collected. Async gates run on a spawned task after
//! the commit; their outcomes go to a bounded observation log and never touch
//! the manifest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{GateConfig, GateKind, GateOutcome, Phase, ProjectManifest};
use crate::domain::ports::{CheckVerdict, GateContext, QualityCheck};
use crate::services::command_runner::run_shell;

/// Passes when the manifest holds the named artifact.
pub struct ArtifactPresentCheck {
    artifact: String,
}

impl ArtifactPresentCheck {
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
        }
    }
}

#[async_trait]
impl QualityCheck for ArtifactPresentCheck {
    async fn check(&self, ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
        Ok(if ctx.manifest.has_artifact(&self.artifact) {
            CheckVerdict::pass()
        } else {
            CheckVerdict::fail(format!("artifact '{}' missing", self.artifact))
        })
    }
}

/// Passes when at least `min_remaining_ratio` of the budget is unspent.
pub struct BudgetHeadroomCheck {
    min_remaining_ratio: f64,
}

impl BudgetHeadroomCheck {
    pub fn new(min_remaining_ratio: f64) -> Self {
        Self { min_remaining_ratio }
    }
}

#[async_trait]
impl QualityCheck for BudgetHeadroomCheck {
    async fn check(&self, ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
        let budget = ctx.manifest.budget();
        let remaining_ratio = if budget.max_cost > 0.0 {
            budget.remaining() / budget.max_cost
        } else {
            0.0
        };
        Ok(if remaining_ratio >= self.min_remaining_ratio {
            CheckVerdict::pass()
        } else {
            CheckVerdict::fail(format!(
                "{:.1}% of budget left, need {:.1}%",
                remaining_ratio * 100.0,
                self.min_remaining_ratio * 100.0
            ))
        })
    }
}

/// Passes when a shell command exits zero within its timeout.
pub struct CommandCheck {
    command: String,
    timeout: Duration,
}

impl CommandCheck {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl QualityCheck for CommandCheck {
    async fn check(&self, _ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
        let outcome = run_shell(&self.command, self.timeout).await?;
        Ok(if outcome.success {
            CheckVerdict::pass()
        } else {
            CheckVerdict::fail(format!("`{}`: {}", self.command, outcome.summary()))
        })
    }
}

/// A named check bound to one transition.
#[derive(Clone)]
pub struct QualityGate {
    pub id: String,
    pub blocking: bool,
    pub from: Phase,
    pub to: Phase,
    check: Arc<dyn QualityCheck>,
}

impl QualityGate {
    pub fn new(
        id: impl Into<String>,
        from: Phase,
        to: Phase,
        blocking: bool,
        check: Arc<dyn QualityCheck>,
    ) -> Self {
        Self {
            id: id.into(),
            blocking,
            from,
            to,
            check,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        let check: Arc<dyn QualityCheck> = match &config.kind {
            GateKind::ArtifactPresent { artifact } => Arc::new(ArtifactPresentCheck::new(artifact.clone())),
            GateKind::BudgetHeadroom { min_remaining_ratio } => {
                Arc::new(BudgetHeadroomCheck::new(*min_remaining_ratio))
            }
            GateKind::Command {
                command,
                timeout_secs,
            } => Arc::new(CommandCheck::new(command.clone(), Duration::from_secs(*timeout_secs))),
        };
        Self::new(config.id.clone(), config.from, config.to, config.blocking, check)
    }

    pub fn applies_to(&self, from: Phase, to: Phase) -> bool {
        self.from == from && self.to == to
    }

    /// Run the check. A check that errors counts as failed.
    pub async fn evaluate(&self, manifest: &ProjectManifest) -> GateOutcome {
        let start = Instant::now();
        let ctx = GateContext {
            from: self.from,
            to: self.to,
            manifest,
        };
        let verdict = self
            .check
            .check(ctx)
            .await
            .unwrap_or_else(|e| CheckVerdict::fail(format!("check errored: {e}")));
        GateOutcome {
            gate_id: self.id.clone(),
            blocking: self.blocking,
            passed: verdict.passed,
            detail: verdict.detail,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// All configured gates.
#[derive(Clone, Default)]
pub struct GateSet {
    gates: Vec<QualityGate>,
}

impl GateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[GateConfig]) -> Self {
        Self {
            gates: configs.iter().map(QualityGate::from_config).collect(),
        }
    }

    pub fn with(mut self, gate: QualityGate) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    fn matching(&self, from: Phase, to: Phase, blocking: bool) -> Vec<QualityGate> {
        self.gates
            .iter()
            .filter(|g| g.applies_to(from, to) && g.blocking == blocking)
            .cloned()
            .collect()
    }

    pub fn async_gates(&self, from: Phase, to: Phase) -> Vec<QualityGate> {
        self.matching(from, to, false)
    }

    /// Evaluate every blocking gate of `from -> to` against the staged manifest.
    pub async fn run_blocking(&self, from: Phase, to: Phase, staged: &ProjectManifest) -> Vec<GateOutcome> {
        let gates = self.matching(from, to, true);
        let outcomes = join_all(gates.iter().map(|g| g.evaluate(staged))).await;
        for outcome in &outcomes {
            debug!(gate = %outcome.gate_id, passed = outcome.passed, "Blocking gate evaluated");
        }
        outcomes
    }
}

/// One async gate outcome, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateObservation {
    pub project_id: Uuid,
    pub from: Phase,
    pub to: Phase,
    pub outcome: GateOutcome,
    pub observed_at: DateTime<Utc>,
}

/// Runs async gates off the critical path and keeps the latest outcomes.
pub struct GateObserver {
    log: Arc<Mutex<VecDeque<GateObservation>>>,
    capacity: usize,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl GateObserver {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Evaluate `gates` against the committed manifest on a background task.
    pub fn spawn(&self, gates: Vec<QualityGate>, manifest: ProjectManifest) {
        if gates.is_empty() {
            return;
        }
        let log = Arc::clone(&self.log);
        let capacity = self.capacity;
        let handle = tokio::spawn(async move {
            for gate in gates {
                let outcome = gate.evaluate(&manifest).await;
                if !outcome.passed {
                    warn!(
                        project_id = %manifest.project_id(),
                        gate = %outcome.gate_id,
                        detail = outcome.detail.as_deref().unwrap_or(""),
                        "Async quality gate failed"
                    );
                }
                let observation = GateObservation {
                    project_id: manifest.project_id(),
                    from: gate.from,
                    to: gate.to,
                    outcome,
                    observed_at: Utc::now(),
                };
                push_bounded(&log, capacity, observation);
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Observations, oldest first.
    pub fn recent(&self) -> Vec<GateObservation> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Wait for every spawned evaluation to finish.
    pub async fn wait(&self) {
        let handles = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Async gate task panicked");
            }
        }
    }
}

fn push_bounded(log: &Mutex<VecDeque<GateObservation>>, capacity: usize, observation: GateObservation) {
    let mut log = log.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if log.len() == capacity {
        log.pop_front();
    }
    log.push_back(observation);
}

impl Default for GateObserver {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Budget;

    struct Always(bool);

    #[async_trait]
    impl QualityCheck for Always {
        async fn check(&self, _ctx: GateContext<'_>) -> DomainResult<CheckVerdict> {
            Ok(if self.0 {
                CheckVerdict::pass()
            } else {
                CheckVerdict::fail("configured to fail")
            })
        }
    }

    fn manifest() -> ProjectManifest {
        ProjectManifest::new(Uuid::new_v4(), "frank", Budget::new(10.0))
    }

    #[tokio::test]
    async fn test_only_matching_blocking_gates_run() {
        let gates = GateSet::new()
            .with(QualityGate::new("lint", Phase::Coding, Phase::Testing, true, Arc::new(Always(true))))
            .with(QualityGate::new("other", Phase::Testing, Phase::AwaitingQaApproval, true, Arc::new(Always(false))))
            .with(QualityGate::new("slow", Phase::Coding, Phase::Testing, false, Arc::new(Always(false))));

        let outcomes = gates.run_blocking(Phase::Coding, Phase::Testing, &manifest()).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].gate_id, "lint");
        assert!(outcomes[0].passed);
        assert_eq!(gates.async_gates(Phase::Coding, Phase::Testing).len(), 1);
    }

    #[tokio::test]
    async fn test_all_blocking_outcomes_are_collected() {
        let gates = GateSet::new()
            .with(QualityGate::new("a", Phase::Coding, Phase::Testing, true, Arc::new(Always(false))))
            .with(QualityGate::new("b", Phase::Coding, Phase::Testing, true, Arc::new(Always(false))));
        let outcomes = gates.run_blocking(Phase::Coding, Phase::Testing, &manifest()).await;
        assert_eq!(outcomes.iter().filter(|o| !o.passed).count(), 2);
    }

    #[tokio::test]
    async fn test_configured_checks() {
        let m = manifest();
        let present = ArtifactPresentCheck::new("plan");
        let ctx = GateContext {
            from: Phase::Planning,
            to: Phase::Coding,
            manifest: &m,
        };
        assert!(!present.check(ctx).await.unwrap().passed);
        assert!(BudgetHeadroomCheck::new(0.5).check(ctx).await.unwrap().passed);
        assert!(!CommandCheck::new("exit 2", Duration::from_secs(5))
            .check(ctx)
            .await
            .unwrap()
            .passed);
    }

    #[tokio::test]
    async fn test_observer_log_is_bounded() {
        let observer = GateObserver::new(2);
        let gates: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| QualityGate::new(id, Phase::Coding, Phase::Testing, false, Arc::new(Always(false))))
            .collect();
        observer.spawn(gates, manifest());
        observer.wait().await;

        let recent = observer.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome.gate_id, "b");
        assert_eq!(recent[1].outcome.gate_id, "c");
    }
}
