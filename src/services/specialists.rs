//! Built-in phase specialists.
//!
//! Prompt-driven specialists call the intelligence gateway and store the
//! reply as an artifact. Their spend goes on the context meter. None of them
//! writes a manifest.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ArtifactRef, Phase, SpecialistResult, SubState, TaskAction};
use crate::domain::ports::{ArtifactStore, IntelligenceRequest, Specialist, SpecialistContext};
use crate::services::command_runner::run_shell;
use crate::services::intelligence_gateway::IntelligenceGateway;
use crate::services::specialist_registry::SpecialistRegistry;

/// Gateway plus artifact store, shared by the prompt-driven specialists.
#[derive(Clone)]
pub struct PromptToolkit {
    gateway: Arc<IntelligenceGateway>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl PromptToolkit {
    pub fn new(gateway: Arc<IntelligenceGateway>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { gateway, artifacts }
    }

    /// One gateway call whose reply becomes artifact `name`. Returns the
    /// artifact and the reply. The spend is recorded on the context meter
    /// before anything else can fail.
    async fn produce(
        &self,
        ctx: &SpecialistContext,
        phase: Phase,
        name: &str,
        request: IntelligenceRequest,
    ) -> DomainResult<(ArtifactRef, String)> {
        let response = match self.gateway.invoke(&request, ctx.budget_remaining()).await {
            Ok(response) => response,
            Err(e) => {
                ctx.spend.record(e.spent());
                return Err(e.into_domain(phase));
            }
        };
        ctx.spend.record(response.cost);
        let artifact = self
            .artifacts
            .put(ctx.manifest.project_id(), name, response.content.as_bytes())
            .await?;
        debug!(artifact = name, cost = response.cost, "Artifact produced");
        Ok((artifact, response.content))
    }

    async fn store(&self, ctx: &SpecialistContext, name: &str, body: &str) -> DomainResult<ArtifactRef> {
        self.artifacts
            .put(ctx.manifest.project_id(), name, body.as_bytes())
            .await
    }
}

const SYSTEM_PROMPT: &str = "You are a senior engineer working one phase of a software delivery lifecycle. \
Answer with the requested document only.";

fn artifact_listing(ctx: &SpecialistContext) -> String {
    ctx.manifest
        .artifacts()
        .iter()
        .map(|(name, location)| format!("- {name}: {location}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Walks DISCOVERY -> REQUIREMENTS -> ARCHITECTURE -> TASK_BREAKDOWN, one
/// sub-state per step, and advances to CODING with the `plan` artifact.
pub struct PlanningSpecialist {
    toolkit: PromptToolkit,
}

impl PlanningSpecialist {
    pub fn new(toolkit: PromptToolkit) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl Specialist for PlanningSpecialist {
    fn name(&self) -> &'static str {
        "planning"
    }

    fn phase(&self) -> Phase {
        Phase::Planning
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        let sub_state = ctx.manifest.sub_state().unwrap_or(SubState::Discovery);
        let next = sub_state.next();
        let name = match next {
            Some(_) => sub_state.as_str().to_lowercase(),
            None => "plan".to_string(),
        };
        let request = IntelligenceRequest::new(format!(
            "Planning step {sub_state} for project {}.\nKnown artifacts:\n{}\nProduce the {} document.",
            ctx.manifest.project_id(),
            artifact_listing(ctx),
            name
        ))
        .with_system(SYSTEM_PROMPT);

        let (artifact, _) = self.toolkit.produce(ctx, Phase::Planning, &name, request).await?;
        Ok(match next {
            Some(next) => SpecialistResult::partial(vec![artifact]).with_sub_state(next),
            None => SpecialistResult::advance(Phase::Coding, vec![artifact]),
        })
    }
}

/// Turns the plan into a `code_bundle` and hands over to TESTING.
pub struct CodingSpecialist {
    toolkit: PromptToolkit,
}

impl CodingSpecialist {
    pub fn new(toolkit: PromptToolkit) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl Specialist for CodingSpecialist {
    fn name(&self) -> &'static str {
        "coding"
    }

    fn phase(&self) -> Phase {
        Phase::Coding
    }

    fn required_artifacts(&self) -> &'static [&'static str] {
        &["plan"]
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        let mut prompt = format!(
            "Implement the plan at {}.\nKnown artifacts:\n{}",
            ctx.manifest.latest_artifact("plan").unwrap_or_default(),
            artifact_listing(ctx)
        );
        if let Some(rejection) = ctx.manifest.latest_artifact("qa_rejection") {
            prompt.push_str(&format!("\nAddress the QA rejection recorded at {rejection}."));
        }
        if ctx.manifest.trajectory().repair_cycles > 0 {
            prompt.push_str(&format!(
                "\nThis is repair cycle {}; fix the failing tests in {}.",
                ctx.manifest.trajectory().repair_cycles,
                ctx.manifest.latest_artifact("test_report").unwrap_or("the last test report")
            ));
        }
        let request = IntelligenceRequest::new(prompt).with_system(SYSTEM_PROMPT);
        let (artifact, _) = self
            .toolkit
            .produce(ctx, Phase::Coding, "code_bundle", request)
            .await?;
        Ok(SpecialistResult::advance(Phase::Testing, vec![artifact]))
    }
}

/// Runs the configured test command. A failing run triggers the repair loop.
pub struct TestingSpecialist {
    toolkit: PromptToolkit,
    command: Option<String>,
    timeout: Duration,
}

impl TestingSpecialist {
    pub fn new(toolkit: PromptToolkit, command: Option<String>, timeout: Duration) -> Self {
        Self {
            toolkit,
            command,
            timeout,
        }
    }
}

#[async_trait]
impl Specialist for TestingSpecialist {
    fn name(&self) -> &'static str {
        "testing"
    }

    fn phase(&self) -> Phase {
        Phase::Testing
    }

    fn required_artifacts(&self) -> &'static [&'static str] {
        &["code_bundle"]
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        let Some(command) = &self.command else {
            info!("No test command configured, recording a skipped run");
            let report = self
                .toolkit
                .store(ctx, "test_report", "no test command configured; run skipped")
                .await?;
            return Ok(SpecialistResult::advance(Phase::AwaitingQaApproval, vec![report]));
        };

        let outcome = run_shell(command, self.timeout).await?;
        let body = format!("$ {command}\n{}\n\n{}", outcome.summary(), outcome.tail);
        let report = self.toolkit.store(ctx, "test_report", &body).await?;
        if outcome.success {
            Ok(SpecialistResult::advance(Phase::AwaitingQaApproval, vec![report]))
        } else {
            // The report is not merged on failure; its location goes into the error.
            Ok(SpecialistResult::failure(format!(
                "test command failed ({}), report at {}",
                outcome.summary(),
                report.location()
            )))
        }
    }
}

/// Waits for an operator decision. Approval moves to DEPLOYMENT, rejection
/// sends the project back to CODING.
pub struct QaApprovalSpecialist {
    toolkit: PromptToolkit,
}

impl QaApprovalSpecialist {
    pub fn new(toolkit: PromptToolkit) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl Specialist for QaApprovalSpecialist {
    fn name(&self) -> &'static str {
        "qa_approval"
    }

    fn phase(&self) -> Phase {
        Phase::AwaitingQaApproval
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        match &ctx.action {
            TaskAction::ApproveQa => {
                let record = self
                    .toolkit
                    .store(ctx, "qa_approval", &format!("approved by task {}", ctx.task_id))
                    .await?;
                Ok(SpecialistResult::advance(Phase::Deployment, vec![record]))
            }
            TaskAction::RejectQa { reason } => {
                let body = reason.as_deref().unwrap_or("rejected without reason");
                let record = self.toolkit.store(ctx, "qa_rejection", body).await?;
                Ok(SpecialistResult::advance(Phase::Coding, vec![record]))
            }
            TaskAction::Advance | TaskAction::Status => Ok(SpecialistResult::partial(Vec::new())),
        }
    }
}

/// Produces the `deployment_record` once QA has approved.
pub struct DeploymentSpecialist {
    toolkit: PromptToolkit,
}

impl DeploymentSpecialist {
    pub fn new(toolkit: PromptToolkit) -> Self {
        Self { toolkit }
    }
}

#[async_trait]
impl Specialist for DeploymentSpecialist {
    fn name(&self) -> &'static str {
        "deployment"
    }

    fn phase(&self) -> Phase {
        Phase::Deployment
    }

    fn required_artifacts(&self) -> &'static [&'static str] {
        &["qa_approval"]
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        let request = IntelligenceRequest::new(format!(
            "Write the deployment record for the approved build {}.",
            ctx.manifest.latest_artifact("code_bundle").unwrap_or("(unknown)")
        ))
        .with_system(SYSTEM_PROMPT);
        let (artifact, _) = self
            .toolkit
            .produce(ctx, Phase::Deployment, "deployment_record", request)
            .await?;
        Ok(SpecialistResult::advance(Phase::Production, vec![artifact]))
    }
}

/// PRODUCTION is terminal for automation: an explicit advance is the event
/// that hands the project to MAINTENANCE.
pub struct ProductionSpecialist;

#[async_trait]
impl Specialist for ProductionSpecialist {
    fn name(&self) -> &'static str {
        "production"
    }

    fn phase(&self) -> Phase {
        Phase::Production
    }

    fn required_artifacts(&self) -> &'static [&'static str] {
        &["deployment_record"]
    }

    async fn execute(&self, _ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        Ok(SpecialistResult::advance(Phase::Maintenance, Vec::new()))
    }
}

/// First word of a monitoring report that sends the project back to CODING.
pub const DEGRADED_MARKER: &str = "DEGRADED";

/// Produces monitoring reports. A report that opens with
/// [`DEGRADED_MARKER`] returns the project to CODING; any other report keeps
/// it in MAINTENANCE.
pub struct MaintenanceSpecialist {
    toolkit: PromptToolkit,
}

impl MaintenanceSpecialist {
    pub fn new(toolkit: PromptToolkit) -> Self {
        Self { toolkit }
    }
}

fn reports_degradation(report: &str) -> bool {
    report
        .split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(|c: char| !c.is_alphanumeric()))
        .is_some_and(|word| word.eq_ignore_ascii_case(DEGRADED_MARKER))
}

#[async_trait]
impl Specialist for MaintenanceSpecialist {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn phase(&self) -> Phase {
        Phase::Maintenance
    }

    async fn execute(&self, ctx: &SpecialistContext) -> DomainResult<SpecialistResult> {
        let request = IntelligenceRequest::new(format!(
            "Summarise the operational health of project {} in production. \
             Start with HEALTHY, or with {DEGRADED_MARKER} if the code needs rework.",
            ctx.manifest.project_id()
        ))
        .with_system(SYSTEM_PROMPT);
        let (artifact, report) = self
            .toolkit
            .produce(ctx, Phase::Maintenance, "monitoring_report", request)
            .await?;
        if reports_degradation(&report) {
            info!("Monitoring reported degradation, returning to coding");
            Ok(SpecialistResult::advance(Phase::Coding, vec![artifact]))
        } else {
            Ok(SpecialistResult::partial(vec![artifact]))
        }
    }
}

/// Registry with a built-in specialist for every phase.
pub fn builtin_registry(
    toolkit: PromptToolkit,
    test_command: Option<String>,
    test_timeout: Duration,
) -> SpecialistRegistry {
    SpecialistRegistry::new()
        .with(Arc::new(PlanningSpecialist::new(toolkit.clone())))
        .with(Arc::new(CodingSpecialist::new(toolkit.clone())))
        .with(Arc::new(TestingSpecialist::new(
            toolkit.clone(),
            test_command,
            test_timeout,
        )))
        .with(Arc::new(QaApprovalSpecialist::new(toolkit.clone())))
        .with(Arc::new(DeploymentSpecialist::new(toolkit.clone())))
        .with(Arc::new(ProductionSpecialist))
        .with(Arc::new(MaintenanceSpecialist::new(toolkit)))
}
