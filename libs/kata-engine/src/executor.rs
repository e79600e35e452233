/// Submission Orchestrator - High-Level Coordination
///
/// **Responsibility:**
/// Drive one submission from source text to report:
/// `Init → ResolveEntry → {Failed(EntryPointNotFound) | RunTests → Aggregated}`
///
/// **Architecture:**
/// 1. Resolve the entry point once (resolver.rs)
/// 2. Plan and render a harness per test case (planner.rs, harness.rs)
/// 3. Execute on the primary engine, or on the fallback when the primary is
///    unreachable (docker.rs, local.rs)
/// 4. Compare and aggregate (evaluator.rs)
///
/// Test cases of a submission run concurrently on an ordered stream; a global
/// semaphore bounds running executions across all submissions. Per-test
/// failures stay in their slot and never abort the batch.

use crate::docker::DockerEngine;
use crate::engine::{EngineError, ExecutionEngine, ExecutionLimits};
use crate::evaluator::{self, TestOutcome};
use crate::harness::{self, HarnessProgram};
use crate::local::LocalNodeEngine;
use crate::planner;
use crate::resolver::{self, ResolveError};
use futures_util::stream::{self, StreamExt};
use kata_common::config::SandboxConfig;
use kata_common::types::{
    EntryDescriptor, InvocationContract, Report, Submission, TestCase,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    EntryPoint(#[from] ResolveError),
    #[error("Code execution is currently unavailable")]
    ExecutorUnavailable,
}

/// Optional per-task invocation declarations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JudgeOptions {
    pub entry: Option<String>,
    pub contract: Option<InvocationContract>,
}

pub struct Judge {
    primary: Arc<dyn ExecutionEngine>,
    fallback: Option<Arc<dyn ExecutionEngine>>,
    slots: Arc<Semaphore>,
    limits: ExecutionLimits,
    parallel_tests: usize,
    max_source_bytes: usize,
}

impl Judge {
    pub fn new(
        primary: Arc<dyn ExecutionEngine>,
        fallback: Option<Arc<dyn ExecutionEngine>>,
        config: &SandboxConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            slots: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            limits: ExecutionLimits::from_config(config),
            parallel_tests: config.parallel_tests,
            max_source_bytes: config.max_source_bytes,
        }
    }

    /// Production wiring: Docker sandbox, local node fallback when enabled.
    pub fn from_config(config: &SandboxConfig) -> Result<Self, EngineError> {
        let primary: Arc<dyn ExecutionEngine> = Arc::new(DockerEngine::new(config)?);
        let fallback: Option<Arc<dyn ExecutionEngine>> = if config.fallback.enabled {
            Some(Arc::new(LocalNodeEngine::new(&config.fallback)))
        } else {
            None
        };
        Ok(Self::new(primary, fallback, config))
    }

    pub fn primary(&self) -> &dyn ExecutionEngine {
        self.primary.as_ref()
    }

    /// Resolve the entry point for a submission
    pub fn resolve_entry(
        &self,
        submission: &Submission,
        options: &JudgeOptions,
    ) -> Result<EntryDescriptor, JudgeError> {
        if submission.source.trim().is_empty() {
            return Err(JudgeError::InvalidInput("Code is required".to_string()));
        }
        if submission.source.len() > self.max_source_bytes {
            return Err(JudgeError::InvalidInput(format!(
                "Code exceeds maximum size of {} bytes",
                self.max_source_bytes
            )));
        }

        let entry = match options.entry.as_deref() {
            Some(name) => resolver::resolve_named(&submission.source, name)?,
            None => resolver::resolve(&submission.source)?,
        };
        Ok(entry)
    }

    /// Judge a submission against its test cases
    #[instrument(
        skip_all,
        fields(
            task_id = ?submission.task_id,
            test_count = test_cases.len(),
            source_size = submission.source.len()
        )
    )]
    pub async fn judge(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        options: &JudgeOptions,
    ) -> Result<Report, JudgeError> {
        let entry = self.resolve_entry(submission, options)?;
        info!(entry = %entry.name, kind = %entry.kind, "Resolved entry point");

        let programs: Vec<Result<HarnessProgram, String>> = test_cases
            .iter()
            .map(|test_case| {
                let plan = planner::plan(&entry, &test_case.input, options.contract.as_ref());
                harness::render(&submission.source, &entry, &plan)
                    .map_err(|e| format!("Failed to render harness: {}", e))
            })
            .collect();

        let (executor, outcomes) = match self.run_batch(self.primary.as_ref(), &programs).await {
            Some(outcomes) => (self.primary.kind(), outcomes),
            None => {
                let fallback = self.fallback.as_deref().ok_or_else(|| {
                    warn!("Primary sandbox unreachable and fallback is disabled");
                    JudgeError::ExecutorUnavailable
                })?;

                warn!(
                    executor = %fallback.kind(),
                    "Primary sandbox unreachable; running batch on fallback executor WITHOUT sandbox isolation"
                );

                let outcomes = self.run_batch(fallback, &programs).await.ok_or_else(|| {
                    warn!("Fallback executor unreachable");
                    JudgeError::ExecutorUnavailable
                })?;
                (fallback.kind(), outcomes)
            }
        };

        let report = evaluator::evaluate(test_cases, outcomes, submission.task_id.clone(), executor);

        info!(
            executor = %executor,
            passed = report.passed_count(),
            total = report.results.len(),
            all_passed = report.all_passed,
            "Submission judged"
        );

        Ok(report)
    }

    /// Run every program on one engine, preserving order.
    ///
    /// Returns `None` when the engine turns out to be unreachable, in which
    /// case the whole batch must be re-run elsewhere.
    async fn run_batch(
        &self,
        engine: &dyn ExecutionEngine,
        programs: &[Result<HarnessProgram, String>],
    ) -> Option<Vec<TestOutcome>> {
        if let Err(e) = engine.probe().await {
            warn!(executor = %engine.kind(), error = %e, "Executor probe failed");
            return None;
        }

        let slots: Vec<Result<TestOutcome, EngineError>> = stream::iter(0..programs.len())
            .map(|index| self.run_slot(engine, index, &programs[index]))
            .buffered(self.parallel_tests)
            .collect()
            .await;

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(executor = %engine.kind(), error = %e, "Executor became unreachable mid-batch");
                    return None;
                }
            }
        }
        Some(outcomes)
    }

    /// Execute a single test case. Only `Unavailable` escapes as an error.
    async fn run_slot(
        &self,
        engine: &dyn ExecutionEngine,
        index: usize,
        program: &Result<HarnessProgram, String>,
    ) -> Result<TestOutcome, EngineError> {
        let program = match program {
            Ok(program) => program,
            Err(message) => return Ok(TestOutcome::SandboxFailure(message.clone())),
        };

        let protocol = program.plan.protocol();
        if !engine.supports(protocol) {
            return Ok(TestOutcome::Unsupported(format!(
                "The {} protocol is not supported by the {} executor",
                protocol,
                engine.kind()
            )));
        }

        // Held for the whole execution, released on every exit path
        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("Execution slots closed".to_string()))?;

        let outcome = match engine.execute(program, &self.limits).await {
            Ok(raw) => {
                debug!(
                    test_index = index,
                    execution_ms = raw.execution_time_ms,
                    exit_code = ?raw.exit_code,
                    timed_out = raw.timed_out,
                    "Test case executed"
                );
                harness::interpret(&raw, program, self.limits.timeout_ms())
            }
            Err(EngineError::Unavailable(message)) => return Err(EngineError::Unavailable(message)),
            Err(e) => {
                warn!(test_index = index, error = %e, "Test case could not be executed");
                TestOutcome::SandboxFailure(e.to_string())
            }
        };

        Ok(outcome)
    }
}
