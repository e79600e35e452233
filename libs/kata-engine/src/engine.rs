/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Run a rendered harness program and capture its raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker container, local process)
/// - Engine does NOT know which protocol the harness implements
/// - Engine does NOT evaluate correctness
/// - Engine returns raw output for the harness and evaluator to judge
///
/// Backends are swappable behind [`ExecutionEngine`]; production uses
/// `DockerEngine` with `LocalNodeEngine` as the degraded fallback.

use crate::harness::HarnessProgram;
use crate::planner::Protocol;
use async_trait::async_trait;
use kata_common::config::SandboxConfig;
use kata_common::types::ExecutorKind;
use std::time::Duration;
use thiserror::Error;

/// Per-stream cap on captured stdout/stderr
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ExecutionLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// Raw output of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// Either stream hit `max_output_bytes`
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The backend cannot be reached at all. Triggers the fallback path.
    #[error("execution backend unavailable: {0}")]
    Unavailable(String),
    #[error("harness program is {size} bytes, limit is {limit} bytes")]
    ProgramTooLarge { size: usize, limit: usize },
    /// The backend was reachable but could not carry out the execution.
    #[error("sandbox failure: {0}")]
    Internal(String),
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Whether this backend implements the given invocation protocol.
    fn supports(&self, _protocol: Protocol) -> bool {
        true
    }

    /// Check that the backend is reachable and ready to execute.
    async fn probe(&self) -> Result<(), EngineError>;

    /// Run one program in a fresh execution context.
    async fn execute(
        &self,
        program: &HarnessProgram,
        limits: &ExecutionLimits,
    ) -> Result<RawOutput, EngineError>;
}

/// Append `chunk` to `buf` without letting it grow past `cap`.
///
/// Returns true when bytes were dropped.
pub(crate) fn push_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.extend_from_slice(chunk);
        false
    } else {
        buf.extend_from_slice(&chunk[..room]);
        true
    }
}
