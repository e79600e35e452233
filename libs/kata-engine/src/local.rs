/// Local Node fallback engine
///
/// Used only when the Docker sandbox is unreachable. Runs `node` as a child
/// process with:
/// - an empty environment and the system temp dir as working directory
/// - a V8 heap ceiling (`--max-old-space-size`)
/// - the same wall-clock timeout and output caps as the sandbox
/// - kill-on-drop, so a cancelled execution never leaves a process behind
///
/// It does NOT isolate the filesystem, the network or the process table:
/// submitted code runs with the ambient capabilities of this service's user.
/// Only the pure protocol is offered on this path.

use crate::engine::{push_capped, EngineError, ExecutionEngine, ExecutionLimits, RawOutput};
use crate::harness::HarnessProgram;
use crate::planner::Protocol;
use async_trait::async_trait;
use kata_common::config::FallbackConfig;
use kata_common::types::ExecutorKind;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LocalNodeEngine {
    node_path: String,
    heap_limit_mb: u32,
    workdir: PathBuf,
}

impl LocalNodeEngine {
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            node_path: config.node_path.clone(),
            heap_limit_mb: config.heap_limit_mb,
            workdir: std::env::temp_dir(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.node_path);
        command
            .env_clear()
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

fn spawn_error(e: io::Error, node_path: &str) -> EngineError {
    if e.kind() == io::ErrorKind::NotFound || e.kind() == io::ErrorKind::PermissionDenied {
        EngineError::Unavailable(format!("Cannot run '{}': {}", node_path, e))
    } else {
        EngineError::Internal(format!("Failed to spawn '{}': {}", node_path, e))
    }
}

/// Read a stream to the end, keeping at most `cap` bytes.
///
/// The stream is drained past the cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, cap: usize) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok((kept, truncated));
        }
        truncated |= push_capped(&mut kept, &chunk[..n], cap);
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> Option<i64> {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|signal| 128 + i64::from(signal)))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> Option<i64> {
    status.code().map(i64::from)
}

#[async_trait]
impl ExecutionEngine for LocalNodeEngine {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Fallback
    }

    fn supports(&self, protocol: Protocol) -> bool {
        protocol == Protocol::Pure
    }

    async fn probe(&self) -> Result<(), EngineError> {
        let mut command = Command::new(&self.node_path);
        command.arg("--version").env_clear().kill_on_drop(true);

        let output = tokio::time::timeout(PROBE_TIMEOUT, command.output())
            .await
            .map_err(|_| EngineError::Unavailable(format!("'{} --version' timed out", self.node_path)))?
            .map_err(|e| spawn_error(e, &self.node_path))?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(format!(
                "'{} --version' exited with {}",
                self.node_path, output.status
            )));
        }

        debug!(
            node = %self.node_path,
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "Local node available"
        );
        Ok(())
    }

    async fn execute(
        &self,
        program: &HarnessProgram,
        limits: &ExecutionLimits,
    ) -> Result<RawOutput, EngineError> {
        if !self.supports(program.plan.protocol()) {
            return Err(EngineError::Internal(format!(
                "{} protocol is not supported by the fallback executor",
                program.plan.protocol()
            )));
        }

        let mut child = self
            .command()
            .arg(format!("--max-old-space-size={}", self.heap_limit_mb))
            .arg("-")
            .spawn()
            .map_err(|e| spawn_error(e, &self.node_path))?;

        let start_time = Instant::now();

        let (mut stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(EngineError::Internal("Child process pipes unavailable".to_string())),
        };

        let max_output = limits.max_output_bytes;
        let script = program.script.as_bytes();
        let execution_future = async {
            // Node reads the whole script from stdin before running it
            stdin.write_all(script).await?;
            drop(stdin);

            let (out, err, status) = tokio::join!(
                read_capped(stdout, max_output),
                read_capped(stderr, max_output),
                child.wait()
            );
            let (out, out_truncated) = out?;
            let (err, err_truncated) = err?;
            Ok::<_, io::Error>((out, err, status?, out_truncated || err_truncated))
        };

        let timeout_result = tokio::time::timeout(limits.timeout, execution_future).await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        match timeout_result {
            Ok(Ok((stdout, stderr, status, truncated))) => Ok(RawOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: exit_code(status),
                timed_out: false,
                truncated,
                execution_time_ms,
            }),
            Ok(Err(e)) => Err(EngineError::Internal(format!("Local execution failed: {}", e))),
            Err(_) => {
                warn!(timeout_ms = limits.timeout_ms(), "Local execution timed out, killing process");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                Ok(RawOutput {
                    timed_out: true,
                    execution_time_ms,
                    ..Default::default()
                })
            }
        }
    }
}
