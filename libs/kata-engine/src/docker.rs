/// Docker-based sandbox engine
///
/// **Isolation Rules (one fresh container per execution):**
/// 1. Networking disabled (`network_mode: none`)
/// 2. Read-only root filesystem, small `noexec` tmpfs at /tmp for the harness
/// 3. All capabilities dropped, `no-new-privileges`, unprivileged user
/// 4. Memory (no swap), CPU and PID ceilings
/// 5. Node runs with an empty environment
/// 6. Hard wall-clock timeout; the container is killed on expiry
/// 7. Container removed on every exit path via [`ContainerGuard`]
///
/// The harness travels base64-encoded in an environment variable and is
/// decoded onto the tmpfs by the container's shell before Node starts.

use crate::engine::{push_capped, EngineError, ExecutionEngine, ExecutionLimits, RawOutput};
use crate::harness::HarnessProgram;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use kata_common::config::SandboxConfig;
use kata_common::types::ExecutorKind;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Upper bound for the encoded harness. Linux caps a single environment
/// string at 128 KiB (MAX_ARG_STRLEN).
const MAX_ENCODED_HARNESS_BYTES: usize = 120 * 1024;

const HARNESS_ENV: &str = "KATA_HARNESS";

const RUN_HARNESS: &str =
    r#"printf '%s' "$KATA_HARNESS" | base64 -d > /tmp/harness.js && exec env -i "$(command -v node)" /tmp/harness.js"#;

/// Container cleanup guard - guarantees container removal on drop
/// Covers panics and cancellation of the execution future.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Drop cannot be async: removal is spawned on the runtime
        let container_id = std::mem::take(&mut self.container_id);
        let docker = self.docker.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %container_id, "No runtime available to remove container");
            return;
        };

        runtime.spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

/// Errors that are not HTTP responses from the daemon mean it is unreachable.
fn classify(error: bollard::errors::Error, action: &str) -> EngineError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Internal(format!("{} ({}): {}", action, status_code, message)),
        other => EngineError::Unavailable(format!("{}: {}", action, other)),
    }
}

pub struct DockerEngine {
    docker: Docker,
    image: String,
    memory_limit: i64,
    nano_cpus: i64,
    pids_limit: i64,
    image_ready: OnceCell<()>,
}

impl DockerEngine {
    /// Create a Docker engine from sandbox configuration.
    ///
    /// No connection is made here; reachability is checked by `probe`.
    pub fn new(config: &SandboxConfig) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(format!("Failed to configure Docker client: {}", e)))?;

        Ok(Self {
            docker,
            image: config.image.clone(),
            memory_limit: config.memory_limit_bytes(),
            nano_cpus: config.nano_cpus(),
            pids_limit: config.pids_limit,
            image_ready: OnceCell::new(),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Ensure the runtime image is available (pull if needed)
    async fn ensure_image(&self) -> Result<(), EngineError> {
        self.image_ready
            .get_or_try_init(|| async {
                if self.docker.inspect_image(&self.image).await.is_ok() {
                    debug!(image = %self.image, "Image cache hit");
                    return Ok::<(), EngineError>(());
                }

                warn!(image = %self.image, "Image cache miss, pulling");

                let options = Some(CreateImageOptions {
                    from_image: self.image.as_str(),
                    ..Default::default()
                });

                let mut stream = self.docker.create_image(options, None, None);
                while let Some(result) = stream.next().await {
                    // An image we cannot obtain leaves the backend unusable
                    result.map_err(|e| {
                        EngineError::Unavailable(format!("Failed to pull image '{}': {}", self.image, e))
                    })?;
                }

                info!(image = %self.image, "Image pulled successfully");
                Ok::<(), EngineError>(())
            })
            .await
            .map(|_| ())
    }

    fn container_config(&self, encoded_harness: String) -> Config<String> {
        let tmpfs = HashMap::from([(
            "/tmp".to_string(),
            "rw,noexec,nosuid,size=16m".to_string(),
        )]);

        Config {
            image: Some(self.image.clone()),
            entrypoint: Some(vec![]),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                RUN_HARNESS.to_string(),
            ]),
            env: Some(vec![format!("{}={}", HARNESS_ENV, encoded_harness)]),
            user: Some("node".to_string()),
            working_dir: Some("/tmp".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(self.memory_limit),
                memory_swap: Some(self.memory_limit),
                nano_cpus: Some(self.nano_cpus),
                pids_limit: Some(self.pids_limit),
                readonly_rootfs: Some(true),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                tmpfs: Some(tmpfs),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sandbox
    }

    async fn probe(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::Unavailable(format!("Docker daemon unreachable: {}", e)))?;
        self.ensure_image().await
    }

    /// Execute one harness program in a fresh container
    ///
    /// **Guarantees:**
    /// - Size check before any container is created
    /// - Hard timeout via tokio::time::timeout, container killed on expiry
    /// - Container removed even on panic/cancellation (drop guard)
    /// - Transport errors reported as `Unavailable`, daemon errors as `Internal`
    async fn execute(
        &self,
        program: &HarnessProgram,
        limits: &ExecutionLimits,
    ) -> Result<RawOutput, EngineError> {
        let encoded = general_purpose::STANDARD.encode(program.script.as_bytes());
        if encoded.len() > MAX_ENCODED_HARNESS_BYTES {
            return Err(EngineError::ProgramTooLarge {
                size: encoded.len(),
                limit: MAX_ENCODED_HARNESS_BYTES,
            });
        }

        let container_name = format!("kata-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(encoded))
            .await
            .map_err(|e| classify(e, "Failed to create container"))?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, "Failed to start container"))?;

        let max_output = limits.max_output_bytes;
        let execution_future = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut truncated = false;

            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => {
                        truncated |= push_capped(&mut stdout, &message, max_output);
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        truncated |= push_capped(&mut stderr, &message, max_output);
                    }
                    Ok(_) => {}
                    Err(e) => return Err(classify(e, "Failed to read container logs")),
                }
            }

            let wait_options = Some(WaitContainerOptions {
                condition: "not-running",
            });

            // Non-zero exits surface as DockerContainerWaitError
            let mut wait_stream = self.docker.wait_container(&container_id, wait_options);
            let exit_code = match wait_stream.next().await {
                Some(Ok(response)) => Some(response.status_code),
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => return Err(classify(e, "Failed to wait for container")),
                None => None,
            };

            Ok((stdout, stderr, exit_code, truncated))
        };

        let timeout_result = tokio::time::timeout(limits.timeout, execution_future).await;
        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        match timeout_result {
            Ok(Ok((stdout, stderr, exit_code, truncated))) => {
                debug!(
                    container = %container_name,
                    exit_code = ?exit_code,
                    execution_ms = execution_time_ms,
                    "Container finished"
                );
                Ok(RawOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code,
                    timed_out: false,
                    truncated,
                    execution_time_ms,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    container = %container_name,
                    timeout_ms = limits.timeout_ms(),
                    "Execution timed out, killing container"
                );

                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %container_name, error = %e, "Failed to kill timed-out container");
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
