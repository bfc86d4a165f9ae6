//! Lifecycle of locally spawned service backends
//!
//! A service is a child process that serves MCP over HTTP on a local port.
//! Starting one spawns the child and polls its health URL until it answers,
//! the child exits, or the startup timeout passes.

use std::collections::{HashMap, VecDeque};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use conflux_config::{ServiceBackend, SupervisorConfig};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Lines of child output kept for diagnostics
const OUTPUT_TAIL_LINES: usize = 50;

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Observed state of a service child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Exited,
    NotStarted,
}

/// Result of one service startup inside [`Supervisor::start_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Ready,
    Failed,
    /// Startup had not finished when the join deadline passed
    StillStarting,
}

struct ManagedProcess {
    child: Mutex<Child>,
    output: Arc<StdMutex<VecDeque<String>>>,
}

impl ManagedProcess {
    async fn exit_status(&self) -> Option<ExitStatus> {
        self.child.lock().await.try_wait().ok().flatten()
    }

    fn output_tail(&self) -> String {
        self.output
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Owns the child processes of service backends
pub struct Supervisor {
    processes: Mutex<HashMap<String, Arc<ManagedProcess>>>,
    config: SupervisorConfig,
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Spawn a service and wait until it is healthy
    ///
    /// Returns `false` if the child cannot be spawned, exits during startup,
    /// or stays unhealthy past its startup timeout. A timed out child is
    /// terminated but stays tracked so its status reads as exited.
    pub async fn start(&self, name: &str, service: &ServiceBackend) -> bool {
        let previous = self.processes.lock().await.remove(name);
        if let Some(previous) = previous {
            self.terminate(name, &previous).await;
        }

        // Spawn under the map lock so a concurrent stop always finds the child
        let process = {
            let mut processes = self.processes.lock().await;
            match spawn(name, service) {
                Ok(process) => {
                    let process = Arc::new(process);
                    processes.insert(name.to_owned(), Arc::clone(&process));
                    process
                }
                Err(e) => {
                    tracing::error!(server = name, command = %service.command, error = %e, "failed to spawn service");
                    return false;
                }
            }
        };

        tracing::info!(server = name, port = service.port, "starting service");

        let health_url = service.health_url();
        let deadline = deadline_after(service.startup_timeout());

        loop {
            if let Some(status) = process.exit_status().await {
                tracing::error!(
                    server = name,
                    %status,
                    output = %process.output_tail(),
                    "service exited during startup"
                );
                return false;
            }

            if self.is_healthy(&health_url).await {
                tracing::info!(server = name, url = %health_url, "service is ready");
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }

        tracing::error!(
            server = name,
            timeout_secs = service.startup_timeout,
            output = %process.output_tail(),
            "service did not become healthy in time"
        );
        self.terminate(name, &process).await;

        false
    }

    /// Start every service not already tracked, in parallel
    ///
    /// Waits until the longest startup timeout plus the join grace. Startups
    /// still running at that point are left to finish in the background.
    pub async fn start_all(self: &Arc<Self>, services: Vec<(String, ServiceBackend)>) -> HashMap<String, StartOutcome> {
        let pending: Vec<_> = {
            let tracked = self.processes.lock().await;
            services
                .into_iter()
                .filter(|(name, _)| !tracked.contains_key(name))
                .collect()
        };

        if pending.is_empty() {
            return HashMap::new();
        }

        let longest = pending
            .iter()
            .map(|(_, service)| service.startup_timeout())
            .max()
            .unwrap_or_default();
        let deadline = deadline_after(longest.saturating_add(self.config.join_grace()));

        let handles: Vec<_> = pending
            .into_iter()
            .map(|(name, service)| {
                let supervisor = Arc::clone(self);
                let task_name = name.clone();
                let handle = tokio::spawn(async move { supervisor.start(&task_name, &service).await });
                (name, handle)
            })
            .collect();

        let mut outcomes = HashMap::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(true)) => StartOutcome::Ready,
                Ok(Ok(false)) => StartOutcome::Failed,
                Ok(Err(e)) => {
                    tracing::error!(server = %name, error = %e, "service startup task panicked");
                    StartOutcome::Failed
                }
                Err(_) => {
                    tracing::warn!(server = %name, "service still starting after join deadline");
                    StartOutcome::StillStarting
                }
            };
            outcomes.insert(name, outcome);
        }

        outcomes
    }

    /// Stop a tracked service; returns `false` if none was tracked
    pub async fn stop(&self, name: &str) -> bool {
        let process = self.processes.lock().await.remove(name);
        match process {
            Some(process) => {
                self.terminate(name, &process).await;
                true
            }
            None => false,
        }
    }

    /// Stop every tracked service concurrently
    pub async fn stop_all(&self) {
        let processes: Vec<_> = self.processes.lock().await.drain().collect();

        futures_util::future::join_all(
            processes
                .iter()
                .map(|(name, process)| self.terminate(name, process)),
        )
        .await;
    }

    pub async fn status(&self, name: &str) -> ProcessStatus {
        let Some(process) = self.processes.lock().await.get(name).cloned() else {
            return ProcessStatus::NotStarted;
        };

        if process.exit_status().await.is_some() {
            ProcessStatus::Exited
        } else {
            ProcessStatus::Running
        }
    }

    /// Whether a process is tracked under this name, running or not
    pub async fn is_tracked(&self, name: &str) -> bool {
        self.processes.lock().await.contains_key(name)
    }

    /// Last lines the child wrote to stdout or stderr
    pub async fn output_tail(&self, name: &str) -> Option<String> {
        let process = self.processes.lock().await.get(name).cloned();
        process.map(|p| p.output_tail())
    }

    async fn is_healthy(&self, url: &str) -> bool {
        match self
            .http
            .get(url)
            .timeout(self.config.health_check_timeout())
            .send()
            .await
        {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(url, error = %e, "health check failed");
                false
            }
        }
    }

    /// Ask the child to exit, then kill it once the grace period passes
    async fn terminate(&self, name: &str, process: &ManagedProcess) {
        let mut child = process.child.lock().await;

        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }

        if !request_shutdown(&mut child)
            && let Err(e) = child.start_kill()
        {
            tracing::warn!(server = name, error = %e, "failed to signal service");
        }

        match tokio::time::timeout(self.config.shutdown_grace(), child.wait()).await {
            Ok(_) => tracing::info!(server = name, "stopped service"),
            Err(_) => {
                tracing::warn!(server = name, "service ignored termination, killing");
                if let Err(e) = child.kill().await {
                    tracing::error!(server = name, error = %e, "failed to kill service");
                }
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn spawn(name: &str, service: &ServiceBackend) -> std::io::Result<ManagedProcess> {
    let mut cmd = Command::new(&service.command);
    cmd.args(&service.args)
        .envs(&service.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &service.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let output = Arc::new(StdMutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));

    if let Some(stdout) = child.stdout.take() {
        drain_output(name, stdout, Arc::clone(&output));
    }
    if let Some(stderr) = child.stderr.take() {
        drain_output(name, stderr, Arc::clone(&output));
    }

    Ok(ManagedProcess {
        child: Mutex::new(child),
        output,
    })
}

/// Keep reading a child stream so the child never blocks on a full pipe
fn drain_output<R>(name: &str, stream: R, tail: Arc<StdMutex<VecDeque<String>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.to_owned();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, "{line}");
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    });
}

#[cfg(unix)]
fn request_shutdown(child: &mut Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) -> bool {
    child.start_kill().is_ok()
}
