//! Lifecycle of the agent and responder daemons.
//!
//! ```text
//! start_agent ─▶ wait_for_socket ─▶ authenticate ─▶ wait_for_connection
//!                                                          │
//!          (caller: reconciler initialize) ◀───────────────┘
//!                         │
//!                  start_responder
//! ```
//!
//! Every spawned daemon gets a monitor task. An exit observed before the
//! shared token fires is a crash and cancels the token, which brings down
//! everything else. `shutdown` logs out, sends SIGTERM, waits out the grace
//! period and SIGKILLs whatever is left.

use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ResponderConfig, TailscaleConfig};
use crate::error::{Error, Result};
use crate::metrics;

/// Bounds and polling intervals for every blocking step.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// How long to wait for the agent control socket.
    pub socket_wait: Duration,
    /// Socket poll interval.
    pub socket_poll: Duration,
    /// How long to wait for the agent to report connectivity.
    pub connect_wait: Duration,
    /// Connectivity poll interval.
    pub connect_poll: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub grace: Duration,
    /// Running-state poll interval during the grace period.
    pub grace_poll: Duration,
    /// Upper bound for the logout command.
    pub logout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            socket_wait: Duration::from_secs(30),
            socket_poll: Duration::from_millis(100),
            connect_wait: Duration::from_secs(60),
            connect_poll: Duration::from_secs(1),
            grace: Duration::from_secs(10),
            grace_poll: Duration::from_millis(100),
            logout: Duration::from_secs(10),
        }
    }
}

/// A daemon started by the supervisor.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    pid: Option<u32>,
    running: AtomicBool,
    kill: Notify,
}

impl ManagedProcess {
    /// Process name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the process was still alive when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the monitor has not yet observed an exit.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);

        // No graceful signal elsewhere.
        #[cfg(not(unix))]
        self.kill.notify_one();
    }

    fn force_kill(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);

        self.kill.notify_one();
    }

    /// Signal the whole process group the daemon leads.
    #[cfg(unix)]
    fn signal(&self, sig: nix::sys::signal::Signal) {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        let pgid = Pid::from_raw(-(pid as i32));

        if let Err(e) = signal::kill(pgid, sig) {
            if e != nix::errno::Errno::ESRCH {
                warn!(name = %self.name, pid, error = ?e, signal = ?sig, "Failed to signal process");
            }
        }
    }
}

/// Outcome of `Supervisor::shutdown`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every process stopped within the grace period.
    pub graceful: bool,
    /// Processes that had to be force-killed.
    pub killed: Vec<String>,
}

/// Starts, monitors and tears down the supervised daemons.
pub struct Supervisor {
    tailscale: TailscaleConfig,
    responder: ResponderConfig,
    timeouts: Timeouts,
    token: CancellationToken,
    processes: Mutex<Vec<Arc<ManagedProcess>>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Supervisor {
    /// Create a supervisor bound to the shared cancellation token.
    pub fn new(
        tailscale: TailscaleConfig,
        responder: ResponderConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            tailscale,
            responder,
            timeouts: Timeouts::default(),
            token,
            processes: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override the default bounds.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The shared cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawn `cmd` detached and start its monitor task.
    pub fn spawn(&self, name: &str, mut cmd: Command) -> Result<Arc<ManagedProcess>> {
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| Error::Process {
            name: name.to_string(),
            source,
        })?;

        let process = Arc::new(ManagedProcess {
            name: name.to_string(),
            pid: child.id(),
            running: AtomicBool::new(true),
            kill: Notify::new(),
        });
        info!(name, pid = ?process.pid, "Started process");

        self.processes.lock().push(process.clone());
        metrics::record_running_processes(self.running_processes().len());

        let monitored = process.clone();
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = monitored.kill.notified() => {
                    if let Err(e) = child.start_kill() {
                        debug!(name = %monitored.name, error = %e, "Kill after exit");
                    }
                    child.wait().await
                }
            };
            monitored.running.store(false, Ordering::SeqCst);

            let status = match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {e}"),
            };

            if token.is_cancelled() {
                info!(name = %monitored.name, %status, "Process exited");
                metrics::record_process_exit(&monitored.name, true);
            } else {
                error!(name = %monitored.name, %status, "Process exited unexpectedly, shutting down");
                metrics::record_process_exit(&monitored.name, false);
                token.cancel();
            }
        });
        self.tasks.lock().push((format!("monitor:{name}"), handle));

        Ok(process)
    }

    /// Run a background task for the lifetime of the supervisor.
    ///
    /// A task returning an error cancels the shared token.
    pub fn spawn_task<F>(&self, name: &str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.token.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => debug!(task = %task_name, "Task finished"),
                Err(e) => {
                    error!(task = %task_name, "Task failed, shutting down: {}", e);
                    token.cancel();
                }
            }
        });
        self.tasks.lock().push((name.to_string(), handle));
    }

    /// Start the overlay agent daemon.
    pub async fn start_agent(&self) -> Result<Arc<ManagedProcess>> {
        let ts = &self.tailscale;
        tokio::fs::create_dir_all(&ts.state_dir).await?;
        if let Some(parent) = ts.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&ts.daemon_bin);
        cmd.arg(format!("--tun={}", ts.tun))
            .arg(format!(
                "--state={}",
                ts.state_dir.join("tailscaled.state").display()
            ))
            .arg(format!("--socket={}", ts.socket_path.display()));

        self.spawn(&process_name(&ts.daemon_bin), cmd)
    }

    /// Wait for the agent control socket to appear.
    pub async fn wait_for_socket(&self) -> Result<()> {
        info!(socket = %self.tailscale.socket_path.display(), "Waiting for agent socket");
        wait_for_path(
            &self.tailscale.socket_path,
            self.timeouts.socket_wait,
            self.timeouts.socket_poll,
            &self.token,
        )
        .await?;
        info!("Agent socket ready");
        Ok(())
    }

    /// Authenticate the agent with the configured key.
    pub async fn authenticate(&self) -> Result<()> {
        let ts = &self.tailscale;
        info!(hostname = %ts.hostname, tags = ?ts.advertise_tags, "Authenticating");

        let mut auth_key = ts.client_secret.clone();
        if ts.ephemeral {
            auth_key.push_str("?ephemeral=true");
        }

        let mut cmd = self.cli();
        cmd.arg("up")
            .arg(format!("--authkey={auth_key}"))
            .arg(format!("--advertise-tags={}", ts.advertise_tags.join(",")))
            .arg(format!("--hostname={}", ts.hostname));

        let status = self.run_until_cancelled(cmd).await?;
        if !status.success() {
            return Err(Error::CommandFailed {
                command: "tailscale up".to_string(),
                status,
            });
        }

        info!("Authentication completed");
        Ok(())
    }

    /// Poll the agent status command until it succeeds.
    pub async fn wait_for_connection(&self) -> Result<()> {
        info!("Waiting for agent to connect");
        let deadline = Instant::now() + self.timeouts.connect_wait;

        loop {
            let mut cmd = self.cli();
            cmd.arg("status").stdout(Stdio::null());

            // A hung attempt is killed on drop once the bound runs out.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = match tokio::time::timeout(remaining, self.run_until_cancelled(cmd)).await
            {
                Ok(attempt) => attempt,
                Err(_) => return Err(Error::Timeout("agent connection".to_string())),
            };
            match attempt {
                Ok(status) if status.success() => {
                    info!("Agent connected");
                    return Ok(());
                }
                Ok(status) => debug!(%status, "Agent not connected yet"),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => debug!("Status check failed: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout("agent connection".to_string()));
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.timeouts.connect_poll) => {}
            }
        }
    }

    /// Start the DNS responder with its directive file.
    pub fn start_responder(&self) -> Result<Arc<ManagedProcess>> {
        let mut cmd = Command::new(&self.responder.bin);
        cmd.arg("-conf").arg(&self.responder.config_path);
        self.spawn(&process_name(&self.responder.bin), cmd)
    }

    /// Log the agent out. Best-effort.
    pub async fn logout(&self) {
        info!("Logging out of tailscale");
        let mut cmd = self.cli();
        cmd.arg("logout").stdin(Stdio::null()).kill_on_drop(true);

        match tokio::time::timeout(self.timeouts.logout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => info!("Logout completed"),
            Ok(Ok(output)) => warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Logout failed"
            ),
            Ok(Err(e)) => warn!("Logout failed: {}", e),
            Err(_) => warn!("Logout timed out"),
        }
    }

    /// Processes the monitors still consider alive.
    pub fn running_processes(&self) -> Vec<Arc<ManagedProcess>> {
        self.processes
            .lock()
            .iter()
            .filter(|p| p.is_running())
            .cloned()
            .collect()
    }

    /// Cancel the shared token on SIGINT/SIGTERM.
    ///
    /// Call before the first startup wait so a termination request during
    /// startup still goes through `shutdown`.
    pub fn cancel_on_signal(&self) {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Termination requested");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        self.tasks.lock().push(("signals".to_string(), handle));
    }

    /// Block until the shared token fires.
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
        info!("Shutdown triggered by cancellation");
    }

    /// Stop everything: cancel, log out, SIGTERM, wait, SIGKILL stragglers.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down supervised processes");
        self.token.cancel();

        if self.processes.lock().iter().any(|p| p.is_running()) {
            self.logout().await;
        }

        for process in self.running_processes() {
            info!(name = %process.name, pid = ?process.pid, "Sending SIGTERM");
            process.terminate();
        }

        let deadline = Instant::now() + self.timeouts.grace;
        while !self.running_processes().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(self.timeouts.grace_poll).await;
        }

        let remaining = self.running_processes();
        let graceful = remaining.is_empty();
        let mut killed = Vec::with_capacity(remaining.len());
        for process in remaining {
            warn!(name = %process.name, pid = ?process.pid, "Grace period elapsed, killing process");
            process.force_kill();
            killed.push(process.name.clone());
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, mut handle) in tasks {
            match tokio::time::timeout(self.timeouts.grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = %name, "Task failed to join: {}", e),
                Err(_) => {
                    warn!(task = %name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        metrics::record_running_processes(self.running_processes().len());
        if graceful {
            info!("All processes stopped gracefully");
        } else {
            warn!(killed = ?killed, "Shutdown required force kill");
        }

        ShutdownReport { graceful, killed }
    }

    fn cli(&self) -> Command {
        let mut cmd = Command::new(&self.tailscale.cli_bin);
        cmd.arg(format!("--socket={}", self.tailscale.socket_path.display()));
        cmd
    }

    /// Run `cmd` to completion unless the token fires first.
    async fn run_until_cancelled(&self, mut cmd: Command) -> Result<std::process::ExitStatus> {
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        let mut child = cmd.spawn()?;

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = self.token.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Poll until `path` exists, the bound elapses, or `token` fires.
pub async fn wait_for_path(
    path: &Path,
    wait: Duration,
    poll: Duration,
    token: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + wait;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(path.display().to_string()));
        }

        tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn process_name(bin: &Path) -> String {
    bin.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(bin).display().to_string())
}
