//! Host-process service runtime.
//!
//! Each service with a command runs as a child process supervised by its own
//! task. Children are deliberately not `kill_on_drop`: long-running services
//! outlive the `up` invocation and are stopped later by `down` through the
//! pid recorded in the instance ledger.
//!
//! A recorded pid is only signalled while it still names the process keel
//! started: the boot id plus the kernel start time from `/proc` must match
//! the identity captured at spawn. Where `/proc` is unavailable no identity
//! is captured and recorded processes are left alone.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::RuntimeError;
use crate::domain::models::{HealthCheck, ServiceHandle};
use crate::domain::ports::{LaunchSpec, ServiceRuntime};

const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

struct ManagedProcess {
    launch: LaunchSpec,
    cancel: CancellationToken,
    exit: watch::Receiver<Option<i32>>,
}

/// Runs services as host processes.
pub struct ProcessRuntime {
    processes: Arc<RwLock<HashMap<Uuid, ManagedProcess>>>,
    stop_timeout: Duration,
}

impl ProcessRuntime {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            stop_timeout,
        }
    }

    fn spawn_child(launch: &LaunchSpec, argv: &[String]) -> Result<Child, RuntimeError> {
        let spawn_err = |source: std::io::Error| RuntimeError::Spawn {
            service: launch.service.clone(),
            source,
        };
        let (program, args) = argv.split_first().ok_or_else(|| {
            spawn_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&launch.environment)
            .stdin(Stdio::null());

        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        if let Some(log_file) = &launch.log_file {
            if let Some(parent) = log_file.parent() {
                std::fs::create_dir_all(parent).map_err(spawn_err)?;
            }
            let stdout = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .map_err(spawn_err)?;
            let stderr = stdout.try_clone().map_err(spawn_err)?;
            command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        }

        command.spawn().map_err(spawn_err)
    }

    async fn receiver(&self, handle: &ServiceHandle) -> Result<watch::Receiver<Option<i32>>, RuntimeError> {
        self.processes
            .read()
            .await
            .get(&handle.instance_id)
            .map(|p| p.exit.clone())
            .ok_or_else(|| RuntimeError::UnknownInstance(handle.service.clone()))
    }
}

#[async_trait]
impl ServiceRuntime for ProcessRuntime {
    async fn start(&self, launch: &LaunchSpec) -> Result<ServiceHandle, RuntimeError> {
        let instance_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);

        let (pid, identity) = match &launch.command {
            Some(argv) => {
                let mut child = Self::spawn_child(launch, argv)?;
                let pid = child.id();
                let identity = pid.and_then(process_identity);
                let token = cancel.clone();
                let stop_timeout = self.stop_timeout;
                let service = launch.service.clone();

                tokio::spawn(async move {
                    let code = tokio::select! {
                        status = child.wait() => exit_code(status),
                        () = token.cancelled() => terminate(&service, &mut child, stop_timeout).await,
                    };
                    debug!(service = %service, code, "process exited");
                    let _ = tx.send(Some(code));
                });

                (pid, identity)
            }
            None => {
                let token = cancel.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    let _ = tx.send(Some(0));
                });
                (None, None)
            }
        };

        info!(service = %launch.service, pid = ?pid, instance_id = %instance_id, "service started");

        self.processes.write().await.insert(
            instance_id,
            ManagedProcess {
                launch: launch.clone(),
                cancel,
                exit: rx,
            },
        );

        Ok(ServiceHandle {
            instance_id,
            service: launch.service.clone(),
            pid,
            identity,
        })
    }

    async fn probe(&self, handle: &ServiceHandle, check: &HealthCheck) -> Result<bool, RuntimeError> {
        let launch = {
            let processes = self.processes.read().await;
            let process = processes
                .get(&handle.instance_id)
                .ok_or_else(|| RuntimeError::UnknownInstance(handle.service.clone()))?;
            if process.exit.borrow().is_some() {
                // An exited process is never healthy.
                return Ok(false);
            }
            process.launch.clone()
        };

        let Some((program, args)) = check.test.split_first() else {
            return Ok(false);
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&launch.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let status = command.status().await.map_err(|source| RuntimeError::Spawn {
            service: handle.service.clone(),
            source,
        })?;

        Ok(status.success())
    }

    async fn wait(&self, handle: &ServiceHandle) -> Result<i32, RuntimeError> {
        let mut rx = self.receiver(handle).await?;
        let code = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| RuntimeError::UnknownInstance(handle.service.clone()))?;
        Ok(code.unwrap_or_default())
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<(), RuntimeError> {
        let Some(process) = self.processes.write().await.remove(&handle.instance_id) else {
            return Ok(());
        };

        process.cancel.cancel();
        let mut rx = process.exit;
        // The supervisor always reports, but don't hang teardown if it can't.
        let grace = self.stop_timeout + Duration::from_secs(5);
        if tokio::time::timeout(grace, rx.wait_for(Option::is_some)).await.is_err() {
            warn!(service = %handle.service, "timed out waiting for service to stop");
        }
        Ok(())
    }

    async fn release(&self, service: &str, pid: u32, identity: Option<&str>) -> Result<(), RuntimeError> {
        let Some(expected) = identity else {
            warn!(service, pid, "no identity recorded for process, leaving it alone");
            return Ok(());
        };
        let still_ours = || process_identity(pid).as_deref() == Some(expected);

        if !still_ours() {
            debug!(service, pid, "recorded process is gone or pid was reused");
            return Ok(());
        }

        let raw = i32::try_from(pid).map_err(|e| RuntimeError::Signal {
            pid,
            reason: e.to_string(),
        })?;
        let target = Pid::from_raw(raw);

        match kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                debug!(service, pid, "recorded process already gone");
                return Ok(());
            }
            Err(e) => {
                return Err(RuntimeError::Signal {
                    pid,
                    reason: e.to_string(),
                })
            }
        }

        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while tokio::time::Instant::now() < deadline {
            if !still_ours() {
                info!(service, pid, "released recorded process");
                return Ok(());
            }
            tokio::time::sleep(RELEASE_POLL_INTERVAL).await;
        }

        if !still_ours() {
            return Ok(());
        }
        warn!(service, pid, "process ignored SIGTERM, killing");
        match kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RuntimeError::Signal {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

/// `<boot id>:<start time>` of a live process, or `None` when it is gone,
/// a zombie, or `/proc` cannot be read.
pub fn process_identity(pid: u32) -> Option<String> {
    let boot_id = std::fs::read_to_string(BOOT_ID_PATH).ok()?;
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let start_time = parse_start_time(&stat)?;
    Some(format!("{}:{start_time}", boot_id.trim()))
}

/// Start time (field 22) from a `/proc/<pid>/stat` line; `None` for zombies.
///
/// The command name in field 2 may contain spaces and parentheses, so
/// fields are counted from the last `)`.
fn parse_start_time(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?;
    if state == "Z" || state == "X" {
        return None;
    }
    // `state` was field 3; start time is field 22.
    fields.nth(18)?.parse().ok()
}

/// SIGTERM, then SIGKILL after `stop_timeout`.
async fn terminate(service: &str, child: &mut Child, stop_timeout: Duration) -> i32 {
    if let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            warn!(service, error = %e, "failed to send SIGTERM");
        }
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(status) => exit_code(status),
        Err(_) => {
            warn!(service, "shutdown timeout, forcing kill");
            if let Err(e) = child.kill().await {
                warn!(service, error = %e, "failed to kill process");
            }
            exit_code(child.wait().await)
        }
    }
}

/// Shell-style exit code: the status code, or 128 + signal number.
fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or_default()),
        Err(e) => {
            warn!(error = %e, "failed to wait for process");
            1
        }
    }
}
