use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::types::app_state::ProcState;
use crate::types::StopHandle;

/// Mount commands attach asynchronously and never report readiness
/// themselves, so we give them a fixed settle time before declaring
/// the layer usable.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Pause before re-probing when the mount point is still held by
/// another process.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(200);

/// The three command templates every supervised mount needs. Argument
/// lists, no shell involved.
#[derive(Debug, Clone)]
pub struct MountCommands {
    /// Long-running mount command.
    pub mount: Vec<String>,
    /// One-shot unmount. Must be idempotent; a non-zero exit means the
    /// environment is misconfigured and takes the whole program down.
    pub unmount: Vec<String>,
    /// One-shot busy probe (lsof style): exit zero = mount point in use.
    pub probe: Vec<String>,
}

/// An independent mount signals readiness once its command has settled;
/// a dependent mount blocks on that signal before every (re)start.
pub enum MountRole {
    Independent { ready: mpsc::Sender<()> },
    Dependent { ready: mpsc::Receiver<()> },
}

pub struct MountHost {
    name: String,
    source: String,
    mount_point: String,
    commands: MountCommands,
    role: MountRole,
    settle: Duration,
    killed: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    kill_rx: Option<oneshot::Receiver<()>>,
    status: Arc<dashmap::DashMap<String, ProcState>>,
}

impl MountHost {
    pub fn independent(
        name: &str,
        source: &str,
        mount_point: &str,
        commands: MountCommands,
        ready: mpsc::Sender<()>,
        status: Arc<dashmap::DashMap<String, ProcState>>,
    ) -> (MountHost, StopHandle) {
        Self::new(
            name,
            source,
            mount_point,
            commands,
            MountRole::Independent { ready },
            status,
        )
    }

    pub fn dependent(
        name: &str,
        source: &str,
        mount_point: &str,
        commands: MountCommands,
        ready: mpsc::Receiver<()>,
        status: Arc<dashmap::DashMap<String, ProcState>>,
    ) -> (MountHost, StopHandle) {
        Self::new(
            name,
            source,
            mount_point,
            commands,
            MountRole::Dependent { ready },
            status,
        )
    }

    fn new(
        name: &str,
        source: &str,
        mount_point: &str,
        commands: MountCommands,
        role: MountRole,
        status: Arc<dashmap::DashMap<String, ProcState>>,
    ) -> (MountHost, StopHandle) {
        let (stop, kill_rx) = StopHandle::new();
        let host = MountHost {
            name: name.to_owned(),
            source: source.to_owned(),
            mount_point: mount_point.to_owned(),
            commands,
            role,
            settle: SETTLE_DELAY,
            killed: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            kill_rx: Some(kill_rx),
            status,
        };
        (host, stop)
    }

    #[cfg(test)]
    pub fn with_settle_delay(mut self, settle: Duration) -> MountHost {
        self.settle = settle;
        self
    }

    #[cfg(test)]
    pub fn killed_flag(&self) -> Arc<AtomicBool> {
        self.killed.clone()
    }

    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Supervision loop: unmount, probe, mount, wait, repeat - until the
    /// stop handle fires. Runs until cancelled.
    pub async fn run(mut self) {
        let Some(kill_rx) = self.kill_rx.take() else {
            return;
        };

        self.status.insert(self.name.clone(), ProcState::Stopped);

        // Cancellation watcher. Unmounts right away on a stop request so
        // shutdown does not have to wait for the mount command to exit on
        // its own.
        {
            let killed = self.killed.clone();
            let unmount = self.commands.unmount.clone();
            let name = self.name.clone();
            let status = self.status.clone();
            tokio::spawn(async move {
                if kill_rx.await.is_err() {
                    // stop handle dropped without firing, no stop will ever come
                    return;
                }
                tracing::info!("[{}] Stop requested, unmounting", name);
                status.insert(name.clone(), ProcState::Stopping);
                killed.store(true, Ordering::SeqCst);
                run_cleanup(&name, &unmount).await;
            });
        }

        loop {
            // A dependent mount has nothing to stack on until the lower
            // layer is up. Any signal value means go.
            if let MountRole::Dependent { ready } = &mut self.role {
                tracing::debug!("[{}] Waiting for the lower mount to come up", self.name);
                if ready.recv().await.is_none() {
                    break;
                }
            }

            // Unmount before every (re)start attempt, mounted or not.
            // The unmount command is idempotent by contract.
            run_cleanup(&self.name, &self.commands.unmount).await;

            // This is a new mount session
            self.killed.store(false, Ordering::SeqCst);

            if self.in_use().await {
                tracing::debug!(
                    "[{}] {} is still in use, skipping this attempt",
                    self.name,
                    self.mount_point
                );
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
                continue;
            }

            self.status.insert(self.name.clone(), ProcState::Starting);
            tracing::info!(
                "[{}] Mounting {} at {}",
                self.name,
                self.source,
                self.mount_point
            );
            tracing::debug!("[{}] Args: {:?}", self.name, self.commands.mount);

            let mut child = match Command::new(&self.commands.mount[0])
                .args(&self.commands.mount[1..])
                .stdin(Stdio::null())
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    self.status.insert(self.name.clone(), ProcState::Faulty);
                    fatal(&self.name, "failed to start the mount command", e)
                }
            };

            self.status.insert(self.name.clone(), ProcState::Running);

            tokio::time::sleep(self.settle).await;

            if let MountRole::Independent { ready } = &self.role {
                // Capacity-1 slot. A still-unconsumed signal from an earlier
                // attempt is enough to release the dependent, so a full slot
                // is not an error.
                _ = ready.try_send(());
            }

            match child.wait().await {
                Ok(exit) => {
                    tracing::info!("[{}] Mount command exited: {}", self.name, exit)
                }
                Err(e) => {
                    tracing::warn!("[{}] Failed waiting for the mount command: {e:?}", self.name)
                }
            }

            if self.killed.load(Ordering::SeqCst) {
                break;
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        self.status.insert(self.name.clone(), ProcState::Stopped);
        tracing::warn!("[{}] Stopped.", self.name);
    }

    /// Runs the busy probe. Exit zero means something still holds the
    /// mount point and we must not mount over it.
    async fn in_use(&self) -> bool {
        let probe = &self.commands.probe;
        let result = Command::new(&probe[0])
            .args(&probe[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) => status.success(),
            Err(e) => fatal(&self.name, "failed to run the busy probe", e),
        }
    }
}

/// Runs a one-shot unmount command to completion. Both a spawn failure
/// and a non-zero exit are fatal misconfigurations, not transient faults.
pub(crate) async fn run_cleanup(name: &str, unmount: &[String]) {
    let result = Command::new(&unmount[0])
        .args(&unmount[1..])
        .stdin(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => fatal(name, "unmount command failed", status),
        Err(e) => fatal(name, "failed to start the unmount command", e),
    }
}

/// Required commands that cannot be started or that fail outright mean
/// the environment is not set up as required. There is no partial
/// degradation mode: take the whole program down.
fn fatal(name: &str, what: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!("[{name}] {what}: {err}");
    std::process::exit(1)
}
