use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Notify;

use crate::types::StopHandle;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Periodically pushes locally cached writes back to the remote by
/// running the move command to completion, then sleeping for the
/// configured interval. One invocation at a time, never overlapping.
pub struct MoveHost {
    /// Working directory for the move command (the cache layer).
    source: PathBuf,
    command: Vec<String>,
    sleep_time: Duration,
    killed: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    /// Interrupts the between-runs sleep when a stop request arrives.
    wake: Arc<Notify>,
    /// Pid of the in-flight move command, if any.
    active_pid: Arc<Mutex<Option<u32>>>,
    kill_rx: Option<tokio::sync::oneshot::Receiver<()>>,
}

impl MoveHost {
    pub fn new(source: impl Into<PathBuf>, command: Vec<String>) -> (MoveHost, StopHandle) {
        let (stop, kill_rx) = StopHandle::new();
        let host = MoveHost {
            source: source.into(),
            command,
            sleep_time: DEFAULT_INTERVAL,
            killed: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            active_pid: Arc::new(Mutex::new(None)),
            kill_rx: Some(kill_rx),
        };
        (host, stop)
    }

    /// Appends a bandwidth/time-window schedule to every future move
    /// invocation. The format is rclone's, we pass it through verbatim.
    pub fn set_schedule(&mut self, schedule: &str) {
        self.command.push(format!("--bwlimit={schedule}"));
    }

    /// Sets the sleep interval from a timespan string ("90", "15m", "6h"..).
    /// Returns false and keeps the previous interval when the input does
    /// not parse.
    pub fn set_interval(&mut self, input: &str) -> bool {
        match crate::timespan::parse_seconds(input) {
            Ok(seconds) => {
                self.sleep_time = Duration::from_secs(seconds);
                true
            }
            Err(e) => {
                tracing::warn!("[mover] Ignoring invalid interval: {e}");
                false
            }
        }
    }

    pub fn sleep_time(&self) -> Duration {
        self.sleep_time
    }

    #[cfg(test)]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    #[cfg(test)]
    pub fn killed_flag(&self) -> Arc<AtomicBool> {
        self.killed.clone()
    }

    #[cfg(test)]
    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// Scheduler loop: run the move command to completion, sleep, repeat.
    /// The stop watcher interrupts the in-flight command gracefully so a
    /// partially completed transfer can finish its current file.
    pub async fn run(mut self) {
        let Some(kill_rx) = self.kill_rx.take() else {
            return;
        };

        {
            let killed = self.killed.clone();
            let wake = self.wake.clone();
            let active_pid = self.active_pid.clone();
            tokio::spawn(async move {
                if kill_rx.await.is_err() {
                    return;
                }
                tracing::info!("[mover] Stop requested");
                killed.store(true, Ordering::SeqCst);
                let pid = active_pid.lock().map(|p| *p).unwrap_or(None);
                if let Some(pid) = pid {
                    // SIGINT rather than SIGKILL: rclone stops accepting new
                    // transfers but finishes the file it is on.
                    interrupt(pid);
                }
                wake.notify_one();
            });
        }

        loop {
            if self.killed.load(Ordering::SeqCst) {
                break;
            }

            self.run_once().await;

            if self.killed.load(Ordering::SeqCst) {
                break;
            }

            tracing::debug!("[mover] Sleeping for {:?}", self.sleep_time);
            tokio::select! {
                _ = tokio::time::sleep(self.sleep_time) => {}
                _ = self.wake.notified() => {}
            }

            if self.killed.load(Ordering::SeqCst) {
                break;
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        tracing::warn!("[mover] Stopped.");
    }

    /// One blocking move invocation. Failure here is not fatal, the next
    /// cycle simply tries again.
    async fn run_once(&self) {
        tracing::info!("[mover] Moving cached writes back to the remote");
        tracing::debug!("[mover] Args: {:?}", self.command);

        let child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .current_dir(&self.source)
            .stdin(Stdio::null())
            .spawn();

        match child {
            Ok(mut child) => {
                if let Ok(mut guard) = self.active_pid.lock() {
                    *guard = child.id();
                }
                match child.wait().await {
                    Ok(exit) => tracing::info!("[mover] Move command exited: {}", exit),
                    Err(e) => {
                        tracing::warn!("[mover] Failed waiting for the move command: {e:?}")
                    }
                }
                if let Ok(mut guard) = self.active_pid.lock() {
                    *guard = None;
                }
            }
            Err(e) => {
                tracing::warn!("[mover] Failed to start the move command: {e:?}");
            }
        }
    }
}

#[cfg(unix)]
fn interrupt(pid: u32) {
    use nix::sys::signal::kill;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        tracing::warn!("[mover] Failed to interrupt the move command (pid {pid}): {e}");
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) {}
