use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;

use crate::mount_host::run_cleanup;
use crate::mount_host::MountCommands;
use crate::mount_host::MountHost;
use crate::move_host::MoveHost;
use crate::types::app_state::ProcState;

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

fn status_map() -> Arc<DashMap<String, ProcState>> {
    Arc::new(DashMap::new())
}

async fn wait_for_flag(flag: &Arc<AtomicBool>, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    flag.load(Ordering::SeqCst)
}

async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    path.exists()
}

#[tokio::test]
async fn busy_probe_gates_the_mount_command() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("mounted");

    let commands = MountCommands {
        mount: sh(&format!("touch {}; sleep 1", marker.display())),
        unmount: sh("true"),
        // probe reports "in use" forever
        probe: sh("exit 0"),
    };

    let (ready_tx, _ready_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (host, mut stop) = MountHost::independent(
        "busy",
        "src",
        "/tmp/busy-test",
        commands,
        ready_tx,
        status_map(),
    );
    let host = host.with_settle_delay(Duration::from_millis(10));

    tokio::spawn(host.run());
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(
        !marker.exists(),
        "mount command must never start while the probe reports busy"
    );
    stop.signal();
}

#[tokio::test]
async fn dependent_mount_waits_for_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let lower_marker = dir.path().join("lower");
    let upper_marker = dir.path().join("upper");

    let lower_commands = MountCommands {
        mount: sh(&format!("touch {}; sleep 2", lower_marker.display())),
        unmount: sh("true"),
        probe: sh("exit 1"),
    };
    let upper_commands = MountCommands {
        mount: sh(&format!("touch {}; sleep 2", upper_marker.display())),
        unmount: sh("true"),
        probe: sh("exit 1"),
    };

    let (ready_tx, ready_rx) = tokio::sync::mpsc::channel::<()>(1);
    let status = status_map();

    let (lower, mut lower_stop) = MountHost::independent(
        "lower",
        "remote:",
        "/tmp/lower",
        lower_commands,
        ready_tx,
        status.clone(),
    );
    let lower = lower.with_settle_delay(Duration::from_millis(150));

    let (upper, mut upper_stop) = MountHost::dependent(
        "upper",
        "/tmp/cache",
        "/tmp/upper",
        upper_commands,
        ready_rx,
        status.clone(),
    );
    let upper = upper.with_settle_delay(Duration::from_millis(10));

    let lower_stopped = lower.stopped_flag();
    let upper_stopped = upper.stopped_flag();
    let lower_killed = lower.killed_flag();
    let upper_killed = upper.killed_flag();

    // the dependent alone makes no progress
    tokio::spawn(upper.run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !upper_marker.exists(),
        "dependent mount must not start before readiness is signalled"
    );

    // once the lower mount settles, the dependent follows
    tokio::spawn(lower.run());
    assert!(wait_for_file(&lower_marker, Duration::from_secs(2)).await);
    assert!(
        wait_for_file(&upper_marker, Duration::from_secs(2)).await,
        "dependent mount should start after the readiness signal"
    );

    // hard-stop style: both hosts get cancelled
    lower_stop.signal();
    upper_stop.signal();

    assert!(wait_for_flag(&lower_stopped, Duration::from_secs(5)).await);
    assert!(wait_for_flag(&upper_stopped, Duration::from_secs(5)).await);
    assert!(lower_killed.load(Ordering::SeqCst));
    assert!(upper_killed.load(Ordering::SeqCst));
    assert_eq!(*status.get("lower").unwrap(), ProcState::Stopped);
    assert_eq!(*status.get("upper").unwrap(), ProcState::Stopped);
}

#[tokio::test]
async fn move_host_interrupts_inflight_command_on_stop() {
    let dir = tempfile::tempdir().unwrap();

    let (mut host, mut stop) = MoveHost::new(dir.path(), vec!["/bin/sleep".into(), "30".into()]);
    assert!(host.set_interval("1h"));
    assert_eq!(host.sleep_time(), Duration::from_secs(3600));

    let killed = host.killed_flag();
    let stopped = host.stopped_flag();

    let started = Instant::now();
    tokio::spawn(host.run());
    tokio::time::sleep(Duration::from_millis(300)).await;

    stop.signal();

    assert!(
        wait_for_flag(&stopped, Duration::from_secs(5)).await,
        "the move loop should end once the in-flight command was interrupted"
    );
    assert!(killed.load(Ordering::SeqCst));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the sleep 30 child should have been interrupted, not awaited"
    );
}

#[tokio::test]
async fn soft_stop_leaves_the_move_host_running() {
    let dir = tempfile::tempdir().unwrap();

    let commands = MountCommands {
        mount: sh("sleep 2"),
        unmount: sh("true"),
        probe: sh("exit 1"),
    };
    let (ready_tx, _ready_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (mount, mut mount_stop) = MountHost::independent(
        "remote",
        "remote:",
        "/tmp/soft",
        commands,
        ready_tx,
        status_map(),
    );
    let mount = mount.with_settle_delay(Duration::from_millis(10));
    let mount_stopped = mount.stopped_flag();

    let (mut mover, mut move_stop) = MoveHost::new(dir.path(), sh("true"));
    assert!(mover.set_interval("1h"));
    let move_killed = mover.killed_flag();
    let move_stopped = mover.stopped_flag();

    tokio::spawn(mount.run());
    tokio::spawn(mover.run());
    tokio::time::sleep(Duration::from_millis(300)).await;

    // soft stop: only the mount is cancelled
    mount_stop.signal();
    assert!(wait_for_flag(&mount_stopped, Duration::from_secs(5)).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!move_killed.load(Ordering::SeqCst));
    assert!(!move_stopped.load(Ordering::SeqCst));

    // hard stop reaches the mover too, waking it mid-sleep
    move_stop.signal();
    assert!(wait_for_flag(&move_stopped, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn repeated_stop_signals_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    let (mut mover, mut stop) = MoveHost::new(dir.path(), sh("true"));
    assert!(mover.set_interval("1h"));
    let stopped = mover.stopped_flag();

    tokio::spawn(mover.run());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // soft stop then hard stop hit the same handle twice in practice
    stop.signal();
    stop.signal();
    assert!(wait_for_flag(&stopped, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn cleanup_is_idempotent_by_contract() {
    // nothing mounted, run the cleanup twice in a row; a compliant
    // cleanup command exits zero both times and nothing aborts
    let unmount = sh("true");
    run_cleanup("test", &unmount).await;
    run_cleanup("test", &unmount).await;
}

#[tokio::test]
async fn interval_setter_keeps_previous_value_on_garbage() {
    let (mut host, _stop) = MoveHost::new("/tmp", vec!["true".into()]);
    assert_eq!(host.sleep_time(), Duration::from_secs(6 * 60 * 60));

    assert!(host.set_interval("90"));
    assert_eq!(host.sleep_time(), Duration::from_secs(90));

    assert!(!host.set_interval("bad"));
    assert_eq!(host.sleep_time(), Duration::from_secs(90));
}

#[tokio::test]
async fn schedule_is_appended_to_the_command() {
    let (mut host, _stop) = MoveHost::new("/tmp", vec!["rclone".into(), "move".into()]);
    host.set_schedule("07:00,1M 23:00,off");
    assert_eq!(
        host.command().last().unwrap(),
        "--bwlimit=07:00,1M 23:00,off"
    );
}
