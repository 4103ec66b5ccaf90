#![warn(unused_extern_crates)]

mod configuration;
mod logging;
mod mount_host;
mod move_host;
mod tests;
mod timespan;
mod types;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use configuration::Config;
use mount_host::MountHost;
use move_host::MoveHost;
use types::app_state::AppState;
use types::args::Args;
use types::StopHandle;

fn initialize_configuration(args: &Args) -> anyhow::Result<Config> {
    let cfg_path = if let Some(cfg) = &args.configuration {
        cfg.to_string()
    } else if std::fs::metadata("mount-box.toml").is_ok() {
        "mount-box.toml".to_owned()
    } else {
        "Config.toml".to_owned()
    };

    let contents = std::fs::read_to_string(&cfg_path)
        .with_context(|| format!("failed to read configuration file {cfg_path:?}"))?;

    let config = Config::parse(&contents)?;
    config.is_valid()?;
    Ok(config)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init {
        let path = "mount-box.toml";
        if std::path::Path::new(path).exists() {
            anyhow::bail!("File already exists: {path}")
        }
        Config::example().write_to_disk(path)?;
        println!("Configuration file written to {path}");
        return Ok(());
    }

    let config = initialize_configuration(&args)?;
    logging::init_logging(config.log_level.clone());

    // Missing binaries are the same fatal misconfiguration class the
    // supervision loops abort on, better to catch them before mounting.
    config.resolve_binaries()?;

    let state = Arc::new(AppState::new());

    let local_dir = config.resolve_local_dir()?;
    let cache_dir = config.resolve_cache_dir()?;
    let union_dir = config.resolve_union_dir()?;

    // Readiness gate: the union layer stacks on the remote mount and may
    // only start once that one has settled.
    let (ready_tx, ready_rx) = tokio::sync::mpsc::channel::<()>(1);

    let (remote_host, remote_stop) = MountHost::independent(
        "remote",
        &format!("{}:", config.remote),
        &local_dir,
        config.remote_mount_commands()?,
        ready_tx,
        state.proc_status_map.clone(),
    );

    let (union_host, union_stop) = MountHost::dependent(
        "union",
        &cache_dir,
        &union_dir,
        config.union_mount_commands()?,
        ready_rx,
        state.proc_status_map.clone(),
    );

    let (mut move_host, move_stop) = MoveHost::new(&cache_dir, config.move_command());
    if let Some(schedule) = &config.move_schedule {
        move_host.set_schedule(schedule);
    }
    if let Some(interval) = &config.move_interval {
        // is_valid already vetted this, but the setter keeps its own guard
        if !move_host.set_interval(interval) {
            tracing::warn!(
                "Invalid move_interval in configuration, keeping {:?}",
                move_host.sleep_time()
            );
        }
    }

    tokio::spawn(relay_signals(
        remote_stop,
        union_stop,
        move_stop,
        state.clone(),
    ));

    let remote_stopped = remote_host.stopped_flag();
    let union_stopped = union_host.stopped_flag();

    tokio::spawn(remote_host.run());
    tokio::spawn(union_host.run());
    let mover = tokio::spawn(move_host.run());

    tracing::info!(
        "mount-box started successfully. SIGINT stops the mounts, SIGQUIT stops everything."
    );

    // The move loop only ends after a hard stop. The mount loops were
    // signalled at the same time and their stop watchers already ran the
    // unmount commands, so we do not wait for them here.
    _ = mover.await;

    if state.exit.load(Ordering::SeqCst) {
        tracing::warn!("mount-box is shutting down..");
    }
    if !remote_stopped.load(Ordering::SeqCst) || !union_stopped.load(Ordering::SeqCst) {
        tracing::warn!("Exiting without waiting for the mount loops, their unmounts already ran");
    }
    for entry in state.proc_status_map.iter() {
        tracing::info!("[{}] Final state: {:?}", entry.key(), entry.value());
    }
    tracing::info!("mount-box exited successfully");

    Ok(())
}

/// SIGINT = soft stop: bring the mounts down but keep moving cached writes.
/// SIGQUIT = hard stop: stop all three loops; main exits once the move
/// loop has wound down.
#[cfg(unix)]
async fn relay_signals(
    mut remote_stop: StopHandle,
    mut union_stop: StopHandle,
    mut move_stop: StopHandle,
    state: Arc<AppState>,
) {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
        tracing::error!("Failed to install the SIGINT handler");
        return;
    };
    let Ok(mut sigquit) = signal(SignalKind::quit()) else {
        tracing::error!("Failed to install the SIGQUIT handler");
        return;
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::warn!("SIGINT received, stopping the mounts");
                union_stop.signal();
                remote_stop.signal();
            }
            _ = sigquit.recv() => {
                tracing::warn!("SIGQUIT received, stopping everything");
                union_stop.signal();
                remote_stop.signal();
                move_stop.signal();
                state.exit.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

/// No distinct soft stop off unix, ctrl-c stops everything.
#[cfg(not(unix))]
async fn relay_signals(
    mut remote_stop: StopHandle,
    mut union_stop: StopHandle,
    mut move_stop: StopHandle,
    state: Arc<AppState>,
) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Ctrl-C received, stopping everything");
        union_stop.signal();
        remote_stop.signal();
        move_stop.signal();
        state.exit.store(true, Ordering::SeqCst);
    }
}
