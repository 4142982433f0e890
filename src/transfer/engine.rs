//  ZFS Replication Supervisor
//  Copyright (C) 2025  Ifaz Kabir

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The executor (C7 background worker, spec §4.7.2): owns the process
//! group from `Start()`/`Resume()` onward. One OS thread per live
//! transfer, per spec §5's "Parallel workers on an OS-thread pool".
//!
//! Steps 6 ("signal forwarder") and 7 ("progress poller" + "watchdog") of
//! spec §4.7.2 are folded into a single polling loop here: the same
//! `waitpid(WNOHANG)` tick that would drive a separate poller thread also
//! tells us whether the child is still alive, so a dedicated forwarder
//! thread buys nothing a 1-second tick doesn't already give us. `SIGUSR1`
//! pass-through (spec §5) is exposed as [`TransferManager::send_signal`]
//! rather than a standing forwarder, since nothing needs to *react* to it
//! beyond relaying the signal once.

use super::config::TransferConfig;
use super::initial_send;
use super::log_truncate;
use super::manager::{Registry, TransferManager};
use super::pipeline;
use super::record::{Phase, TransferAction, TransferStatus};
use crate::event::{LifecycleEvent, Operation};
use crate::sys;
use chrono::Utc;
use log::{error, info, warn};
use nix::sys::signal::Signal;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use uuid::Uuid;

const PROGRESS_TICK: Duration = Duration::from_secs(5);
const WATCHDOG_AFTER_PID_GONE: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub fn spawn_executor(manager: &TransferManager, id: Uuid) {
    let registry = manager.registry_handle();
    let store = manager.store_handle();
    let sink = manager.sink_handle();
    let known_hosts = manager.managed_known_hosts_path().to_string();
    std::thread::spawn(move || run(registry, store, sink, known_hosts, id));
}

fn run(
    registry: Registry,
    store: std::sync::Arc<super::store::TransferStore>,
    sink: std::sync::Arc<dyn crate::event::EventSink>,
    managed_known_hosts_path: String,
    id: Uuid,
) {
    {
        let mut guard = registry.write().expect("registry lock poisoned");
        let Some(record) = guard.get_mut(&id) else {
            return;
        };
        record.status = TransferStatus::Running;
        record.started_at = Some(Utc::now());
        let _ = store.persist(record);
        sink.emit(LifecycleEvent::new(Operation::Started, record));
    }

    let mut config = { registry.read().unwrap().get(&id).unwrap().config.clone() };

    if config.is_incremental() {
        let from = config.send.from_snapshot.clone().unwrap();
        match initial_send::target_snapshot_exists(&config.receive, &from, &managed_known_hosts_path) {
            Ok(true) => {
                set_phase(&registry, &store, id, Phase::IncrementalSend);
            }
            Ok(false) => {
                info!("transfer {id}: target lacks base snapshot, synthesizing initial send");
                set_phase(&registry, &store, id, Phase::InitialSend);
                let initial_config = TransferConfig {
                    send: initial_send::synthesize_initial_send(&config.send),
                    receive: config.receive.clone(),
                    log: config.log.clone(),
                };
                match run_pipeline_phase(&registry, &store, id, &initial_config, &managed_known_hosts_path, true) {
                    PhaseOutcome::Completed => {
                        set_phase(&registry, &store, id, Phase::IncrementalSend);
                    }
                    outcome => {
                        finish(&registry, &store, &sink, id, outcome, &config);
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("transfer {id}: snapshot existence probe failed: {e}; proceeding with incremental");
                set_phase(&registry, &store, id, Phase::IncrementalSend);
            }
        }
    } else {
        set_phase(&registry, &store, id, Phase::FullSend);
    }

    config = { registry.read().unwrap().get(&id).unwrap().config.clone() };
    let outcome = run_pipeline_phase(&registry, &store, id, &config, &managed_known_hosts_path, false);
    finish(&registry, &store, &sink, id, outcome, &config);
}

enum PhaseOutcome {
    Completed,
    Cancelled,
    Failed(String),
    PartiallyComplete(String),
}

fn set_phase(registry: &Registry, store: &super::store::TransferStore, id: Uuid, phase: Phase) {
    let mut guard = registry.write().unwrap();
    if let Some(record) = guard.get_mut(&id) {
        record.progress.phase = Some(phase);
        record.progress.phase_description = Some(phase.description().to_string());
        let _ = store.persist(record);
    }
}

/// Runs one send|receive pipeline phase to completion, updating progress
/// and watching for pending pause/stop actions. `is_initial` controls
/// whether the log sidecar is truncated (fresh start) or appended to
/// (continuing into the incremental phase).
fn run_pipeline_phase(
    registry: &Registry,
    store: &super::store::TransferStore,
    id: Uuid,
    config: &TransferConfig,
    managed_known_hosts_path: &str,
    is_initial: bool,
) -> PhaseOutcome {
    let log_path = { registry.read().unwrap().get(&id).unwrap().sidecars.log_file.clone() };

    let pipeline_str = match pipeline::assemble_pipeline(&config.send, &config.receive, managed_known_hosts_path) {
        Ok(s) => s,
        Err(e) => return PhaseOutcome::Failed(format!("failed to assemble pipeline: {e}")),
    };

    let mut log_file = match OpenOptions::new()
        .create(true)
        .append(!is_initial)
        .truncate(is_initial)
        .write(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => return PhaseOutcome::Failed(format!("could not create log sidecar: {e}")),
    };
    let _ = writeln!(log_file, "--- pipeline: {pipeline_str}");

    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(&pipeline_str);
    cmd.stdin(Stdio::null());
    cmd.stdout(log_file.try_clone().ok().map(Stdio::from).unwrap_or(Stdio::null()));
    cmd.stderr(log_file.try_clone().ok().map(Stdio::from).unwrap_or(Stdio::null()));

    let child = match sys::spawn_process_group(&mut cmd) {
        Ok(c) => c,
        Err(e) => return PhaseOutcome::Failed(format!("failed to spawn pipeline: {e}")),
    };
    let leader_pid = child.id() as i32;

    {
        let mut guard = registry.write().unwrap();
        if let Some(record) = guard.get_mut(&id) {
            record.pid = leader_pid;
            if let Err(e) = store.persist(record) {
                error!("transfer {id}: failed to persist leader pid, killing pipeline: {e}");
                let _ = sys::terminate_group(leader_pid, Duration::from_millis(100));
                return PhaseOutcome::Failed(format!("could not persist pid: {e}"));
            }
        }
    }

    let mut ticks = 0u64;
    let mut pid_missing_since: Option<Instant> = None;
    let outcome = loop {
        let reaped = sys::try_reap(leader_pid);

        // Read pending action and (reaped) status together, in that order
        // (spec §4.7.2 step 8): `pause()`/`stop()` send SIGTERM before
        // writing back `paused`/`cancelled`, so the child can die from that
        // very signal and get reaped here before the manager call finishes.
        // A pending Pause/Stop always means Cancelled, regardless of what
        // the raw exit status says.
        let pending_action = {
            let guard = registry.read().unwrap();
            match guard.get(&id) {
                Some(record) => record.pending_action,
                None => break PhaseOutcome::Cancelled,
            }
        };
        match pending_action {
            TransferAction::Pause | TransferAction::Stop => break PhaseOutcome::Cancelled,
            _ => {}
        }

        if let Some(status) = reaped {
            break status_to_outcome(status, &log_path);
        }
        if !sys::group_alive(leader_pid) {
            let now = Instant::now();
            let missing_since = *pid_missing_since.get_or_insert(now);
            if now.duration_since(missing_since) >= WATCHDOG_AFTER_PID_GONE {
                break PhaseOutcome::Failed(
                    "watchdog: process group disappeared without a reapable exit status".to_string(),
                );
            }
        } else {
            pid_missing_since = None;
        }

        std::thread::sleep(POLL_INTERVAL);
        ticks += 1;
        if ticks % (PROGRESS_TICK.as_millis() / POLL_INTERVAL.as_millis()) as u64 == 0 {
            update_progress(registry, store, id);
        }
    };
    outcome
}

fn status_to_outcome(status: nix::sys::wait::WaitStatus, log_path: &std::path::Path) -> PhaseOutcome {
    use nix::sys::wait::WaitStatus::*;
    match status {
        Exited(_, 0) => PhaseOutcome::Completed,
        Exited(_, _code) | Signaled(_, _, _) => {
            let tail = log_truncate::tail(log_path, 200);
            if tail.contains("partially-complete state") || tail.contains("kernel modules must be upgraded") {
                PhaseOutcome::PartiallyComplete(tail)
            } else {
                PhaseOutcome::Failed(tail)
            }
        }
        _ => PhaseOutcome::Failed("unexpected wait status".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::Pid;

    fn write_log(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "zreplicate-engine-test-{}-{:?}.log",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn clean_exit_is_completed() {
        let log = write_log("ok\n");
        let outcome = status_to_outcome(WaitStatus::Exited(Pid::from_raw(1), 0), &log);
        assert!(matches!(outcome, PhaseOutcome::Completed));
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn nonzero_exit_without_partial_marker_is_failed() {
        let log = write_log("cannot receive incremental stream: dataset does not exist\n");
        let outcome = status_to_outcome(WaitStatus::Exited(Pid::from_raw(1), 1), &log);
        assert!(matches!(outcome, PhaseOutcome::Failed(_)));
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn partially_complete_marker_reverts_to_paused_hint() {
        let log = write_log("cannot receive: destination has been modified, cannot resume\nreceive is in a partially-complete state\n");
        let outcome = status_to_outcome(WaitStatus::Exited(Pid::from_raw(1), 1), &log);
        assert!(matches!(outcome, PhaseOutcome::PartiallyComplete(_)));
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn kernel_modules_marker_also_reverts_to_paused_hint() {
        let log = write_log("internal error: kernel modules must be upgraded to receive this stream.\n");
        let outcome = status_to_outcome(WaitStatus::Exited(Pid::from_raw(1), 1), &log);
        assert!(matches!(outcome, PhaseOutcome::PartiallyComplete(_)));
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn signaled_without_partial_marker_is_failed() {
        let log = write_log("killed\n");
        let outcome = status_to_outcome(
            WaitStatus::Signaled(Pid::from_raw(1), nix::sys::signal::Signal::SIGKILL, false),
            &log,
        );
        assert!(matches!(outcome, PhaseOutcome::Failed(_)));
        let _ = std::fs::remove_file(&log);
    }
}

fn update_progress(registry: &Registry, store: &super::store::TransferStore, id: Uuid) {
    let mut guard = registry.write().unwrap();
    if let Some(record) = guard.get_mut(&id) {
        let now = Utc::now();
        if let Some(started) = record.started_at {
            record.progress.elapsed_seconds = (now - started).num_seconds().max(0) as u64;
        }
        record.progress.last_update = Some(now);
        let _ = store.persist(record);
    }
}

fn finish(
    registry: &Registry,
    store: &super::store::TransferStore,
    sink: &std::sync::Arc<dyn crate::event::EventSink>,
    id: Uuid,
    outcome: PhaseOutcome,
    config: &TransferConfig,
) {
    let mut guard = registry.write().unwrap();
    let Some(record) = guard.get_mut(&id) else {
        return;
    };

    // A concurrent Pause/Stop call already moved the record out of
    // `running` (possibly finishing and resetting `pending_action` to
    // `None` before this reap tick runs — `Pause`'s 100ms grace window is
    // much shorter than the executor's poll interval, so this is the
    // common case, not a rare one). Once the record is no longer
    // `running`, the manager call is the sole owner of its terminal
    // status and the executor must not clobber it (spec §4.7.2 step 8,
    // §4.7.4 concurrency discipline).
    if record.status != TransferStatus::Running {
        record.pending_action = TransferAction::None;
        let _ = store.persist(record);
        return;
    }

    let (operation, status, error) = match outcome {
        PhaseOutcome::Completed => (Operation::Completed, TransferStatus::Completed, None),
        PhaseOutcome::Cancelled => (Operation::Cancelled, TransferStatus::Cancelled, None),
        PhaseOutcome::Failed(tail) => (Operation::Failed, TransferStatus::Failed, Some(tail)),
        PhaseOutcome::PartiallyComplete(tail) => {
            record.status = TransferStatus::Paused;
            record.last_paused_at = Some(Utc::now());
            record.retry_hint = Some(
                "receive reported a partially-complete state; retry Resume once the target settles"
                    .to_string(),
            );
            record.error = Some(tail);
            record.pid = 0;
            record.pending_action = TransferAction::None;
            let _ = store.persist(record);
            return;
        }
    };

    record.pending_action = TransferAction::None;
    record.set_terminal(status, error);
    record.pid = 0;
    let _ = store.persist(record);
    sink.emit(LifecycleEvent::new(operation, record));

    if let Some(log_config) = &config.log {
        let _ = log_truncate::truncate_if_needed(&record.sidecars.log_file, log_config, status);
    }
    let _ = store.delete_pid_file(record);
}

/// `SIGUSR1` pass-through to request a verbose progress line from the
/// `zfs send` process (spec §5 "Signal policy").
pub fn send_usr1(pid: i32) {
    let _ = sys::kill_group(pid, Signal::SIGUSR1);
}
