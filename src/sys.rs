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

//! Process-group spawning and signaling helpers.
//!
//! Every pipeline the executor spawns (`bash -c "sudo zfs send ... | ...
//! sudo zfs receive ..."`) is a shell that forks further children. The
//! supervisor never signals the shell alone: it always addresses the whole
//! process group via the negated leader pid, as spec'd in
//! "Process groups over single processes".

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

/// Spawns `cmd`, making the child the leader of a new process group (its
/// pid becomes its own pgid). Callers signal the group with
/// [`kill_group`]/[`terminate_group`] rather than the leader alone.
pub fn spawn_process_group(cmd: &mut Command) -> io::Result<Child> {
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }
    cmd.spawn()
}

/// Sends `signal` to the process group led by `leader_pid` (negated pid).
/// Returns `Ok(())` if the group is already gone (`ESRCH`).
pub fn kill_group(leader_pid: i32, sig: Signal) -> io::Result<()> {
    if leader_pid <= 0 {
        return Ok(());
    }
    match signal::kill(Pid::from_raw(-leader_pid), sig) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

/// `SIGTERM` the group, wait briefly, then `SIGKILL` if it is still alive.
/// Used by Pause/Stop/Shutdown per spec's escalation policy.
pub fn terminate_group(leader_pid: i32, grace: std::time::Duration) -> io::Result<()> {
    kill_group(leader_pid, Signal::SIGTERM)?;
    std::thread::sleep(grace);
    if group_alive(leader_pid) {
        kill_group(leader_pid, Signal::SIGKILL)?;
    }
    Ok(())
}

/// Best-effort liveness check for the group leader. A process group is
/// considered alive as long as its leader still answers signal 0.
pub fn group_alive(leader_pid: i32) -> bool {
    if leader_pid <= 0 {
        return false;
    }
    signal::kill(Pid::from_raw(leader_pid), None).is_ok()
}

/// Non-blocking reap of a specific child pid, used by the watchdog/poller
/// so it never stalls waiting on a process it doesn't directly own.
pub fn try_reap(pid: i32) -> Option<WaitStatus> {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => None,
        Ok(status) => Some(status),
        Err(_) => None,
    }
}

/// Automatically reaps the child's pid when it goes out of scope, the way
/// the teacher's `AutoTerminate` does for a single process; here it reaps
/// the whole group via [`terminate_group`].
pub struct AutoKill {
    inner: Option<Child>,
}

impl AutoKill {
    pub fn new(child: Child) -> Self {
        Self { inner: Some(child) }
    }

    pub fn into_inner(mut self) -> Child {
        self.inner.take().expect("child present")
    }
}

impl Drop for AutoKill {
    fn drop(&mut self) {
        let Some(mut child) = self.inner.take() else {
            return;
        };
        if child.try_wait().as_ref().is_ok_and(Option::is_some) {
            return;
        }
        let pid = child.id() as i32;
        let _ = terminate_group(pid, std::time::Duration::from_millis(100));
        let _ = child.wait();
    }
}
