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

//! Initial-Send Recovery (C6): detects a missing base snapshot on the
//! receive side and synthesizes a preceding full send (spec §4.6).

use super::config::{ReceiveConfig, SendConfig};
use crate::error::Result;
use crate::ssh_cmd;
use log::{debug, warn};
use std::process::Command;

const ZFS_BINARY: &str = "/usr/sbin/zfs";

fn snapshot_short_name(snapshot: &str) -> &str {
    snapshot.split('@').nth(1).unwrap_or(snapshot)
}

/// Runs the existence probe `zfs list -H -t snapshot <target>@<snap>`
/// (spec §4.6/§6), locally or through the SSH vector for a remote receive.
/// Exit code 1 means "does not exist"; any other non-zero is treated as
/// "unknown -- assume it exists and proceed" rather than blocking a start.
pub fn target_snapshot_exists(
    receive: &ReceiveConfig,
    from_snapshot: &str,
    managed_known_hosts_path: &str,
) -> Result<bool> {
    let snap = snapshot_short_name(from_snapshot);
    let full = format!("{}@{snap}", receive.target);

    let mut cmd = match &receive.remote {
        Some(remote) => {
            let ssh_argv = ssh_cmd::assemble_ssh_command(remote, managed_known_hosts_path)?;
            let mut cmd = Command::new(&ssh_argv[0]);
            cmd.args(&ssh_argv[1..]);
            cmd.args(["sudo", ZFS_BINARY, "list", "-H", "-t", "snapshot", &full]);
            cmd
        }
        None => {
            let mut cmd = Command::new("sudo");
            cmd.args([ZFS_BINARY, "list", "-H", "-t", "snapshot", &full]);
            cmd
        }
    };

    debug!("probing target snapshot existence: {full}");
    let output = cmd.output()?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        other => {
            warn!(
                "snapshot existence probe for {full} exited with {other:?}; assuming it exists"
            );
            Ok(true)
        }
    }
}

/// Synthesizes the full-send config that runs ahead of the requested
/// incremental when the target lacks the base snapshot (spec §4.6): a
/// clone of `send` with the incremental fields cleared.
pub fn synthesize_initial_send(send: &SendConfig) -> SendConfig {
    send.as_full_send()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_short_name() {
        assert_eq!(snapshot_short_name("tank/fs@snap1"), "snap1");
    }

    #[test]
    fn synthesized_full_send_clears_incremental_fields() {
        let send = SendConfig {
            snapshot: "tank/fs@B".to_string(),
            from_snapshot: Some("tank/fs@A".to_string()),
            intermediary: true,
            resume_token: Some("tok".to_string()),
            ..Default::default()
        };
        let full = synthesize_initial_send(&send);
        assert!(full.from_snapshot.is_none());
        assert!(!full.intermediary);
        assert!(full.resume_token.is_none());
        assert_eq!(full.snapshot, "tank/fs@B");
    }
}
